//! Configuration: tool server declarations and model endpoint settings.
//!
//! The file format is TOML. Raw structs mirror the file; validated structs
//! are what the rest of the crate consumes. Command, argument, environment,
//! and URL values go through shell-style expansion so `~` and `${VAR}`
//! references behave the way users expect.

mod error;

pub use error::ConfigError;

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Which byte-level channel a server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
    Sse,
}

impl TransportKind {
    pub fn is_remote(self) -> bool {
        matches!(self, TransportKind::Http | TransportKind::Sse)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Http => "http",
            TransportKind::Sse => "sse",
        };
        f.write_str(label)
    }
}

/// One declared tool server. Exactly one of the transport-specific field
/// groups is populated, consistent with `transport`; `validate` enforces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub name: String,
    pub transport: TransportKind,
    // stdio group
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    // http/sse group
    pub url: Option<String>,
    pub headers: HashMap<String, String>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let missing = |field| ConfigError::MissingField {
            server: self.name.clone(),
            transport: self.transport.to_string(),
            field,
        };
        let foreign = |field| ConfigError::ForeignField {
            server: self.name.clone(),
            transport: self.transport.to_string(),
            field,
        };

        match self.transport {
            TransportKind::Stdio => {
                if self.command.as_deref().unwrap_or("").trim().is_empty() {
                    return Err(missing("command"));
                }
                if self.url.is_some() {
                    return Err(foreign("url"));
                }
                if !self.headers.is_empty() {
                    return Err(foreign("headers"));
                }
            }
            TransportKind::Http | TransportKind::Sse => {
                if self.url.as_deref().unwrap_or("").trim().is_empty() {
                    return Err(missing("url"));
                }
                if self.command.is_some() {
                    return Err(foreign("command"));
                }
                if !self.args.is_empty() {
                    return Err(foreign("args"));
                }
                if !self.env.is_empty() {
                    return Err(foreign("env"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawServer {
    name: String,
    transport: TransportKind,
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    url: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

impl From<RawServer> for ServerConfig {
    fn from(raw: RawServer) -> Self {
        let expand = |s: &str| -> String {
            shellexpand::full(s)
                .map(|cow| cow.into_owned())
                .unwrap_or_else(|_| s.to_string())
        };

        Self {
            name: raw.name,
            transport: raw.transport,
            command: raw.command.as_deref().map(expand),
            args: raw.args.iter().map(|arg| expand(arg)).collect(),
            env: raw
                .env
                .into_iter()
                .map(|(key, value)| (key, expand(&value)))
                .collect(),
            url: raw.url.as_deref().map(expand),
            headers: raw.headers,
        }
    }
}

/// Model endpoint settings for the agent loop.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key, if the
    /// endpoint requires one.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_model() -> String {
    "llama3".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawAppConfig {
    #[serde(default)]
    model: Option<ModelConfig>,
    #[serde(default)]
    servers: Vec<RawServer>,
}

/// Fully validated application configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub servers: Vec<ServerConfig>,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawAppConfig =
            toml::from_str(contents).map_err(|source| ConfigError::Parse { source })?;

        let servers: Vec<ServerConfig> = raw.servers.into_iter().map(ServerConfig::from).collect();

        let mut seen = std::collections::HashSet::new();
        for server in &servers {
            server.validate()?;
            if !seen.insert(server.name.clone()) {
                return Err(ConfigError::DuplicateServer {
                    server: server.name.clone(),
                });
            }
        }

        Ok(Self {
            model: raw.model.unwrap_or_default(),
            servers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_transport_groups() {
        let config = AppConfig::parse(
            r#"
            [model]
            base_url = "http://127.0.0.1:11434"
            model = "llama3"

            [[servers]]
            name = "files"
            transport = "stdio"
            command = "mcp-files"
            args = ["--root", "/tmp"]

            [servers.env]
            RUST_LOG = "debug"

            [[servers]]
            name = "search"
            transport = "http"
            url = "https://search.example/mcp"

            [servers.headers]
            Authorization = "Bearer token"
            "#,
        )
        .expect("valid config");

        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].transport, TransportKind::Stdio);
        assert_eq!(config.servers[0].args, vec!["--root", "/tmp"]);
        assert_eq!(config.servers[1].transport, TransportKind::Http);
        assert_eq!(
            config.servers[1]
                .headers
                .get("Authorization")
                .map(String::as_str),
            Some("Bearer token")
        );
    }

    #[test]
    fn stdio_server_must_not_carry_a_url() {
        let err = AppConfig::parse(
            r#"
            [[servers]]
            name = "mixed"
            transport = "stdio"
            command = "mcp-files"
            url = "https://also.example"
            "#,
        )
        .expect_err("conflicting field groups");
        assert!(matches!(err, ConfigError::ForeignField { field: "url", .. }));
    }

    #[test]
    fn http_server_requires_a_url() {
        let err = AppConfig::parse(
            r#"
            [[servers]]
            name = "remote"
            transport = "http"
            "#,
        )
        .expect_err("url is mandatory");
        assert!(matches!(err, ConfigError::MissingField { field: "url", .. }));
    }

    #[test]
    fn duplicate_server_names_are_rejected() {
        let err = AppConfig::parse(
            r#"
            [[servers]]
            name = "twin"
            transport = "stdio"
            command = "a"

            [[servers]]
            name = "twin"
            transport = "stdio"
            command = "b"
            "#,
        )
        .expect_err("names must be unique");
        assert!(matches!(err, ConfigError::DuplicateServer { .. }));
    }

    #[test]
    fn expands_env_vars_in_command_and_args() {
        unsafe {
            std::env::set_var("ORRERY_TEST_ROOT", "/opt/tools");
        }
        let config = AppConfig::parse(
            r#"
            [[servers]]
            name = "expanded"
            transport = "stdio"
            command = "${ORRERY_TEST_ROOT}/server"
            args = ["--home", "${ORRERY_TEST_ROOT}"]
            "#,
        )
        .expect("valid config");
        assert_eq!(
            config.servers[0].command.as_deref(),
            Some("/opt/tools/server")
        );
        assert_eq!(config.servers[0].args[1], "/opt/tools");
    }
}
