use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {source}")]
    Parse {
        #[source]
        source: toml::de::Error,
    },
    #[error("server '{server}' uses the '{transport}' transport but does not set '{field}'")]
    MissingField {
        server: String,
        transport: String,
        field: &'static str,
    },
    #[error("server '{server}' uses the '{transport}' transport but also sets '{field}'")]
    ForeignField {
        server: String,
        transport: String,
        field: &'static str,
    },
    #[error("duplicate server name '{server}'")]
    DuplicateServer { server: String },
}
