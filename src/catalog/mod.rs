//! Tool registry: namespaced addressing for discovered tools.

pub mod risk;

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Separator joining `mcp`, the server name, and the tool name into the
/// full name the model uses to select a tool. Wire-compatible with
/// tool-aware model requests; do not change it.
const NAME_SEPARATOR: &str = "__";
const NAME_PREFIX: &str = "mcp";

pub fn full_tool_name(server: &str, tool: &str) -> String {
    format!("{NAME_PREFIX}{NAME_SEPARATOR}{server}{NAME_SEPARATOR}{tool}")
}

/// Invert [`full_tool_name`]. Returns `None` for names that do not follow
/// the `mcp__<server>__<tool>` scheme. Tool names may themselves contain
/// the separator, so only the first two joints split.
pub fn split_full_name(full_name: &str) -> Option<(&str, &str)> {
    let rest = full_name.strip_prefix(NAME_PREFIX)?;
    let rest = rest.strip_prefix(NAME_SEPARATOR)?;
    let (server, tool) = rest.split_once(NAME_SEPARATOR)?;
    if server.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server, tool))
}

/// One discovered tool, addressable by its namespaced full name.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub server: String,
    pub name: String,
    pub full_name: String,
    pub description: String,
    /// Opaque JSON schema, passed through to the model untouched.
    pub input_schema: Option<Value>,
    pub high_risk: bool,
}

impl ToolDescriptor {
    pub fn new(
        server: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Option<Value>,
    ) -> Self {
        let server = server.into();
        let name = name.into();
        let description = description.into();
        let full_name = full_tool_name(&server, &name);
        let high_risk = risk::is_high_risk(&name, &description);
        Self {
            server,
            name,
            full_name,
            description,
            input_schema,
            high_risk,
        }
    }
}

/// The per-server tool sets known to this process. Discovery is
/// authoritative: re-running it for a server fully replaces that server's
/// entries, never merges into them.
#[derive(Debug, Default)]
pub struct ToolCatalog {
    by_server: HashMap<String, Vec<ToolDescriptor>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_server(&mut self, server: &str, tools: Vec<ToolDescriptor>) {
        self.by_server.insert(server.to_string(), tools);
    }

    pub fn server_tools(&self, server: &str) -> &[ToolDescriptor] {
        self.by_server
            .get(server)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn all(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.by_server.values().flatten()
    }

    pub fn find(&self, full_name: &str) -> Option<&ToolDescriptor> {
        let (server, _) = split_full_name(full_name)?;
        self.server_tools(server)
            .iter()
            .find(|tool| tool.full_name == full_name)
    }
}
