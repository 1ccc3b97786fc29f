//! Name-keyed facade over the configured tool servers, plus the process's
//! tool catalog.

use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

use super::{ConnectionReport, ToolCallOutcome, connection};
use crate::catalog::{ToolCatalog, ToolDescriptor, split_full_name};
use crate::config::ServerConfig;

/// Owns the server configurations (read-only) and the tool catalog
/// (replace-on-discover, scoped per server). Safe to share across
/// concurrent probes and discovery calls against different servers.
pub struct ServerManager {
    configs: HashMap<String, ServerConfig>,
    catalog: Mutex<ToolCatalog>,
}

impl ServerManager {
    pub fn new(servers: Vec<ServerConfig>) -> Self {
        let configs = servers
            .into_iter()
            .map(|config| (config.name.clone(), config))
            .collect();
        Self {
            configs,
            catalog: Mutex::new(ToolCatalog::new()),
        }
    }

    pub fn config(&self, server: &str) -> Option<&ServerConfig> {
        self.configs.get(server)
    }

    fn not_found(server: &str) -> String {
        format!("MCP server \"{server}\" not found")
    }

    pub async fn test_connection(&self, server: &str) -> ConnectionReport {
        match self.configs.get(server) {
            Some(config) => connection::test_connection(config).await,
            None => ConnectionReport::failed(Self::not_found(server)),
        }
    }

    /// Discover one server's tools and replace its catalog entry. Unknown
    /// names and broken servers both yield an empty list.
    pub async fn discover_tools(&self, server: &str) -> Vec<ToolDescriptor> {
        let Some(config) = self.configs.get(server) else {
            warn!(server, "discovery requested for unconfigured server");
            return Vec::new();
        };
        let tools = connection::discover_tools(config).await;
        {
            let mut catalog = self.catalog.lock().expect("catalog lock");
            catalog.replace_server(server, tools.clone());
        }
        tools
    }

    /// Discover every configured server concurrently. Per-server
    /// replace-on-write keeps the passes independent of each other.
    pub async fn discover_all(&self) -> Vec<ToolDescriptor> {
        let names: Vec<String> = self.configs.keys().cloned().collect();
        let passes = names.iter().map(|name| self.discover_tools(name));
        join_all(passes).await.into_iter().flatten().collect()
    }

    pub async fn call_tool(&self, server: &str, tool: &str, arguments: Value) -> ToolCallOutcome {
        match self.configs.get(server) {
            Some(config) => connection::call_tool(config, tool, arguments).await,
            None => ToolCallOutcome::failed(Self::not_found(server)),
        }
    }

    /// Invoke a tool addressed by its `mcp__<server>__<tool>` full name.
    pub async fn call_full_name(&self, full_name: &str, arguments: Value) -> ToolCallOutcome {
        match split_full_name(full_name) {
            Some((server, tool)) => self.call_tool(server, tool, arguments).await,
            None => ToolCallOutcome::failed(format!(
                "\"{full_name}\" is not a namespaced tool name"
            )),
        }
    }

    /// Snapshot of the current catalog across all servers.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        let catalog = self.catalog.lock().expect("catalog lock");
        catalog.all().cloned().collect()
    }

    pub fn find_tool(&self, full_name: &str) -> Option<ToolDescriptor> {
        let catalog = self.catalog.lock().expect("catalog lock");
        catalog.find(full_name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportKind;
    use serde_json::json;

    fn scripted(name: &str, script: &str) -> ServerConfig {
        ServerConfig {
            name: name.into(),
            transport: TransportKind::Stdio,
            command: Some("sh".into()),
            args: vec!["-c".into(), script.into()],
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn unknown_server_yields_the_not_found_outcome() {
        let manager = ServerManager::new(Vec::new());
        let outcome = manager.call_tool("X", "anything", Value::Null).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("MCP server \"X\" not found"));

        let report = manager.test_connection("X").await;
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("MCP server \"X\" not found"));
    }

    #[tokio::test]
    async fn rediscovery_replaces_the_catalog_entry() {
        // The server offers {a, b} on its first run and {b, c} once the
        // marker file exists, imitating a reconfigured server.
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("reconfigured");
        let script = format!(
            r#"
            read -r _init
            echo '{{"jsonrpc":"2.0","id":1,"result":{{}}}}'
            read -r _note
            read -r _list
            if [ -f "{marker}" ]; then
                echo '{{"jsonrpc":"2.0","id":2,"result":{{"tools":[{{"name":"b"}},{{"name":"c"}}]}}}}'
            else
                touch "{marker}"
                echo '{{"jsonrpc":"2.0","id":2,"result":{{"tools":[{{"name":"a"}},{{"name":"b"}}]}}}}'
            fi
            sleep 2
            "#,
            marker = marker.display()
        );
        let manager = ServerManager::new(vec![scripted("srv", &script)]);

        let first = manager.discover_tools("srv").await;
        assert_eq!(first.len(), 2);
        assert!(manager.find_tool("mcp__srv__a").is_some());

        let second = manager.discover_tools("srv").await;
        let mut names: Vec<String> = second.into_iter().map(|tool| tool.name).collect();
        names.sort();
        assert_eq!(names, vec!["b", "c"]);
        assert!(manager.find_tool("mcp__srv__a").is_none(), "stale entry survived");
        assert!(manager.find_tool("mcp__srv__c").is_some());
    }

    #[tokio::test]
    async fn full_name_addressing_resolves_server_and_tool() {
        let script = r#"
            read -r _init
            echo '{"jsonrpc":"2.0","id":1,"result":{}}'
            read -r _note
            read -r _call
            echo '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"pong"}]}}'
            sleep 2
        "#;
        let manager = ServerManager::new(vec![scripted("net", script)]);
        let outcome = manager.call_full_name("mcp__net__ping", json!({})).await;
        assert!(outcome.success, "error: {:?}", outcome.error);

        let bad = manager.call_full_name("not_namespaced", json!({})).await;
        assert!(!bad.success);
    }
}
