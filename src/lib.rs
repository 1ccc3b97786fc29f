//! MCP client core: JSON-RPC transports (subprocess stdio and HTTP/SSE),
//! the initialize/discover/call protocol client, a namespaced tool
//! catalog with risk classification, and a cancellable agent tool-call
//! loop that streams its progress.

pub mod agent;
pub mod catalog;
pub mod client;
pub mod config;
pub mod model;
pub mod protocol;
pub mod runs;
pub mod transport;
