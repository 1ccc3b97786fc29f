use clap::{Parser, Subcommand};
use serde_json::Value;
use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use orrery::agent::{AgentEvent, AgentLoop};
use orrery::client::ServerManager;
use orrery::config::AppConfig;
use orrery::model::{ChatMessage, OpenAiProvider, Role};
use orrery::runs::RunRegistry;

#[derive(Parser, Debug)]
#[command(name = "orrery", version, about = "MCP client with an agent tool-call loop")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Test connectivity to a configured server.
    Probe { server: String },
    /// Discover tools on one server, or on all of them.
    Tools { server: Option<String> },
    /// Invoke a tool by its full name (mcp__<server>__<tool>).
    Call {
        full_name: String,
        /// Tool arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Run the agent loop against the configured model endpoint.
    Chat {
        prompt: Vec<String>,
        /// Extra system prompt prepended to the conversation.
        #[arg(long)]
        system: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    info!(servers = config.servers.len(), "configuration loaded");

    let manager = Arc::new(ServerManager::new(config.servers.clone()));

    match cli.command {
        Command::Probe { server } => {
            let report = manager.test_connection(&server).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Tools { server } => {
            let tools = match server {
                Some(server) => manager.discover_tools(&server).await,
                None => manager.discover_all().await,
            };
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }
        Command::Call { full_name, args } => {
            let arguments: Value = serde_json::from_str(&args)?;
            let outcome = manager.call_full_name(&full_name, arguments).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Chat { prompt, system } => {
            let prompt = prompt.join(" ");
            if prompt.trim().is_empty() {
                return Err("prompt cannot be empty".into());
            }
            run_chat(&config, manager, prompt, system).await?;
        }
    }
    Ok(())
}

async fn run_chat(
    config: &AppConfig,
    manager: Arc<ServerManager>,
    prompt: String,
    system: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let tools = manager.discover_all().await;
    let high_risk = tools.iter().filter(|tool| tool.high_risk).count();
    info!(tools = tools.len(), high_risk, "tool discovery complete");

    let provider = Arc::new(OpenAiProvider::from_config(&config.model));
    let agent = Arc::new(AgentLoop::new(
        provider,
        Arc::clone(&manager),
        config.model.model.clone(),
    ));

    let mut conversation = Vec::new();
    if let Some(system) = system {
        conversation.push(ChatMessage::text(Role::System, system));
    }
    conversation.push(ChatMessage::text(Role::User, prompt));

    let registry = RunRegistry::new();
    let guard = registry.register(uuid::Uuid::new_v4().to_string());
    let token = guard.token();

    // Ctrl-C cancels the run through the registry, the same path an
    // external caller would use.
    {
        let registry = registry.clone();
        let run_id = guard.run_id().to_string();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(run_id, "interrupt received; cancelling run");
                registry.cancel(&run_id);
            }
        });
    }

    let (tx, mut rx) = mpsc::channel(64);
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::Text { text } => {
                    let _ = write!(stdout, "{text}");
                    let _ = stdout.flush();
                }
                AgentEvent::ToolCall { full_name, input } => {
                    let _ = writeln!(stdout, "\n[tool call] {full_name} {input}");
                }
                AgentEvent::ToolResult {
                    full_name, success, ..
                } => {
                    let _ = writeln!(stdout, "[tool done] {full_name} success={success}");
                }
            }
        }
    });

    let result = agent.run(conversation, tools, tx, token).await;
    let _ = printer.await;
    drop(guard);

    match result {
        Ok(_) => {
            println!();
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .with_writer(std::io::stderr)
            .init();
    });
}
