use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "mailroom")]
#[command(about = "Mailroom CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and default files (config file, data directory).
    Init {
        /// Config file path (default: MAILROOM_CONFIG_PATH or ~/.mailroom/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the gateway (webhook ingestion, history API, WebSocket subscriptions).
    Serve {
        /// Config file path (default: MAILROOM_CONFIG_PATH or ~/.mailroom/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP and WebSocket port (default from config or 8025)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Watch a mailbox via the gateway: print stored history, then live mail.
    Watch {
        /// Mailbox address to watch (e.g. alice@inbox.test)
        address: String,

        /// Config file path (default: MAILROOM_CONFIG_PATH or ~/.mailroom/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("mailroom {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("serve failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Watch { address, config }) => {
            if let Err(e) = run_watch(config, address).await {
                log::error!("watch failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, _path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{}",
        config.gateway.bind,
        config.gateway.port
    );
    lib::gateway::run_gateway(config).await
}

async fn run_watch(
    config_path: Option<std::path::PathBuf>,
    address: String,
) -> anyhow::Result<()> {
    let (config, _) = lib::config::load_config(config_path)?;
    let ws_url = format!(
        "ws://{}:{}/ws",
        config.gateway.bind.trim(),
        config.gateway.port
    );
    let (mut ws, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .with_context(|| format!("connecting to {}", ws_url))?;

    let join_req = serde_json::json!({
        "type": "req",
        "id": "1",
        "method": "join",
        "params": { "address": address }
    });
    ws.send(Message::Text(join_req.to_string())).await?;

    while let Some(msg) = ws.next().await {
        let msg = msg?;
        let Message::Text(text) = msg else { continue };
        let Ok(frame) = serde_json::from_str::<serde_json::Value>(&text) else {
            continue;
        };
        match frame.get("type").and_then(|v| v.as_str()) {
            Some("res") => {
                if !frame.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
                    let err = frame
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("join failed");
                    anyhow::bail!("{}", err);
                }
                if let Some(joined) = frame
                    .get("payload")
                    .and_then(|p| p.get("joined"))
                    .and_then(|v| v.as_str())
                {
                    println!("watching {}", joined);
                }
            }
            Some("event") => match frame.get("event").and_then(|v| v.as_str()) {
                Some("message.history") => {
                    let messages = frame
                        .get("payload")
                        .and_then(|p| p.get("messages"))
                        .and_then(|v| v.as_array());
                    println!("{} stored message(s)", messages.map_or(0, |m| m.len()));
                    if let Some(messages) = messages {
                        // History arrives newest-first; print oldest-first.
                        for m in messages.iter().rev() {
                            print_message(m);
                        }
                    }
                }
                Some("message.new") => {
                    if let Some(m) = frame.get("payload").and_then(|p| p.get("message")) {
                        print_message(m);
                    }
                }
                Some("error") => {
                    let reason = frame
                        .get("payload")
                        .and_then(|p| p.get("reason"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    eprintln!("gateway error: {}", reason);
                }
                Some("shutdown") => {
                    println!("gateway is shutting down");
                    break;
                }
                _ => {}
            },
            _ => {}
        }
    }

    Ok(())
}

fn print_message(m: &serde_json::Value) {
    let from = m.get("from").and_then(|v| v.as_str()).unwrap_or("unknown");
    let subject = m.get("subject").and_then(|v| v.as_str()).unwrap_or("");
    let received = m.get("receivedAt").and_then(|v| v.as_str()).unwrap_or("");
    println!("[{}] {}: {}", received, from, subject);
}
