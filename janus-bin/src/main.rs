//! CLI entry point: the interactive terminal loop by default, one-shot
//! with `-m`. Channel adapters beyond the terminal (chat bot, editor
//! protocol) live in downstream builds and register through the same
//! bus contracts.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use janus_core::{InboundMessage, OutboundKind, OutboundMessage, Result};
use janus_llm::{MockProvider, ProviderEntry, ProviderRegistry};
use janus_runtime::{ChannelHandler, DirectOptions, Runtime};

#[derive(Parser)]
#[command(name = "janus", about = "Personal autonomous agent runtime", version)]
struct Cli {
    /// Process a single message, print the reply, and exit.
    #[arg(short = 'm', long = "message")]
    message: Option<String>,

    /// Workspace directory.
    #[arg(long, default_value = ".")]
    workspace: PathBuf,
}

/// Prints outbound traffic to the terminal. Chunks render incrementally;
/// the stream-end marker closes the line.
struct TerminalHandler;

#[async_trait]
impl ChannelHandler for TerminalHandler {
    async fn deliver(&self, message: OutboundMessage) -> Result<()> {
        match message.kind {
            OutboundKind::Message => println!("{}", message.content),
            OutboundKind::Chunk => {
                print!("{}", message.content);
                let _ = std::io::stdout().flush();
            }
            OutboundKind::StreamEnd => println!(),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("janus=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = janus_config::load(Some(&cli.workspace), None)?;

    // Vendor HTTP clients are wired by downstream builds; without one the
    // runtime still assembles, backed by the offline provider.
    let mut providers = ProviderRegistry::new();
    warn!("no LLM vendor client linked into this build — using the offline provider");
    providers.add(ProviderEntry {
        name: config
            .llm
            .provider
            .clone()
            .unwrap_or_else(|| "offline".into()),
        provider: Arc::new(MockProvider::new("offline")),
        default_model: config.llm.model.clone(),
        purposes: vec![],
        priority: 0,
    });

    let runtime = Runtime::build(config, providers, None)?;

    if let Some(text) = cli.message {
        let reply = runtime
            .agent
            .process_direct(
                &text,
                DirectOptions {
                    channel: Some("cli".into()),
                    chat_id: Some("oneshot".into()),
                    ..Default::default()
                },
            )
            .await?;
        println!("{reply}");
        return Ok(());
    }

    runtime
        .bus
        .register_handler("cli", Arc::new(TerminalHandler));

    let cancel = CancellationToken::new();
    let runtime = Arc::new(runtime);
    let run_task = {
        let runtime = Arc::clone(&runtime);
        let cancel = cancel.clone();
        tokio::spawn(async move { runtime.run(cancel).await })
    };

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line? {
                Some(line) if line.trim() == "exit" => break,
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    runtime
                        .bus
                        .publish_inbound(InboundMessage::new("cli", "terminal", line), &cancel)
                        .await?;
                }
                None => break, // EOF
            },
        }
    }

    cancel.cancel();
    let _ = run_task.await;
    Ok(())
}
