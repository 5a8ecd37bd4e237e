//! patchbay - headless patch graph engine
//!
//! Subcommands:
//! - `patchbay watch` - Mirror a server's graph and accept gestures on stdin
//! - `patchbay demo` - Scripted loopback session, prints the final graph
//! - `patchbay config` - Show the effective configuration

use std::io::BufRead;
use std::path::PathBuf;
use std::thread;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use patchconf::PatchConfig;
use patchgraph::{
    event_channel, ActionReply, Engine, EngineCommand, EngineError, EngineOptions, EventReceiver,
    GroupId, GroupPosition, LoopbackServer, PatchServer, TracingCanvas,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

mod commands;
mod demo;

use commands::{TextCommand, HELP};

#[derive(Parser)]
#[command(name = "patchbay")]
#[command(about = "Headless patchbay for JACK-style audio graphs")]
#[command(version)]
struct Cli {
    /// Config file (replaces ./patchbay.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the server graph and read gesture commands from stdin
    Watch {
        /// Server backend (defaults to engine.backend from config)
        #[arg(short, long)]
        backend: Option<Backend>,
    },

    /// Run a scripted loopback session and print the resulting graph as JSON
    Demo,

    /// Print the effective configuration and where it came from
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Loopback,
    Pipewire,
}

impl Backend {
    fn from_config(name: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(name, true)
            .map_err(|e| anyhow::anyhow!("engine.backend: {}", e))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = PatchConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.telemetry.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Watch { backend } => {
            let backend = match backend {
                Some(backend) => backend,
                None => Backend::from_config(&config.engine.backend)?,
            };
            watch(&config, backend).await?;
        }
        Commands::Demo => {
            let snapshot = demo::run(&config)?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Config => {
            if sources.files.is_empty() {
                println!("# no config files found, using defaults");
            }
            for file in &sources.files {
                println!("# loaded: {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# env override: {}", var);
            }
            println!("{}", config.to_toml());
        }
    }

    Ok(())
}

async fn watch(config: &PatchConfig, backend: Backend) -> Result<()> {
    let (events_tx, events_rx) = event_channel(config.engine.event_queue_capacity);

    match backend {
        Backend::Loopback => {
            let server = LoopbackServer::new(events_tx);
            server
                .seed_system()
                .context("Failed to seed loopback server")?;
            run_engine(server, events_rx, config).await
        }
        #[cfg(feature = "pipewire")]
        Backend::Pipewire => {
            let server = patchgraph::backend::PipeWireServer::connect(events_tx)
                .context("Failed to connect to PipeWire")?;
            run_engine(server, events_rx, config).await
        }
        #[cfg(not(feature = "pipewire"))]
        Backend::Pipewire => {
            anyhow::bail!("PipeWire backend not enabled (compile with --features pipewire)")
        }
    }
}

async fn run_engine<S: PatchServer>(
    server: S,
    mut events: EventReceiver,
    config: &PatchConfig,
) -> Result<()> {
    let mut engine = Engine::new(TracingCanvas, EngineOptions::from_config(config));
    engine.attach(server);

    let (command_tx, mut command_rx) = mpsc::channel(64);
    let (quit_tx, quit_rx) = oneshot::channel();
    let stdin_task = tokio::spawn(read_commands(stdin_lines()?, command_tx, quit_tx));

    eprintln!("{}", HELP);
    engine
        .run(&mut events, &mut command_rx, async {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = quit_rx => {}
            }
        })
        .await;

    stdin_task.abort();
    engine.detach();
    info!("patchbay stopped");
    Ok(())
}

/// Blocking stdin reader on its own thread, so exit never waits on it.
fn stdin_lines() -> Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(16);
    thread::Builder::new()
        .name("patchbay-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("stdin read failed: {}", e);
                        break;
                    }
                }
            }
        })
        .context("Failed to spawn stdin thread")?;
    Ok(rx)
}

/// Forward stdin commands to the engine until `quit` or EOF.
async fn read_commands(
    mut lines: mpsc::Receiver<String>,
    commands: mpsc::Sender<EngineCommand>,
    quit: oneshot::Sender<()>,
) {
    while let Some(line) = lines.recv().await {
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<TextCommand>() {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };
        if command == TextCommand::Quit {
            break;
        }
        if let Err(e) = dispatch(&commands, command).await {
            eprintln!("{:#}", e);
        }
    }

    let _ = quit.send(());
}

async fn dispatch(commands: &mpsc::Sender<EngineCommand>, command: TextCommand) -> Result<()> {
    match command {
        TextCommand::Dump => {
            let snapshot = snapshot(commands).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        TextCommand::Status => {
            let (tx, rx) = oneshot::channel();
            send(commands, EngineCommand::Status(tx)).await?;
            let status = rx.await.context("engine stopped")?;
            println!(
                "{} | {} frames @ {} Hz ({:.1} ms) | DSP {:.1}% | xruns {} | rt {}",
                status.transport_text(),
                status.buffer_size,
                status.sample_rate,
                status.latency_ms(),
                status.dsp_load,
                status.xruns,
                status.realtime
            );
        }
        TextCommand::View(view) => {
            let view = match view {
                Some(view) => view,
                None => {
                    let (tx, rx) = oneshot::channel();
                    send(commands, EngineCommand::Status(tx)).await?;
                    rx.await.context("engine stopped")?.transport_view.next()
                }
            };
            send(commands, EngineCommand::SetTransportView(view)).await?;
            println!("transport view: {}", view);
        }
        TextCommand::ClearXruns => send(commands, EngineCommand::ClearXruns).await?,
        TextCommand::Quit => {}
        gesture => {
            let snapshot = snapshot(commands).await?;
            let stored = match gesture.stored_position_target(&snapshot)? {
                Some(group_id) => stored_position(commands, group_id).await?,
                None => None,
            };
            let action = gesture.to_action(&snapshot, stored)?;
            let (tx, rx) = oneshot::channel();
            send(
                commands,
                EngineCommand::Gesture {
                    action,
                    reply: Some(tx),
                },
            )
            .await?;
            match rx.await.context("engine stopped")?? {
                ActionReply::Info(details) => println!("{}", details),
                ActionReply::Renamed { name, .. } => println!("renamed to {}", name),
                ActionReply::Requested => println!("requested"),
                ActionReply::Ignored => println!("ignored"),
            }
        }
    }
    Ok(())
}

async fn send(commands: &mpsc::Sender<EngineCommand>, command: EngineCommand) -> Result<()> {
    commands
        .send(command)
        .await
        .map_err(|_| anyhow::anyhow!("engine stopped"))
}

async fn stored_position(
    commands: &mpsc::Sender<EngineCommand>,
    group_id: GroupId,
) -> Result<Option<GroupPosition>> {
    let (tx, rx) = oneshot::channel();
    send(commands, EngineCommand::StoredPosition { group_id, reply: tx }).await?;
    match rx.await.context("engine stopped")? {
        Ok(position) => Ok(position),
        Err(EngineError::MalformedMetadata(msg)) => {
            warn!("ignoring stored position: {}", msg);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

async fn snapshot(commands: &mpsc::Sender<EngineCommand>) -> Result<patchgraph::GraphSnapshot> {
    let (tx, rx) = oneshot::channel();
    send(commands, EngineCommand::Snapshot(tx)).await?;
    rx.await.context("engine stopped")
}
