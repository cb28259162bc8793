use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use wdb_agent::{HostBridge, DEFAULT_PORT};
use wdb_core::{AgentConfig, BringUp, SimTarget, TargetEvent};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Task,
    Extern,
    Bimodal,
}

impl From<ModeArg> for BringUp {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Task => Self::Task,
            ModeArg::Extern => Self::Extern,
            ModeArg::Bimodal => Self::Bimodal,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "wdb-agent", author, version, about = "WDB target agent on a simulated target", long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    listen: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Agent configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Agent modes to bring up, overriding the configuration
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Post a simulated target event at this interval
    #[arg(long)]
    event_interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("Starting WDB agent...");

    let mut config = match &args.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.initial_mode = mode.into();
    }
    let reply_timeout = config.notify_poll_timeout() * 2;

    let target = SimTarget::new(config);
    let mut monitor = target.agent.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = monitor.recv().await {
            info!("Agent: {event:?}");
        }
    });

    let available = target.agent.bring_up();
    if available.is_empty() {
        error!("No agent mode came up; host tools will get no response");
    } else {
        info!("Agent modes {available:?}, running in {:?} mode", target.agent.mode());
    }

    if let Some(interval) = args.event_interval_ms {
        let agent = target.agent.clone();
        thread::Builder::new().name("tWorkload".to_string()).spawn(move || {
            let mut tick = 0u64;
            loop {
                thread::sleep(Duration::from_millis(interval));
                tick += 1;
                agent.post_event(TargetEvent::Text(format!("tick {tick}")));
            }
        })?;
    }

    // Handle Ctrl+C
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down...");
                std::process::exit(0);
            }
            Err(err) => {
                error!("Unable to listen for shutdown signal: {err}");
            }
        }
    });

    let bridge = Arc::new(HostBridge::spawn(target.host.clone(), reply_timeout)?);
    wdb_agent::run_server(bridge, &args.listen, args.port).await
}
