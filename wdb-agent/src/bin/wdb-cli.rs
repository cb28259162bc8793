use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use wdb_agent::DEFAULT_PORT;
use wdb_core::{AgentMode, RegSetType, Request};

#[derive(Parser)]
#[command(name = "wdb-cli", author, version, about = "Talk to a WDB agent", long_about = None)]
struct Cli {
    /// Agent address
    #[arg(short, long, default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Task,
    Extern,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the agent answers
    Ping,
    /// Attach as the host; enables event notifications
    Connect,
    /// Show the agent mode
    Mode,
    /// Switch the agent mode
    SetMode { mode: ModeArg },
    /// Fetch the oldest pending event
    Event,
    /// Read registers of the suspended system
    Regs {
        /// Floating-point registers instead of the integer unit
        #[arg(long)]
        fpu: bool,
    },
    /// Resume the suspended system
    Continue,
}

impl Commands {
    fn request(&self) -> Request {
        match self {
            Self::Ping => Request::Ping,
            Self::Connect => Request::Connect,
            Self::Mode => Request::ModeGet,
            Self::SetMode { mode } => {
                let mode = match mode {
                    ModeArg::Task => AgentMode::Task,
                    ModeArg::Extern => AgentMode::Extern,
                };
                Request::ModeSet(mode.bit().bits())
            }
            Self::Event => Request::EventGet,
            Self::Regs { fpu } => Request::RegsGet(if *fpu { RegSetType::Fpu } else { RegSetType::Iu }),
            Self::Continue => Request::ContextContinue,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let reply = wdb_agent::request(&cli.addr, &cli.command.request()).await?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}
