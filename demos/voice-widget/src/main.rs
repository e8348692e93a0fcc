mod commands;
mod console;

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

use voice_session_core::SessionConfig;

#[derive(Parser)]
#[command(name = "voice-widget", version, about = "Record, stream and converse from the terminal")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL; overrides the config file.
    #[arg(long, global = true, env = "VOICE_BACKEND_URL")]
    backend_url: Option<String>,

    /// Recorder timeslice in milliseconds.
    #[arg(long, global = true)]
    timeslice_ms: Option<u64>,

    /// Directory for finished recordings.
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Print events as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List input and output devices.
    Devices,
    /// Record from the microphone.
    Record {
        /// Recording length in seconds.
        #[arg(short, long, default_value_t = 5.0)]
        seconds: f64,
        /// Stream chunks to the backend while recording.
        #[arg(long)]
        stream: bool,
        /// Show a live level meter.
        #[arg(long)]
        meter: bool,
        /// Input device name (substring match).
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Hold a spoken conversation with the remote agent.
    Converse {
        #[arg(short, long, default_value_t = 1)]
        turns: u32,
        /// Seconds to record per turn.
        #[arg(short, long, default_value_t = 5.0)]
        seconds: f64,
        /// Seconds to wait for the agent's reply.
        #[arg(long, default_value_t = 10.0)]
        reply_wait: f64,
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Run the streaming ingest endpoint.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: String,
        #[arg(long, default_value = "recordings")]
        dir: PathBuf,
    },
}

fn load_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => {
            let mut config = SessionConfig::default();
            config.apply_env();
            config
        }
    };
    if let Some(url) = &cli.backend_url {
        config.backend_url = url.clone();
    }
    if let Some(ms) = cli.timeslice_ms {
        config.timeslice_ms = ms;
    }
    if let Some(dir) = &cli.output {
        config.output_directory = Some(dir.clone());
    }
    config.validate().map_err(|e| anyhow!("invalid configuration: {}", e))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    log::debug!("configuration: {:?}", config);

    match cli.command {
        Command::Devices => commands::list_devices(),
        Command::Record {
            seconds,
            stream,
            meter,
            device,
        } => {
            let options = commands::RecordOptions {
                seconds,
                stream,
                meter,
                device,
                json: cli.json,
            };
            commands::record(&config, options).await
        }
        Command::Converse {
            turns,
            seconds,
            reply_wait,
            device,
        } => {
            let options = commands::ConverseOptions {
                turns,
                seconds,
                reply_wait,
                device,
                json: cli.json,
            };
            commands::converse(&config, options).await
        }
        Command::Serve { addr, dir } => commands::serve(&addr, dir).await,
    }
}
