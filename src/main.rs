//! gelf-send
//!
//! Ship log lines to a GELF collector from the command line.

use clap::Parser;
use gelfstream::client::GelfClient;
use gelfstream::config::{ClientConfig, TransportConfig, DEFAULT_GELF_PORT};
use gelfstream::error::ErrorEvents;
use gelfstream::types::LogLevel;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "gelf-send")]
#[command(about = "Send log messages to a GELF collector over UDP or TCP")]
#[command(version)]
struct Args {
    /// Message to send; reads one message per line from stdin when omitted
    message: Option<String>,

    /// Configuration file path
    #[arg(short, long, default_value = "config/gelf.toml")]
    config: PathBuf,

    /// Collector host
    #[arg(long)]
    host: Option<String>,

    /// Collector port
    #[arg(short, long)]
    port: Option<u16>,

    /// Transport kind (udp or tcp)
    #[arg(short, long)]
    transport: Option<String>,

    /// Message level (name or 0-7)
    #[arg(short, long, default_value = "info")]
    level: LogLevel,

    /// Additional field as key=value; may be repeated
    #[arg(short, long = "field", value_parser = parse_field)]
    fields: Vec<(String, String)>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

/// Drain the error channel. Each error was already logged when it was
/// reported, so only its kind is traced here.
fn count_failures(errors: &mut ErrorEvents) -> usize {
    let mut failures = 0usize;
    while let Ok(err) = errors.try_recv() {
        debug!(kind = ?err.kind(), "delivery failure");
        failures += 1;
    }
    failures
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(if args.verbose {
            "gelfstream=debug,gelf_send=debug,info"
        } else {
            "gelfstream=warn,gelf_send=info"
        })
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = if args.config.exists() {
        ClientConfig::from_file(&args.config)?
    } else {
        debug!("Config file not found, using defaults");
        ClientConfig::default()
    };

    if let Some(kind) = &args.transport {
        if kind != config.transport.kind() {
            config.transport = TransportConfig::from_kind(kind, "127.0.0.1", DEFAULT_GELF_PORT)?;
        }
    }
    config.transport.set_destination(args.host.clone(), args.port);
    config.validate()?;

    let mut client = GelfClient::with_config(config).await?;
    let mut errors = client
        .take_errors()
        .ok_or("error channel already taken")?;

    let fields: HashMap<_, _> = args
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), v.clone().into()))
        .collect();

    let mut sent = 0usize;
    match args.message {
        Some(message) => {
            client.log(args.level, &message, fields)?;
            sent += 1;
        }
        None => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                client.log(args.level, &line, fields.clone())?;
                sent += 1;
            }
        }
    }

    client.drain_and_close().await?;

    let failures = count_failures(&mut errors);

    info!(sent, failures, "done");
    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
