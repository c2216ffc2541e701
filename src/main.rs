//! Logflare Ship Binary
//!
//! Reads newline-delimited JSON log events from a file or stdin and ships them to the
//! Logflare ingestion API.

use clap::Parser;
use logflare::client::LogClient;
use logflare::config::{ClientConfig, Endpoint, FlushPolicy};
use logflare::types::LogEvent;
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "logflare-ship")]
#[command(about = "Ship newline-delimited JSON log events to Logflare")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input file; stdin when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Source token
    #[arg(long, conflicts_with = "source_name")]
    source_token: Option<String>,

    /// Source name
    #[arg(long)]
    source_name: Option<String>,

    /// API base URL
    #[arg(long)]
    api_base_url: Option<String>,

    /// Send one request per event instead of batching
    #[arg(long)]
    immediate: bool,

    /// Post to the typecasting endpoint
    #[arg(long)]
    typecasting: bool,

    /// Cast numeric metadata to strings before sending
    #[arg(long)]
    numbers_to_strings: bool,

    /// Log failed requests
    #[arg(long)]
    debug: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit diagnostics as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(token) = &self.source_token {
            config.source_token = Some(token.clone());
            config.source_name = None;
        }
        if let Some(name) = &self.source_name {
            config.source_name = Some(name.clone());
            config.source_token = None;
        }
        if let Some(url) = &self.api_base_url {
            config.api_base_url = url.clone();
        }
        if self.immediate {
            config.flush_policy = FlushPolicy::Immediate;
        }
        if self.typecasting {
            config.endpoint = Endpoint::Typecasting;
        }
        if self.numbers_to_strings {
            config.transforms.numbers_to_floats = true;
        }
        if self.debug {
            config.debug = true;
        }
    }
}

/// Non-JSON lines and JSON scalars become `{"message": line}`
fn parse_line(line: &str) -> LogEvent {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(fields)) => LogEvent::from(fields),
        _ => LogEvent::new(line),
    }
}

async fn ship<R: AsyncBufRead + Unpin>(client: &LogClient, reader: R) -> logflare::Result<usize> {
    let (sink, drain) = client.sink(1024)?;
    let mut lines = reader.lines();
    let mut count = 0;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Stopped reading input: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        sink.send(parse_line(line)).await?;
        count += 1;
    }

    drop(sink);
    if let Err(e) = drain.await {
        error!("Event sink task failed: {}", e);
    }
    Ok(count)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    let filter = if args.verbose {
        "logflare=debug,logflare_ship=debug,info"
    } else {
        "logflare=info,logflare_ship=info,warn"
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let installed = if args.json_logs {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.expect("Failed to set tracing subscriber");

    // Load configuration; validation happens once the overrides are in
    let mut config = ClientConfig::read(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    if args.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    info!("Starting logflare-ship v{}", env!("CARGO_PKG_VERSION"));
    info!("API base URL: {}", config.api_base_url);
    info!("Flush policy: {:?}", config.flush_policy);

    let client = LogClient::builder(config)
        .on_error(|payload, err| {
            error!("Dropped batch of {} events: {}", payload.batch.len(), err);
        })
        .build()?;

    let count = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            ship(&client, BufReader::new(file)).await?
        }
        None => ship(&client, BufReader::new(tokio::io::stdin())).await?,
    };

    client.shutdown().await?;
    info!("Shipped {} events", count);
    Ok(())
}
