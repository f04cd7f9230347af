//! topicrelay - UDP to TCP topic relay server.
//!
//! Producers send datagrams to the UDP port, subscribers connect to the TCP
//! port (the same number). Type `exit` on stdin to disconnect everyone and
//! stop.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use giztoy_topicrelay::{Broker, BrokerConfig};
use tokio::io::BufReader;
use tokio::net::{TcpListener, UdpSocket};
use tracing_subscriber::EnvFilter;

/// UDP to TCP topic relay server.
#[derive(Parser, Debug)]
#[command(name = "topicrelay")]
#[command(about = "Relay UDP datagrams to TCP subscribers by topic")]
#[command(version)]
struct Args {
    /// Port for both the TCP listener and the UDP socket (1024 or above)
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Broker config file (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Per-record write timeout in milliseconds, overrides the config file
    #[arg(long)]
    write_timeout_ms: Option<u64>,
}

fn load_config(args: &Args) -> Result<BrokerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_yaml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => BrokerConfig::new(),
    };
    if let Some(ms) = args.write_timeout_ms {
        config = config.write_timeout(Duration::from_millis(ms));
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    if args.port < 1024 {
        bail!("port {} is reserved, use 1024 or above", args.port);
    }
    let config = load_config(&args)?;

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to listen on tcp {}", addr))?;
    let udp = UdpSocket::bind(&addr)
        .await
        .with_context(|| format!("failed to bind udp {}", addr))?;

    let broker = Broker::new(listener, udp, config)?;
    broker.run(BufReader::new(tokio::io::stdin())).await?;
    Ok(())
}
