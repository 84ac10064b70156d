use clap::Parser;
use latreport_logd::config::{messages_from_text, parse_load_arg, DEFAULT_ADDRESS};
use latreport_logd::{Server, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "latreport-logd", about = "Local log-query service for latency report runs")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = DEFAULT_ADDRESS)]
    address: SocketAddr,

    /// Require this bearer token on every request.
    #[arg(long, env = "LATREPORT_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Preload a source from a file, one event per line (repeatable).
    #[arg(long = "load", value_name = "NAME=PATH", value_parser = parse_load_arg)]
    loads: Vec<(String, PathBuf)>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = ServerConfig::new(args.address);
    config.api_token = args.api_token;
    for (name, path) in args.loads {
        let text = std::fs::read_to_string(&path).map_err(|e| format!("{}: {e}", path.display()))?;
        config.preload.push((name, messages_from_text(&text)));
    }

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

    // Print "Listening on <addr>" once the server signals it is bound.
    tokio::spawn(async move {
        if let Ok(addr) = ready_rx.await {
            println!("Listening on {}", addr);
        }
    });

    Server::new(config).run(ready_tx).await?;
    Ok(())
}
