//! # duplex
//!
//! `duplex serve` runs the echo server; `duplex call` dials a server, issues
//! one synchronous request and prints the reply.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use duplex_server::shutdown::DEFAULT_DRAIN_TIMEOUT;
use duplex_server::{
    ConnectionConfig, DefaultHandler, DuplexServer, ShutdownOutcome, client, metrics,
};
use duplex_settings::DuplexSettings;
use serde_json::Value;

/// Duplex messaging server and client.
#[derive(Parser, Debug)]
#[command(name = "duplex", about = "Duplex WebSocket messaging")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the echo server.
    Serve {
        /// Settings file (defaults to `~/.duplex/settings.json`).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to bind (overrides settings, 0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Send one request and print the reply.
    Call {
        /// Server URL, e.g. `ws://127.0.0.1:8080/ws`.
        url: String,

        /// JSON payload of the request.
        data: String,

        /// How long to wait for the reply.
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,
    },
}

fn load(config: Option<&Path>) -> Result<DuplexSettings> {
    let path = config.map_or_else(duplex_settings::settings_path, Path::to_path_buf);
    duplex_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

fn init_logging(settings: &DuplexSettings) {
    if settings.logging.json {
        duplex_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        duplex_core::logging::init_subscriber(&settings.logging.level);
    }
}

async fn serve(config: Option<PathBuf>, port: Option<u16>) -> Result<()> {
    let mut settings = load(config.as_deref())?;
    if let Some(port) = port {
        settings.server.port = port;
    }
    init_logging(&settings);

    let handle = metrics::install_recorder().context("Failed to install metrics recorder")?;
    let server =
        DuplexServer::from_settings(&settings, Arc::new(DefaultHandler)).with_metrics(handle);
    let addr = server.listen().await.context("Failed to bind listener")?;
    tracing::info!("duplex listening on ws://{addr}{}", settings.server.ws_path);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    match server.shutdown().graceful_shutdown(DEFAULT_DRAIN_TIMEOUT).await {
        ShutdownOutcome::Drained { force_closed } => {
            tracing::info!(force_closed, "Shutdown complete");
        }
        ShutdownOutcome::TimedOut => tracing::warn!("Shutdown timed out"),
        ShutdownOutcome::NotServing => tracing::info!("Shutdown complete"),
    }
    Ok(())
}

async fn call(url: &str, data: &str, timeout_ms: u64) -> Result<()> {
    let settings = load(None)?;
    init_logging(&settings);

    let data: Value = serde_json::from_str(data).context("Request payload is not valid JSON")?;
    let conn = client::connect(
        url,
        ConnectionConfig::from(&settings.connection),
        Arc::new(DefaultHandler),
    )
    .await
    .with_context(|| format!("Failed to connect to {url}"))?;

    let result = conn.request(data, Duration::from_millis(timeout_ms)).await;
    conn.close();
    let reply = result.context("Request failed")?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Serve { config, port } => serve(config, port).await,
        Command::Call {
            url,
            data,
            timeout_ms,
        } => call(&url, &data, timeout_ms).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn serve_defaults() {
        let cli = Cli::parse_from(["duplex", "serve"]);
        match cli.command {
            Command::Serve { config, port } => {
                assert_eq!(config, None);
                assert_eq!(port, None);
            }
            Command::Call { .. } => panic!("expected serve"),
        }
    }

    #[test]
    fn serve_with_port_and_config() {
        let cli = Cli::parse_from([
            "duplex",
            "serve",
            "--port",
            "9000",
            "--config",
            "/tmp/d.json",
        ]);
        match cli.command {
            Command::Serve { config, port } => {
                assert_eq!(config, Some(PathBuf::from("/tmp/d.json")));
                assert_eq!(port, Some(9000));
            }
            Command::Call { .. } => panic!("expected serve"),
        }
    }

    #[test]
    fn call_default_timeout() {
        let cli = Cli::parse_from(["duplex", "call", "ws://localhost:8080/ws", "\"hi\""]);
        match cli.command {
            Command::Call {
                url,
                data,
                timeout_ms,
            } => {
                assert_eq!(url, "ws://localhost:8080/ws");
                assert_eq!(data, "\"hi\"");
                assert_eq!(timeout_ms, 5000);
            }
            Command::Serve { .. } => panic!("expected call"),
        }
    }

    #[test]
    fn call_requires_payload() {
        assert!(Cli::try_parse_from(["duplex", "call", "ws://localhost:8080/ws"]).is_err());
    }

    #[test]
    fn load_reads_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"server":{{"port":9100}}}}"#).unwrap();
        let settings = load(Some(file.path())).unwrap();
        assert_eq!(settings.server.port, 9100);
    }

    #[test]
    fn load_rejects_broken_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{oops").unwrap();
        assert!(load(Some(file.path())).is_err());
    }

    #[tokio::test]
    async fn call_rejects_invalid_json_before_dialing() {
        let err = call("ws://127.0.0.1:1/ws", "{nope", 100).await.unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }
}
