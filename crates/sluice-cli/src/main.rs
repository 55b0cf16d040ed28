//! # sluice
//!
//! Run one streaming query from the terminal. Columns and rows are printed
//! tab-separated as they arrive, then the status line. Ctrl-C asks the server
//! to cancel and waits for its terminal reply.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use futures::StreamExt;
use serde_json::Value;
use sluice_core::{ResultSet, StreamEvent, StreamOutcome};
use sluice_session::{QuerySession, StreamState};
use sluice_settings::{ConnectionSettings, SluiceSettings};
use tokio_tungstenite::tungstenite::http::Uri;
use tracing::{info, warn};

/// Run a streaming query against a sluice server.
#[derive(Parser, Debug)]
#[command(name = "sluice", version, about = "Run a streaming query against a sluice server")]
struct Cli {
    /// Server URL (e.g. `ws://localhost:8080/ws`); overrides settings.
    #[arg(long)]
    url: Option<String>,

    /// Settings file (default `~/.sluice/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset; overrides settings.
    #[arg(long)]
    log_level: Option<String>,

    /// Log as JSON lines.
    #[arg(long)]
    json_logs: bool,

    /// Give up locally if no metadata or row arrives within this many ms.
    #[arg(long)]
    first_data_timeout_ms: Option<u64>,

    /// Query text, sent as-is.
    query: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => sluice_settings::load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => sluice_settings::load_settings().context("failed to load settings")?,
    };
    if let Some(url) = &cli.url {
        apply_url(&mut settings.connection, url)?;
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level.clone_from(level);
    }

    if cli.json_logs {
        sluice_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        sluice_core::logging::init_subscriber(&settings.logging.level);
    }

    run(&cli, &settings).await
}

async fn run(cli: &Cli, settings: &SluiceSettings) -> Result<ExitCode> {
    let session = QuerySession::websocket(settings);
    info!(url = %session.connection().url(), "starting query");

    let mut stream = session
        .open_query(&cli.query)
        .await
        .with_context(|| format!("failed to start query on {}", session.connection().url()))?;

    let mut result = ResultSet::new();
    let mut cancel_requested = false;
    let watchdog_armed = cli.first_data_timeout_ms.is_some();
    let watchdog = tokio::time::sleep(Duration::from_millis(cli.first_data_timeout_ms.unwrap_or(0)));
    tokio::pin!(watchdog);

    loop {
        tokio::select! {
            event = stream.next() => {
                let Some(event) = event else { break };
                print_event(&event);
                result.apply(event);
            }
            signal = tokio::signal::ctrl_c(), if !cancel_requested => {
                signal.context("failed to listen for Ctrl-C")?;
                cancel_requested = true;
                eprintln!("cancelling...");
                if let Err(e) = session.cancel_query(stream.id()).await {
                    warn!(error = %e, "cancel not sent, abandoning stream");
                    stream.abandon();
                    result.cancel();
                    break;
                }
            }
            () = &mut watchdog, if watchdog_armed && stream.first_event_at().is_none() => {
                warn!(stream_id = %stream.id(), "no data before timeout, abandoning stream");
                stream.abandon();
                break;
            }
        }
    }
    if stream.state() == StreamState::Abandoned {
        result.abandon();
    }

    let status = if cancel_requested && !matches!(result.outcome, StreamOutcome::Complete(_)) {
        "Query cancelled".to_string()
    } else {
        result.status_text()
    };
    eprintln!("{status}");

    session.close().await;
    Ok(match result.outcome {
        StreamOutcome::Complete(_) => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn print_event(event: &StreamEvent) {
    match event {
        StreamEvent::Metadata(meta) => println!("{}", meta.columns.join("\t")),
        StreamEvent::Row(row) => println!("{}", format_row(row)),
        StreamEvent::Error(message) => eprintln!("error: {message}"),
        StreamEvent::Complete(_) => {}
    }
}

fn format_row(row: &[Value]) -> String {
    row.iter().map(format_value).collect::<Vec<_>>().join("\t")
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Override scheme, host, port and path from a `ws://host:port/path` URL.
fn apply_url(connection: &mut ConnectionSettings, url: &str) -> Result<()> {
    let uri: Uri = url.parse().with_context(|| format!("invalid URL: {url}"))?;
    let Some(scheme) = uri.scheme_str() else {
        bail!("URL needs a ws:// or wss:// scheme: {url}");
    };
    if scheme != "ws" && scheme != "wss" {
        bail!("unsupported URL scheme {scheme:?}, expected ws or wss");
    }
    let Some(host) = uri.host() else {
        bail!("URL has no host: {url}");
    };

    connection.scheme = scheme.to_string();
    connection.host = host.to_string();
    connection.port = uri
        .port_u16()
        .unwrap_or(if scheme == "wss" { 443 } else { 80 });
    if !uri.path().is_empty() && uri.path() != "/" {
        connection.path = uri.path().to_string();
    }
    Ok(())
}
