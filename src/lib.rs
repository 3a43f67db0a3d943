//! WTB Assistant - marketplace trading assistant core
//!
//! Keeps a watch-list of tradable items, asks a recommendation backend for
//! purchase targets, renders the WTB chat message and mirrors the background
//! price scraper from its lifecycle events.
//!
//! The binary runs headless: JSON lines on stdin are either lifecycle events
//! (`{"event": ..., "payload": ...}`) or commands (`{"command": ..., "seq": ...}`),
//! and every command is answered with one JSON line on stdout.

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod notifications;
pub mod services;
pub mod state;
pub mod store;

use commands::{Command, CommandResponse};
use config::AppConfig;
use error::AppError;
use events::EventEnvelope;
use serde_json::Value;
use state::AppState;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging, build the application state and serve stdin
pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing/logging; stdout carries responses
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wtb_assistant_lib=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting WTB Assistant...");

    let config = AppConfig::from_env()?;
    let state = Arc::new(AppState::new(config).await?);
    state.activate().await?;

    let mut stdout = tokio::io::stdout();
    let result = serve(state.clone(), BufReader::new(tokio::io::stdin()), &mut stdout).await;

    state.shutdown();
    tracing::info!("WTB Assistant stopped");
    result
}

/// Serve JSON lines from `input` until it closes
///
/// Commands run concurrently, so responses may come back out of order; callers
/// correlate them through `seq`. Returns once input is exhausted and every
/// in-flight command has answered.
pub async fn serve<R, W>(state: Arc<AppState>, input: R, output: &mut W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let (tx, mut rx) = mpsc::unbounded_channel::<CommandResponse>();
    let mut in_flight = JoinSet::new();
    let mut input_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => match line? {
                Some(line) => handle_line(&state, &line, &tx, &mut in_flight),
                None => {
                    tracing::info!("Input closed, waiting for {} commands", in_flight.len());
                    input_open = false;
                }
            },
            Some(response) = rx.recv() => write_response(output, &response).await?,
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("Command task failed: {}", e);
                }
            }
        }

        if !input_open && in_flight.is_empty() {
            break;
        }
    }

    while let Ok(response) = rx.try_recv() {
        write_response(output, &response).await?;
    }
    output.flush().await?;
    Ok(())
}

fn handle_line(
    state: &Arc<AppState>,
    line: &str,
    tx: &mpsc::UnboundedSender<CommandResponse>,
    in_flight: &mut JoinSet<()>,
) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            reply(tx, None, Err(AppError::InvalidInput(format!("Malformed JSON line: {}", e))));
            return;
        }
    };
    let seq = value.get("seq").cloned();

    if value.get("event").is_some() {
        let published = serde_json::from_value::<EventEnvelope>(value)
            .map_err(|e| AppError::InvalidEvent(e.to_string()))
            .and_then(|envelope| state.bus.publish_raw(&envelope.event, envelope.payload));
        if let Err(e) = published {
            reply(tx, seq, Err(e));
        }
        return;
    }

    if value.get("command").is_none() {
        reply(tx, seq, Err(AppError::InvalidInput("Line is neither an event nor a command".to_string())));
        return;
    }

    let command = match serde_json::from_value::<Command>(value) {
        Ok(command) => command,
        Err(e) => {
            reply(tx, seq, Err(AppError::InvalidInput(format!("Unrecognized command: {}", e))));
            return;
        }
    };

    let state = Arc::clone(state);
    let tx = tx.clone();
    in_flight.spawn(async move {
        let name = command.name();
        let result = commands::dispatch(&state, command).await;
        if let Err(e) = &result {
            tracing::warn!("Command {} failed: {}", name, e);
        }
        reply(&tx, seq, result);
    });
}

fn reply(tx: &mpsc::UnboundedSender<CommandResponse>, seq: Option<Value>, result: error::Result<Value>) {
    if tx.send(CommandResponse::from_result(seq, result)).is_err() {
        tracing::warn!("Response dropped, output closed");
    }
}

async fn write_response<W>(output: &mut W, response: &CommandResponse) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    output.write_all(line.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}
