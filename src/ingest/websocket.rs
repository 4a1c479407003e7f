//! WebSocket log-subscription fallback.
//!
//! One `logsSubscribe` per enabled program. Log lines are filtered
//! through a cheap per-DEX "could be a pool creation" check before the
//! full transaction is fetched (bounded by the fetch gate) and decoded.
//! Reconnects re-subscribe every program; the program set is fixed at
//! startup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::rpc_config::{RpcTransactionLogsConfig, RpcTransactionLogsFilter};
use solana_sdk::commitment_config::CommitmentConfig;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::SourceContext;
use crate::types::DexKind;

/// Reconnect backoff bounds.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Cheap textual filter: does this log bundle look like a pool
/// creation on the given DEX?
pub fn matches_creation_logs(dex: DexKind, logs: &[String]) -> bool {
    let needles: &[&str] = match dex {
        DexKind::Pumpfun => &["Instruction: Create", "Instruction: Initialize"],
        DexKind::Raydium => &["initialize2", "Instruction: Initialize", "ray_log"],
        DexKind::Orca => &["InitializePool", "InitializeConfig"],
    };
    logs.iter()
        .any(|line| needles.iter().any(|needle| line.contains(needle)))
}

fn backoff_delay(attempts: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(2u32.saturating_pow(attempts.min(16)));
    exp.min(BACKOFF_MAX)
}

/// Run until shutdown. Returns `Err` only when the endpoint never
/// produced a working subscription on the first attempt; after that,
/// disconnects are retried here with exponential backoff.
pub(crate) async fn run(
    ws_url: &str,
    dexes: &[DexKind],
    ctx: &Arc<SourceContext>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let mut attempts: u32 = 0;
    let mut ever_connected = false;

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let mut connected = false;
        match run_once(ws_url, dexes, ctx, shutdown, &mut connected).await {
            Ok(()) => return Ok(()), // clean shutdown
            Err(e) => {
                ctx.stats.record_error();
                ever_connected |= connected;
                if !ever_connected {
                    // The endpoint never came up: report upward so the
                    // coordinator can fall back to polling.
                    return Err(e);
                }
                if connected {
                    attempts = 0;
                }
                let delay = backoff_delay(attempts);
                warn!(error = %e, ?delay, "websocket disconnected, reconnecting");
                attempts = attempts.saturating_add(1);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => return Ok(()),
                }
            }
        }
    }
}

async fn run_once(
    ws_url: &str,
    dexes: &[DexKind],
    ctx: &Arc<SourceContext>,
    shutdown: &mut watch::Receiver<bool>,
    connected: &mut bool,
) -> Result<()> {
    let client = PubsubClient::new(ws_url)
        .await
        .context("websocket connect failed")?;

    let config = RpcTransactionLogsConfig {
        commitment: Some(CommitmentConfig::processed()),
    };

    // Subscribe every enabled program, tagging each stream with its DEX.
    let mut streams = Vec::new();
    for dex in dexes {
        let (stream, _unsubscribe) = client
            .logs_subscribe(
                RpcTransactionLogsFilter::Mentions(vec![dex.program_id().to_string()]),
                config.clone(),
            )
            .await
            .with_context(|| format!("logsSubscribe failed for {dex}"))?;
        let dex = *dex;
        streams.push(stream.map(move |response| (dex, response)));
    }
    info!(programs = dexes.len(), "websocket subscriptions established");
    *connected = true;

    let mut merged = futures::stream::select_all(streams);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
            }
            message = merged.next() => {
                match message {
                    None => return Err(anyhow!("websocket stream ended")),
                    Some((dex, response)) => {
                        ctx.stats.record_event();
                        handle_logs(ctx, dex, response.value.signature, response.value.logs).await;
                    }
                }
            }
        }
    }
}

async fn handle_logs(
    ctx: &Arc<SourceContext>,
    dex: DexKind,
    signature: String,
    logs: Vec<String>,
) {
    if !matches_creation_logs(dex, &logs) {
        return;
    }
    if !ctx.first_sighting(&signature).await {
        debug!(%signature, "duplicate signature, skipping");
        return;
    }

    // Bounded fetches: at the ceiling the candidate is dropped.
    let permit = match ctx.gate.try_enter() {
        Some(permit) => permit,
        None => {
            debug!(%signature, "fetch ceiling reached, dropping candidate");
            return;
        }
    };

    let ctx = ctx.clone();
    tokio::spawn(async move {
        ctx.fetch_and_decode(signature, permit).await;
    });
}
