//! Periodic surplus sweep to cold storage.
//!
//! A plain timer loop atop the provider manager: read the hot wallet's
//! balance, keep a working float, transfer the rest to the configured
//! cold address. Never bundles, never retries within a tick.

use std::sync::Arc;

use anyhow::{Context, Result};
use solana_sdk::message::{v0, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::system_instruction;
use solana_sdk::transaction::VersionedTransaction;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::SweepConfig;
use crate::metrics::{counter, Metrics};
use crate::rpc::RpcManager;
use crate::types::LAMPORTS_PER_SOL;

/// Transfers below this are not worth the fee.
const MIN_SWEEP_LAMPORTS: u64 = 10_000_000;

pub async fn run_loop(
    rpc: Arc<RpcManager>,
    keypair: Arc<Keypair>,
    config: SweepConfig,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let Some(cold_wallet) = config.cold_wallet else {
        warn!("sweep enabled without a cold wallet, loop disabled");
        return;
    };
    let keep_lamports = (config.keep_sol * LAMPORTS_PER_SOL as f64) as u64;
    let mut ticker =
        tokio::time::interval(Duration::from_millis(config.interval_ms.max(1_000)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(cold = %cold_wallet, keep_sol = config.keep_sol, "sweep loop running");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("sweep loop stopped");
                    return;
                }
            }
            _ = ticker.tick() => {
                sweep_once(&rpc, &keypair, &cold_wallet, keep_lamports, &metrics).await;
            }
        }
    }
}

async fn sweep_once(
    rpc: &Arc<RpcManager>,
    keypair: &Arc<Keypair>,
    cold_wallet: &Pubkey,
    keep_lamports: u64,
    metrics: &Arc<Metrics>,
) {
    let wallet = keypair.pubkey();
    let balance = match rpc.get_balance(&wallet).await {
        Ok(balance) => balance,
        Err(e) => {
            debug!(error = %e, "sweep balance read failed");
            return;
        }
    };

    let surplus = balance.saturating_sub(keep_lamports);
    if surplus < MIN_SWEEP_LAMPORTS {
        debug!(balance, surplus, "nothing worth sweeping");
        return;
    }

    info!(
        surplus_sol = surplus as f64 / LAMPORTS_PER_SOL as f64,
        "sweeping surplus to cold storage"
    );

    match transfer(rpc, keypair, cold_wallet, surplus).await {
        Ok(signature) => {
            metrics.increment(counter::SWEEPS_COMPLETED);
            info!(%signature, "sweep complete");
        }
        Err(e) => warn!(error = %e, "sweep failed"),
    }
}

async fn transfer(
    rpc: &Arc<RpcManager>,
    keypair: &Arc<Keypair>,
    to: &Pubkey,
    lamports: u64,
) -> Result<String> {
    let from = keypair.pubkey();
    let instruction = system_instruction::transfer(&from, to, lamports);
    let blockhash = rpc
        .get_latest_blockhash()
        .await
        .context("blockhash fetch failed")?;
    let message = v0::Message::try_compile(&from, &[instruction], &[], blockhash)
        .context("message compile failed")?;
    let tx = VersionedTransaction::try_new(VersionedMessage::V0(message), &[keypair.as_ref()])
        .context("signing failed")?;

    let signature = rpc
        .send_transaction(&tx, false)
        .await
        .context("sweep send failed")?;
    Ok(signature)
}
