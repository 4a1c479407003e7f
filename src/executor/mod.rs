//! Swap execution: build, bundle, poll, fall back.
//!
//! The happy path is a single-transaction bundle with a validator tip,
//! polled until it lands. A failed or timed-out bundle is retried as a
//! plain transaction (tip stripped) through the provider manager.

pub mod jito;
pub mod swap;
pub mod tip;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use solana_sdk::instruction::Instruction;
use solana_sdk::message::{v0, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::system_instruction;
use solana_sdk::transaction::VersionedTransaction;
use spl_associated_token_account::get_associated_token_address;
use thiserror::Error;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::{debug, info, instrument, warn};

use crate::config::BundleConfig;
use crate::dex::pumpfun;
use crate::rpc::RpcManager;
use crate::types::{DexKind, SwapRequest, SwapResult, SwapSide};

use jito::{BundleState, JitoClient};
use swap::BuiltSwap;
use tip::{TipCalculator, Urgency};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("swap path for {0} is not enabled")]
    UnsupportedDex(DexKind),
    #[error("failed to build swap: {0}")]
    Build(String),
    #[error("submission failed: {0}")]
    Submission(String),
}

pub struct SwapExecutor {
    rpc: Arc<RpcManager>,
    jito: JitoClient,
    tips: TipCalculator,
    wallet: Arc<Keypair>,
    config: BundleConfig,
    default_slippage_bps: u16,
    dry_run: bool,
}

impl SwapExecutor {
    pub fn new(
        rpc: Arc<RpcManager>,
        wallet: Arc<Keypair>,
        config: BundleConfig,
        default_slippage_bps: u16,
        dry_run: bool,
    ) -> Self {
        Self {
            rpc,
            jito: JitoClient::new(&config.block_engine_url),
            tips: TipCalculator::new(config.clone()),
            wallet,
            config,
            default_slippage_bps,
            dry_run,
        }
    }

    pub fn wallet_pubkey(&self) -> Pubkey {
        self.wallet.pubkey()
    }

    pub fn tips(&self) -> &TipCalculator {
        &self.tips
    }

    /// Drive a swap to inclusion. Never panics or escapes an error:
    /// every outcome is a `SwapResult`.
    #[instrument(skip(self, request), fields(mint = %request.mint, side = %request.side, dex = %request.dex))]
    pub async fn execute(&self, request: &SwapRequest) -> SwapResult {
        let started = Instant::now();

        if self.dry_run {
            info!("dry run, skipping execution");
            return SwapResult {
                success: true,
                tx_hash: None,
                price: None,
                error: None,
                latency_ms: started.elapsed().as_millis() as u64,
            };
        }

        match self.execute_inner(request).await {
            Ok((signature, price)) => SwapResult {
                success: true,
                tx_hash: Some(signature),
                price: Some(price),
                error: None,
                latency_ms: started.elapsed().as_millis() as u64,
            },
            Err(e) => {
                warn!(error = %e, "swap execution failed");
                SwapResult::failure(e.to_string(), started.elapsed().as_millis() as u64)
            }
        }
    }

    async fn execute_inner(&self, request: &SwapRequest) -> Result<(String, f64)> {
        let built = self.build_swap(request).await?;

        let mut instructions = swap::compute_budget_instructions();
        instructions.extend(built.instructions.iter().cloned());

        match self.submit_bundle(&instructions).await {
            Ok(signature) => return Ok((signature, built.price_sol)),
            Err(e) => {
                warn!(error = %e, "bundle path failed, falling back to direct send");
            }
        }

        let signature = self.submit_direct(&instructions).await?;
        Ok((signature, built.price_sol))
    }

    /// Build the DEX-specific swap. One batched read covers the pool
    /// state and the wallet's token account.
    async fn build_swap(&self, request: &SwapRequest) -> Result<BuiltSwap> {
        if request.dex != DexKind::Pumpfun {
            return Err(ExecutorError::UnsupportedDex(request.dex).into());
        }

        let wallet = self.wallet.pubkey();
        let user_ata = get_associated_token_address(&wallet, &request.mint);
        let reads = self
            .rpc
            .get_multiple_account_infos(&[request.pool, user_ata])
            .await
            .context("pool state read failed")?;

        let curve_blob = reads[0]
            .clone()
            .ok_or_else(|| ExecutorError::Build("bonding curve account missing".to_string()))?;
        let curve = pumpfun::parse_curve(&curve_blob.data)
            .ok_or_else(|| ExecutorError::Build("bonding curve unparsable".to_string()))?;

        let slippage = request.slippage_bps.unwrap_or(self.default_slippage_bps);

        let built = match request.side {
            SwapSide::Buy => swap::build_pumpfun_buy(
                &wallet,
                &request.mint,
                &request.pool,
                &curve,
                request.amount,
                slippage,
                reads[1].is_none(),
            ),
            SwapSide::Sell => swap::build_pumpfun_sell(
                &wallet,
                &request.mint,
                &request.pool,
                &curve,
                request.amount,
                slippage,
            ),
        }
        .map_err(|e| ExecutorError::Build(e.to_string()))?;

        // Pool state is about to change; the cached copy is stale.
        self.rpc.invalidate_account(&request.pool);
        Ok(built)
    }

    async fn sign(&self, instructions: &[Instruction]) -> Result<VersionedTransaction> {
        let blockhash = self
            .rpc
            .get_latest_blockhash()
            .await
            .context("blockhash fetch failed")?;
        let message = v0::Message::try_compile(&self.wallet.pubkey(), instructions, &[], blockhash)
            .context("message compile failed")?;
        VersionedTransaction::try_new(VersionedMessage::V0(message), &[self.wallet.as_ref()])
            .context("signing failed")
    }

    /// Submit as a one-transaction bundle with a tip transfer appended,
    /// then poll until a terminal state or the configured deadline.
    async fn submit_bundle(&self, instructions: &[Instruction]) -> Result<String> {
        let tip_lamports = self.tips.compute_tip(None, &[], Urgency::Medium);
        let tip_recipient = tip::pick_tip_account();

        let mut with_tip = instructions.to_vec();
        with_tip.push(system_instruction::transfer(
            &self.wallet.pubkey(),
            &tip_recipient,
            tip_lamports,
        ));

        let tx = self.sign(&with_tip).await?;
        let signature = tx.signatures[0].to_string();
        let encoded = bs58::encode(bincode::serialize(&tx).context("tx serialize failed")?)
            .into_string();

        let bundle_id = self.jito.send_bundle(vec![encoded]).await?;
        info!(%bundle_id, tip_lamports, "bundle submitted, polling status");

        let deadline = Instant::now() + Duration::from_millis(self.config.bundle_timeout_ms);
        let poll_interval = Duration::from_millis(self.config.bundle_poll_interval_ms.max(100));

        loop {
            tokio::time::sleep(poll_interval).await;

            match self.jito.get_bundle_statuses(&[bundle_id.clone()]).await {
                Ok(statuses) => {
                    let state = statuses
                        .iter()
                        .find(|s| s.bundle_id == bundle_id)
                        .map(|s| s.state)
                        .unwrap_or(BundleState::Unknown);

                    match state {
                        BundleState::Landed => {
                            self.tips.record_success(tip_lamports);
                            info!(%bundle_id, %signature, "bundle landed");
                            return Ok(signature);
                        }
                        BundleState::Failed | BundleState::Dropped => {
                            return Err(anyhow!("bundle {bundle_id} ended {state:?}"));
                        }
                        BundleState::Pending | BundleState::Unknown => {
                            debug!(%bundle_id, ?state, "bundle still in flight");
                        }
                    }
                }
                Err(e) => debug!(error = %e, "bundle status poll failed"),
            }

            if Instant::now() >= deadline {
                return Err(anyhow!("bundle {bundle_id} timed out"));
            }
        }
    }

    /// Direct-RPC fallback: same instructions minus the tip, fresh
    /// blockhash, bounded retries, then confirmation.
    async fn submit_direct(&self, instructions: &[Instruction]) -> Result<String> {
        let tx = self.sign(instructions).await?;

        let strategy = ExponentialBackoff::from_millis(200).take(3);
        let signature = Retry::spawn(strategy, || async {
            self.rpc.send_transaction(&tx, true).await
        })
        .await
        .map_err(|e| ExecutorError::Submission(e.to_string()))?;

        let confirmed = self
            .rpc
            .confirm_transaction(&signature)
            .await
            .unwrap_or(false);
        if !confirmed {
            return Err(ExecutorError::Submission(format!(
                "fallback transaction {signature} not confirmed"
            ))
            .into());
        }

        info!(%signature, "fallback transaction confirmed");
        Ok(signature)
    }
}
