//! Pipeline wiring and stage gating.
//!
//! All channels are created here at construction time: ingestion feeds
//! pool events in, the analyzer and executor are called in sequence,
//! the position manager reports exit triggers back. Every stage's
//! latency lands in a `perf`-target log line, and every decision is
//! log-and-drop: nothing below startup errors stops the process.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use spl_associated_token_account::get_associated_token_address;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dex::DecoderRegistry;
use crate::executor::SwapExecutor;
use crate::ingest::IngestCoordinator;
use crate::metrics::{counter, Metrics};
use crate::position::{ExitReason, PositionEvent, PositionManager};
use crate::risk::{types::is_critical_failure, RiskAnalysis, RiskAnalyzer, RiskRequest};
use crate::rpc::RpcManager;
use crate::sweep;
use crate::types::{DexKind, PoolEvent, SwapRequest, SwapSide, LAMPORTS_PER_SOL};
use crate::wallet;

const POOL_EVENT_CAPACITY: usize = 512;
const POSITION_EVENT_CAPACITY: usize = 128;

pub struct Orchestrator {
    config: Config,
    metrics: Arc<Metrics>,
    rpc: Arc<RpcManager>,
    analyzer: Arc<RiskAnalyzer>,
    executor: Arc<SwapExecutor>,
    positions: Arc<PositionManager>,
    ingest: Arc<IngestCoordinator>,
    keypair: Arc<Keypair>,
    wallet_pubkey: Pubkey,
    pool_events: Mutex<Option<mpsc::Receiver<PoolEvent>>>,
    position_events: Mutex<Option<mpsc::Receiver<PositionEvent>>>,
    shutdown: watch::Sender<bool>,
}

impl Orchestrator {
    /// Construct the full pipeline. Shared infrastructure (provider
    /// manager, metrics) is built once here and handed to components
    /// by reference; nothing is process-global.
    pub fn new(config: Config) -> Result<Self> {
        let keypair = Arc::new(
            wallet::keypair_from_base58(&config.private_key).context("PRIVATE_KEY invalid")?,
        );
        let wallet_pubkey = keypair.pubkey();

        let metrics = Arc::new(Metrics::new());
        let rpc = Arc::new(
            RpcManager::from_config(&config.providers, &config.rpc)
                .context("provider manager construction failed")?,
        );
        let registry = Arc::new(DecoderRegistry::new(&config.enabled_dexes));

        let (pool_tx, pool_rx) = mpsc::channel(POOL_EVENT_CAPACITY);
        let (position_tx, position_rx) = mpsc::channel(POSITION_EVENT_CAPACITY);

        let analyzer = Arc::new(RiskAnalyzer::new(
            rpc.clone(),
            config.risk.clone(),
            wallet_pubkey,
        ));
        let executor = Arc::new(SwapExecutor::new(
            rpc.clone(),
            keypair.clone(),
            config.bundle.clone(),
            config.trading.max_slippage_bps,
            config.dry_run,
        ));
        let positions = Arc::new(PositionManager::new(
            config.trading.clone(),
            rpc.clone(),
            position_tx,
        ));
        let ingest = Arc::new(IngestCoordinator::new(
            &config,
            rpc.clone(),
            registry,
            pool_tx,
        ));

        let (shutdown, _) = watch::channel(false);

        info!(
            wallet = %wallet_pubkey,
            providers = config.providers.len(),
            dexes = ?config.enabled_dexes,
            dry_run = config.dry_run,
            "pipeline constructed"
        );

        Ok(Self {
            config,
            metrics,
            rpc,
            analyzer,
            executor,
            positions,
            ingest,
            keypair,
            wallet_pubkey,
            pool_events: Mutex::new(Some(pool_rx)),
            position_events: Mutex::new(Some(position_rx)),
            shutdown,
        })
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn positions(&self) -> Arc<PositionManager> {
        self.positions.clone()
    }

    pub fn analyzer(&self) -> Arc<RiskAnalyzer> {
        self.analyzer.clone()
    }

    /// Signal every loop to stop: ingestion streams, the position
    /// refresh timer and the sweep timer all watch this channel.
    pub fn stop(&self) {
        info!("shutdown requested");
        let _ = self.shutdown.send(true);
    }

    /// Run until `stop()`. Spawns the ingestion coordinator, position
    /// refresh loop and (when enabled) the sweep loop, then services
    /// both event channels.
    pub async fn run(&self) -> Result<()> {
        let mut pool_rx = self
            .pool_events
            .lock()
            .await
            .take()
            .context("orchestrator already running")?;
        let mut position_rx = self
            .position_events
            .lock()
            .await
            .take()
            .context("orchestrator already running")?;

        let ingest_handle = {
            let ingest = self.ingest.clone();
            let shutdown = self.shutdown.subscribe();
            tokio::spawn(async move { ingest.run(shutdown).await })
        };
        let refresh_handle = {
            let positions = self.positions.clone();
            let shutdown = self.shutdown.subscribe();
            tokio::spawn(async move { positions.run_refresh_loop(shutdown).await })
        };
        let sweep_handle = if self.config.sweep.enabled {
            let rpc = self.rpc.clone();
            let metrics = self.metrics.clone();
            let sweep_config = self.config.sweep.clone();
            let keypair = self.keypair.clone();
            let shutdown = self.shutdown.subscribe();
            Some(tokio::spawn(async move {
                sweep::run_loop(rpc, keypair, sweep_config, metrics, shutdown).await
            }))
        } else {
            None
        };

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                event = pool_rx.recv() => match event {
                    Some(event) => self.handle_pool_event(event).await,
                    None => break,
                },
                event = position_rx.recv() => match event {
                    Some(event) => self.handle_position_event(event).await,
                    None => break,
                },
            }
        }

        let _ = ingest_handle.await;
        let _ = refresh_handle.await;
        if let Some(handle) = sweep_handle {
            let _ = handle.await;
        }

        let snapshot = self.metrics.snapshot();
        info!(?snapshot, "pipeline stopped");
        Ok(())
    }

    async fn handle_pool_event(&self, event: PoolEvent) {
        self.metrics.increment(counter::EVENTS_RECEIVED);

        match &event {
            PoolEvent::NewPool { .. } => {
                self.metrics.increment(counter::POOLS_DETECTED);
                self.process_new_pool(&event).await;
            }
            PoolEvent::Migration {
                mint, source_dex, ..
            } => {
                debug!(mint = %mint, source = %source_dex, "pool migration observed");
                // A completed curve takes no further trades; get out
                // through whatever liquidity the sell path still finds.
                if self.positions.has_position_for(mint).await {
                    self.positions
                        .trigger_exit(mint, ExitReason::Migrated)
                        .await;
                }
            }
            PoolEvent::LiquidityAdded { pool, .. } => {
                debug!(pool = %pool, "liquidity addition observed");
            }
        }
    }

    async fn process_new_pool(&self, event: &PoolEvent) {
        let started = Instant::now();
        let Some(request) = RiskRequest::from_event(event) else {
            return;
        };
        let mint = request.mint;
        let dex = request.dex;

        if self.positions.has_position_for(&mint).await {
            log_pipeline(&mint, dex, "skipped_existing_position", started, None, None);
            return;
        }

        let analyze_started = Instant::now();
        let analysis = self.analyzer.analyze(&request).await;
        let analyze_ms = analyze_started.elapsed().as_millis() as u64;
        self.metrics.increment(counter::ANALYSES_RUN);

        if !analysis.passed || analysis.score < self.config.risk.score_threshold {
            log_pipeline(
                &mint,
                dex,
                rejection_outcome(&analysis, self.config.risk.score_threshold),
                started,
                Some(analyze_ms),
                None,
            );
            return;
        }
        self.metrics.increment(counter::ANALYSES_PASSED);

        let buy_lamports =
            (self.config.trading.buy_amount_sol * LAMPORTS_PER_SOL as f64) as u64;
        let swap = SwapRequest {
            dex,
            mint,
            pool: request.pool,
            side: SwapSide::Buy,
            amount: buy_lamports,
            slippage_bps: None,
        };

        let execute_started = Instant::now();
        self.metrics.increment(counter::BUYS_ATTEMPTED);
        let result = self.executor.execute(&swap).await;
        let execute_ms = execute_started.elapsed().as_millis() as u64;

        if !result.success {
            warn!(mint = %mint, error = ?result.error, "buy failed");
            log_pipeline(&mint, dex, "buy_failed", started, Some(analyze_ms), Some(execute_ms));
            return;
        }
        self.metrics.increment(counter::BUYS_LANDED);

        let entry_price = result.price.unwrap_or(0.0);
        let token_amount = estimate_token_amount(self.config.trading.buy_amount_sol, entry_price);
        let entry_tx = result.tx_hash.unwrap_or_default();

        match self
            .positions
            .open_position(
                mint,
                request.pool,
                dex,
                entry_price,
                self.config.trading.buy_amount_sol,
                token_amount,
                entry_tx,
            )
            .await
        {
            Ok(position) => {
                log_pipeline(&mint, dex, "bought", started, Some(analyze_ms), Some(execute_ms));
                info!(position = %position.label(), score = analysis.score, "position opened from pipeline");
            }
            Err(e) => {
                // Caps raced against another fill; the buy stands but is
                // not tracked twice.
                warn!(mint = %mint, error = %e, "position could not be opened");
                log_pipeline(&mint, dex, "position_rejected", started, Some(analyze_ms), Some(execute_ms));
            }
        }
    }

    async fn handle_position_event(&self, event: PositionEvent) {
        match event {
            PositionEvent::Opened { id, mint, .. } => {
                debug!(position = id, mint = %mint, "position opened event");
            }
            PositionEvent::Closed {
                id, pnl_percent, ..
            } => {
                info!(position = id, pnl = pnl_percent, "position closed event");
            }
            PositionEvent::ExitTriggered {
                id,
                mint,
                pool,
                dex,
                amount,
                reason,
                price,
            } => {
                self.process_exit(id, mint, pool, dex, amount, reason, price)
                    .await;
            }
        }
    }

    async fn process_exit(
        &self,
        id: u64,
        mint: Pubkey,
        pool: Pubkey,
        dex: DexKind,
        tracked_amount: u64,
        reason: ExitReason,
        trigger_price: f64,
    ) {
        let started = Instant::now();

        // The tracked amount is an estimate; the chain balance decides.
        let balance = self
            .wallet_token_balance(&mint)
            .await
            .unwrap_or(tracked_amount);

        if balance == 0 {
            debug!(position = id, "no balance on chain, closing without sell");
            if let Err(e) = self
                .positions
                .close_position(id, reason, None, Some(trigger_price))
                .await
            {
                warn!(position = id, error = %e, "close failed");
            }
            log_pipeline(&mint, dex, "closed_zero_balance", started, None, None);
            return;
        }

        let swap = SwapRequest {
            dex,
            mint,
            pool,
            side: SwapSide::Sell,
            amount: balance,
            slippage_bps: None,
        };

        self.metrics.increment(counter::SELLS_ATTEMPTED);
        let result = self.executor.execute(&swap).await;
        let execute_ms = started.elapsed().as_millis() as u64;

        if result.success {
            self.metrics.increment(counter::SELLS_LANDED);
            let exit_price = result.price.unwrap_or(trigger_price);
            if let Err(e) = self
                .positions
                .close_position(id, reason, result.tx_hash, Some(exit_price))
                .await
            {
                warn!(position = id, error = %e, "close failed after sell");
            }
            log_pipeline(&mint, dex, "sold", started, None, Some(execute_ms));
        } else {
            warn!(position = id, error = ?result.error, "sell failed, reverting to open");
            if let Err(e) = self.positions.reopen(id).await {
                warn!(position = id, error = %e, "reopen failed");
            }
            log_pipeline(&mint, dex, "sell_failed", started, None, Some(execute_ms));
        }
    }

    /// Fresh read of the wallet's token balance for a mint.
    async fn wallet_token_balance(&self, mint: &Pubkey) -> Option<u64> {
        let ata = get_associated_token_address(&self.wallet_pubkey, mint);
        self.rpc.invalidate_account(&ata);
        match self.rpc.get_account_info(&ata).await {
            Ok(Some(blob)) => parse_token_account_amount(&blob.data),
            Ok(None) => Some(0),
            Err(e) => {
                warn!(error = %e, "token balance read failed");
                None
            }
        }
    }
}

/// SPL token account balance field.
fn parse_token_account_amount(data: &[u8]) -> Option<u64> {
    if data.len() < 72 {
        return None;
    }
    Some(u64::from_le_bytes(data[64..72].try_into().ok()?))
}

/// Token base units (6 decimals) a buy should have produced.
fn estimate_token_amount(sol_spent: f64, price_sol_per_token: f64) -> u64 {
    if price_sol_per_token <= 0.0 {
        return 0;
    }
    ((sol_spent / price_sol_per_token) * 1e6) as u64
}

/// Outcome tag for a rejected candidate.
fn rejection_outcome(analysis: &RiskAnalysis, threshold: u8) -> &'static str {
    if analysis.factors.iter().any(is_critical_failure) {
        "rejected_security_failed"
    } else if !analysis.passed {
        "rejected_risk_failed"
    } else if analysis.score < threshold {
        "rejected_below_threshold"
    } else {
        "rejected"
    }
}

fn log_pipeline(
    mint: &Pubkey,
    dex: DexKind,
    outcome: &str,
    started: Instant,
    analyze_ms: Option<u64>,
    execute_ms: Option<u64>,
) {
    info!(
        target: "perf",
        stage = "pipeline",
        mint = %mint,
        dex = %dex,
        outcome,
        analyze_ms,
        execute_ms,
        total_ms = started.elapsed().as_millis() as u64,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::types::{build_analysis, RiskFactor, FACTOR_CRITICAL_EXTENSIONS, FACTOR_LIQUIDITY, FACTOR_MINT_AUTHORITY};

    #[test]
    fn test_estimate_token_amount() {
        // 0.1 SOL at 1e-4 SOL/token = 1000 tokens = 1e9 base units.
        assert_eq!(estimate_token_amount(0.1, 0.0001), 1_000_000_000);
        assert_eq!(estimate_token_amount(0.1, 0.0), 0);
    }

    #[test]
    fn test_parse_token_account_amount() {
        let mut data = vec![0u8; 165];
        data[64..72].copy_from_slice(&42u64.to_le_bytes());
        assert_eq!(parse_token_account_amount(&data), Some(42));
        assert_eq!(parse_token_account_amount(&[0u8; 10]), None);
    }

    #[test]
    fn test_rejection_outcomes() {
        let critical = build_analysis(
            vec![RiskFactor::failed(FACTOR_CRITICAL_EXTENSIONS, -30, 0, "")],
            Vec::new(),
        );
        assert_eq!(rejection_outcome(&critical, 60), "rejected_security_failed");

        let weak = build_analysis(
            vec![RiskFactor::passed(FACTOR_LIQUIDITY, 2, 10, "")],
            Vec::new(),
        );
        assert_eq!(rejection_outcome(&weak, 60), "rejected_risk_failed");

        let mid = build_analysis(
            vec![
                RiskFactor::passed(FACTOR_MINT_AUTHORITY, 20, 20, ""),
                RiskFactor::passed(FACTOR_LIQUIDITY, 6, 10, ""),
            ],
            Vec::new(),
        );
        // Passed overall but short of a high threshold.
        assert!(mid.passed);
        assert_eq!(rejection_outcome(&mid, 95), "rejected_below_threshold");
    }
}
