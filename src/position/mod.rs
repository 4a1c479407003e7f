//! Position lifecycle and exit triggering.
//!
//! The manager owns the positions map outright; every mutation goes
//! through its methods and state changes are announced on an event
//! channel. A timer refreshes prices in one batched read per tick and
//! fires take-profit / stop-loss triggers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use solana_sdk::pubkey::Pubkey;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::config::TradingConfig;
use crate::dex::pumpfun;
use crate::rpc::RpcManager;
use crate::types::{unix_now, DexKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Migrated,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Migrated => "migrated",
            ExitReason::Manual => "manual",
        }
    }
}

/// One tracked holding. Prices are SOL per whole token.
#[derive(Debug, Clone)]
pub struct Position {
    pub id: u64,
    pub mint: Pubkey,
    pub pool: Pubkey,
    pub dex: DexKind,
    pub entry_price: f64,
    pub entry_time: u64,
    /// Token base units held.
    pub amount: u64,
    pub sol_spent: f64,
    pub current_price: f64,
    pub pnl_percent: f64,
    pub tp_price: f64,
    pub sl_price: f64,
    pub status: PositionStatus,
    pub entry_tx: String,
    pub exit_tx: Option<String>,
    pub exit_reason: Option<ExitReason>,
}

impl Position {
    /// Stable textual form for logs.
    pub fn label(&self) -> String {
        format!("pos-{}", self.id)
    }
}

/// State-change announcements. Consumers pull from the channel; nobody
/// pokes the map from outside.
#[derive(Debug, Clone)]
pub enum PositionEvent {
    Opened {
        id: u64,
        mint: Pubkey,
        entry_price: f64,
        sol_spent: f64,
    },
    ExitTriggered {
        id: u64,
        mint: Pubkey,
        pool: Pubkey,
        dex: DexKind,
        amount: u64,
        reason: ExitReason,
        price: f64,
    },
    Closed {
        id: u64,
        mint: Pubkey,
        reason: ExitReason,
        pnl_percent: f64,
    },
}

pub struct PositionManager {
    positions: Mutex<BTreeMap<u64, Position>>,
    next_id: AtomicU64,
    config: TradingConfig,
    rpc: Arc<RpcManager>,
    events: mpsc::Sender<PositionEvent>,
}

impl PositionManager {
    pub fn new(
        config: TradingConfig,
        rpc: Arc<RpcManager>,
        events: mpsc::Sender<PositionEvent>,
    ) -> Self {
        Self {
            positions: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            config,
            rpc,
            events,
        }
    }

    /// Open a position after a landed buy. Rejects when either the
    /// concurrent-position or total-exposure cap would be exceeded.
    #[instrument(skip(self), fields(mint = %mint))]
    pub async fn open_position(
        &self,
        mint: Pubkey,
        pool: Pubkey,
        dex: DexKind,
        entry_price: f64,
        sol_spent: f64,
        token_amount: u64,
        entry_tx: String,
    ) -> Result<Position> {
        let mut positions = self.positions.lock().await;

        let open: Vec<&Position> = positions
            .values()
            .filter(|p| p.status != PositionStatus::Closed)
            .collect();
        if open.len() >= self.config.max_concurrent_positions {
            bail!(
                "position limit reached ({}/{})",
                open.len(),
                self.config.max_concurrent_positions
            );
        }
        let committed: f64 = open.iter().map(|p| p.sol_spent).sum();
        if committed + sol_spent > self.config.max_position_size_sol {
            bail!(
                "position size cap exceeded ({:.3} + {:.3} > {:.3} SOL)",
                committed,
                sol_spent,
                self.config.max_position_size_sol
            );
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let position = Position {
            id,
            mint,
            pool,
            dex,
            entry_price,
            entry_time: unix_now(),
            amount: token_amount,
            sol_spent,
            current_price: entry_price,
            pnl_percent: 0.0,
            tp_price: entry_price * (1.0 + self.config.take_profit_percent / 100.0),
            sl_price: entry_price * (1.0 - self.config.stop_loss_percent / 100.0),
            status: PositionStatus::Open,
            entry_tx,
            exit_tx: None,
            exit_reason: None,
        };

        info!(
            position = %position.label(),
            entry_price,
            tp = position.tp_price,
            sl = position.sl_price,
            "position opened"
        );
        positions.insert(id, position.clone());
        drop(positions);

        let _ = self
            .events
            .send(PositionEvent::Opened {
                id,
                mint,
                entry_price,
                sol_spent,
            })
            .await;

        Ok(position)
    }

    /// Finalize a position after a confirmed (or unnecessary) sell.
    #[instrument(skip(self))]
    pub async fn close_position(
        &self,
        id: u64,
        reason: ExitReason,
        exit_tx: Option<String>,
        exit_price: Option<f64>,
    ) -> Result<Position> {
        let closed = {
            let mut positions = self.positions.lock().await;
            let position = match positions.get_mut(&id) {
                Some(p) => p,
                None => bail!("unknown position {id}"),
            };

            position.status = PositionStatus::Closed;
            position.exit_tx = exit_tx;
            position.exit_reason = Some(reason);
            if let Some(price) = exit_price {
                position.current_price = price;
                if position.entry_price > 0.0 {
                    position.pnl_percent =
                        (price - position.entry_price) / position.entry_price * 100.0;
                }
            }
            position.clone()
        };

        info!(
            position = %closed.label(),
            reason = reason.as_str(),
            pnl = closed.pnl_percent,
            "position closed"
        );
        let _ = self
            .events
            .send(PositionEvent::Closed {
                id,
                mint: closed.mint,
                reason,
                pnl_percent: closed.pnl_percent,
            })
            .await;

        Ok(closed)
    }

    /// Revert a Closing position to Open after a failed sell so the
    /// next tick re-fires its trigger.
    pub async fn reopen(&self, id: u64) -> Result<()> {
        let mut positions = self.positions.lock().await;
        match positions.get_mut(&id) {
            Some(position) if position.status == PositionStatus::Closing => {
                position.status = PositionStatus::Open;
                warn!(position = %position.label(), "sell failed, position reopened");
                Ok(())
            }
            Some(position) => bail!(
                "position {} is {:?}, not Closing",
                position.label(),
                position.status
            ),
            None => bail!("unknown position {id}"),
        }
    }

    /// Whether a non-closed position exists for the mint.
    pub async fn has_position_for(&self, mint: &Pubkey) -> bool {
        self.positions
            .lock()
            .await
            .values()
            .any(|p| p.mint == *mint && p.status != PositionStatus::Closed)
    }

    pub async fn get(&self, id: u64) -> Option<Position> {
        self.positions.lock().await.get(&id).cloned()
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        self.positions
            .lock()
            .await
            .values()
            .filter(|p| p.status != PositionStatus::Closed)
            .cloned()
            .collect()
    }

    pub async fn total_open_sol(&self) -> f64 {
        self.positions
            .lock()
            .await
            .values()
            .filter(|p| p.status != PositionStatus::Closed)
            .map(|p| p.sol_spent)
            .sum()
    }

    /// Force an exit trigger outside the price path (e.g. the pool
    /// migrated away from its curve). No-op without an open position.
    pub async fn trigger_exit(&self, mint: &Pubkey, reason: ExitReason) {
        let trigger = {
            let mut positions = self.positions.lock().await;
            positions
                .values_mut()
                .find(|p| p.mint == *mint && p.status == PositionStatus::Open)
                .map(|position| {
                    position.status = PositionStatus::Closing;
                    PositionEvent::ExitTriggered {
                        id: position.id,
                        mint: position.mint,
                        pool: position.pool,
                        dex: position.dex,
                        amount: position.amount,
                        reason,
                        price: position.current_price,
                    }
                })
        };

        if let Some(trigger) = trigger {
            info!(mint = %mint, reason = reason.as_str(), "forced exit trigger");
            let _ = self.events.send(trigger).await;
        }
    }

    /// Price-refresh loop: one batched read per tick for all open
    /// pump.fun positions, then exit evaluation.
    pub async fn run_refresh_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.position_refresh_ms.max(50)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("position refresh loop stopped");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    self.refresh_tick().await;
                }
            }
        }
    }

    /// One refresh pass. Public for deterministic tests.
    pub async fn refresh_tick(&self) {
        let open = self.open_positions().await;
        if open.is_empty() {
            return;
        }

        // Partition by DEX; only pump.fun has a batched price source.
        let pumpfun_pools: Vec<Pubkey> = open
            .iter()
            .filter(|p| p.dex == DexKind::Pumpfun && p.status == PositionStatus::Open)
            .map(|p| p.pool)
            .collect();
        if pumpfun_pools.is_empty() {
            return;
        }

        // The cache would serve stale prices between ticks.
        for pool in &pumpfun_pools {
            self.rpc.invalidate_account(pool);
        }

        let blobs = match self.rpc.get_multiple_account_infos(&pumpfun_pools).await {
            Ok(blobs) => blobs,
            Err(e) => {
                debug!(error = %e, "price refresh read failed");
                return;
            }
        };

        let mut triggers = Vec::new();
        {
            let mut positions = self.positions.lock().await;
            for (pool, blob) in pumpfun_pools.iter().zip(blobs) {
                let Some(blob) = blob else { continue };
                let Some(curve) = pumpfun::parse_curve(&blob.data) else {
                    continue;
                };
                let price = pumpfun::spot_price_sol(&curve);
                if price <= 0.0 {
                    continue;
                }

                for position in positions.values_mut() {
                    if position.pool != *pool || position.status != PositionStatus::Open {
                        continue;
                    }
                    position.current_price = price;
                    if position.entry_price > 0.0 {
                        position.pnl_percent =
                            (price - position.entry_price) / position.entry_price * 100.0;
                    }

                    let reason = if price >= position.tp_price {
                        Some(ExitReason::TakeProfit)
                    } else if price <= position.sl_price {
                        Some(ExitReason::StopLoss)
                    } else {
                        None
                    };

                    if let Some(reason) = reason {
                        position.status = PositionStatus::Closing;
                        triggers.push(PositionEvent::ExitTriggered {
                            id: position.id,
                            mint: position.mint,
                            pool: position.pool,
                            dex: position.dex,
                            amount: position.amount,
                            reason,
                            price,
                        });
                    }
                }
            }
        }

        for trigger in triggers {
            if let PositionEvent::ExitTriggered { id, reason, price, .. } = &trigger {
                info!(position = id, reason = reason.as_str(), price, "exit trigger fired");
            }
            let _ = self.events.send(trigger).await;
        }
    }
}
