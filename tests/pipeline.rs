//! End-to-end pipeline scenarios over the in-memory chain: the same
//! analyze → buy → track → trigger → sell sequence the orchestrator
//! drives, with every chain interaction scripted.

mod common;

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use tokio::sync::mpsc;

use common::*;
use solsniper::config::{RiskConfig, TradingConfig};
use solsniper::executor::SwapExecutor;
use solsniper::ingest::SignatureSet;
use solsniper::position::{ExitReason, PositionEvent, PositionManager, PositionStatus};
use solsniper::risk::{RiskAnalyzer, RiskRequest};
use solsniper::rpc::TokenAccountBalance;
use solsniper::types::{wsol_mint, DexKind, SwapRequest, SwapSide, LAMPORTS_PER_SOL};

/// Token-2022 `MintCloseAuthority` extension id.
const EXT_MINT_CLOSE_AUTHORITY: u16 = 3;

struct Pipeline {
    chain: Arc<MockChain>,
    analyzer: RiskAnalyzer,
    executor: SwapExecutor,
    positions: PositionManager,
    position_events: mpsc::Receiver<PositionEvent>,
    mint: Pubkey,
    pool: Pubkey,
}

/// A candidate that should sail through analysis: authorities revoked,
/// 12.5 SOL on the curve, 8% top holder, clean simulation.
fn clean_pipeline() -> Pipeline {
    let chain = MockChain::new();
    let mint = Pubkey::new_unique();
    let pool = Pubkey::new_unique();
    let wallet = Arc::new(Keypair::new());

    chain.set_account(mint, mint_blob(None, None));
    let mut curve = fresh_curve();
    curve.real_sol_reserves = 12 * LAMPORTS_PER_SOL + LAMPORTS_PER_SOL / 2;
    chain.set_curve(pool, &curve);

    *chain.supply.lock().unwrap() = 1_000_000_000_000_000;
    *chain.largest.lock().unwrap() = (0..10)
        .map(|i| TokenAccountBalance {
            address: Pubkey::new_unique(),
            amount: 80_000_000_000_000 / 10 - i as u64,
        })
        .collect();

    let rpc = single_manager(chain.clone());
    let analyzer = RiskAnalyzer::new(rpc.clone(), RiskConfig::default(), wallet.pubkey());
    let executor = SwapExecutor::new(
        rpc.clone(),
        wallet.clone(),
        offline_bundle_config(),
        500,
        false,
    );

    let (position_tx, position_events) = mpsc::channel(64);
    let positions = PositionManager::new(
        TradingConfig {
            buy_amount_sol: 0.1,
            take_profit_percent: 50.0,
            stop_loss_percent: 20.0,
            max_position_size_sol: 1.0,
            max_concurrent_positions: 3,
            ..TradingConfig::default()
        },
        rpc,
        position_tx,
    );

    Pipeline {
        chain,
        analyzer,
        executor,
        positions,
        position_events,
        mint,
        pool,
    }
}

fn request_for(p: &Pipeline) -> RiskRequest {
    RiskRequest {
        mint: p.mint,
        pool: p.pool,
        dex: DexKind::Pumpfun,
        base_mint: p.mint,
        quote_mint: wsol_mint(),
        base_vault: p.pool,
        quote_vault: p.pool,
        lp_mint: None,
        creator: None,
    }
}

async fn next_event(p: &mut Pipeline) -> PositionEvent {
    tokio::time::timeout(std::time::Duration::from_secs(2), p.position_events.recv())
        .await
        .expect("event timeout")
        .expect("channel closed")
}

/// Scenario: a Token-2022 mint with a sell-denying extension is turned
/// away before any buy path runs, and the position map stays empty.
#[tokio::test]
async fn critical_extension_rejects_candidate() {
    let p = clean_pipeline();
    p.chain
        .set_account(p.mint, token_2022_mint_blob(EXT_MINT_CLOSE_AUTHORITY, 64));

    let request = request_for(&p);
    let viability = p.analyzer.quick_check(&request).await;
    assert!(!viability.viable);
    assert!(viability.reason.unwrap().contains("critical"));

    let analysis = p.analyzer.analyze(&request).await;
    assert!(!analysis.passed);

    // The orchestrator gates on `passed`; no buy, no position.
    assert!(p.positions.open_positions().await.is_empty());
    assert_eq!(p.chain.sends.lock().unwrap().len(), 0);
}

/// Scenario: happy-path buy. Analysis passes with a high score, the
/// executor lands via the fallback path, and the opened position
/// carries the tp/sl derived from the entry price.
#[tokio::test]
async fn happy_path_buy_opens_position() {
    let mut p = clean_pipeline();
    let request = request_for(&p);

    let analysis = p.analyzer.analyze(&request).await;
    assert!(analysis.passed, "factors: {:?}", analysis.factors);
    assert!(analysis.score >= 70);

    let result = p
        .executor
        .execute(&SwapRequest {
            dex: DexKind::Pumpfun,
            mint: p.mint,
            pool: p.pool,
            side: SwapSide::Buy,
            amount: LAMPORTS_PER_SOL / 10,
            slippage_bps: None,
        })
        .await;
    assert!(result.success, "error: {:?}", result.error);
    let entry_price = result.price.unwrap();
    assert!(entry_price > 0.0);

    let position = p
        .positions
        .open_position(
            p.mint,
            p.pool,
            DexKind::Pumpfun,
            entry_price,
            0.1,
            1_000_000_000,
            result.tx_hash.unwrap(),
        )
        .await
        .unwrap();

    assert!((position.tp_price - entry_price * 1.5).abs() < entry_price * 1e-9);
    assert!((position.sl_price - entry_price * 0.8).abs() < entry_price * 1e-9);
    assert!((position.sol_spent - 0.1).abs() < 1e-12);
    assert!(matches!(next_event(&mut p).await, PositionEvent::Opened { .. }));
    assert!(p.positions.has_position_for(&p.mint).await);
}

/// Scenario: take-profit trigger. A later refresh reads a curve at the
/// tp price, the position transitions to Closing, the sell lands and
/// the close realizes roughly the configured take-profit.
#[tokio::test]
async fn take_profit_round_trip() {
    let mut p = clean_pipeline();

    // Open at a known entry price.
    let entry_price = 0.0001;
    p.chain.set_curve(p.pool, &curve_at_price(entry_price));
    let position = p
        .positions
        .open_position(
            p.mint,
            p.pool,
            DexKind::Pumpfun,
            entry_price,
            0.1,
            1_000_000_000,
            "entry-tx".to_string(),
        )
        .await
        .unwrap();
    let _ = next_event(&mut p).await; // Opened

    // The batched refresh reads a curve sitting exactly at tp.
    p.chain.set_curve(p.pool, &curve_at_price(entry_price * 1.5));
    p.positions.refresh_tick().await;

    let trigger = next_event(&mut p).await;
    let (id, reason, price) = match trigger {
        PositionEvent::ExitTriggered {
            id, reason, price, ..
        } => (id, reason, price),
        other => panic!("unexpected event {other:?}"),
    };
    assert_eq!(id, position.id);
    assert_eq!(reason, ExitReason::TakeProfit);
    assert_eq!(
        p.positions.get(id).await.unwrap().status,
        PositionStatus::Closing
    );

    // Sell through the executor (fallback path) and close.
    let sell = p
        .executor
        .execute(&SwapRequest {
            dex: DexKind::Pumpfun,
            mint: p.mint,
            pool: p.pool,
            side: SwapSide::Sell,
            amount: 1_000_000_000,
            slippage_bps: None,
        })
        .await;
    assert!(sell.success, "error: {:?}", sell.error);

    let closed = p
        .positions
        .close_position(id, reason, sell.tx_hash.clone(), Some(price))
        .await
        .unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert!(
        (closed.pnl_percent - 50.0).abs() < 0.5,
        "pnl {}",
        closed.pnl_percent
    );
    // The landed hash is the RPC signature recorded by the chain.
    assert!(p
        .chain
        .sends
        .lock()
        .unwrap()
        .contains(sell.tx_hash.as_ref().unwrap()));
}

/// Scenario: a failed sell reverts the position to Open so the next
/// tick re-fires the trigger.
#[tokio::test]
async fn failed_sell_reopens_position() {
    let mut p = clean_pipeline();
    let entry_price = 0.0001;
    p.chain.set_curve(p.pool, &curve_at_price(entry_price));
    let position = p
        .positions
        .open_position(
            p.mint,
            p.pool,
            DexKind::Pumpfun,
            entry_price,
            0.1,
            1_000_000_000,
            "entry-tx".to_string(),
        )
        .await
        .unwrap();
    let _ = next_event(&mut p).await;

    p.chain.set_curve(p.pool, &curve_at_price(entry_price * 1.5));
    p.positions.refresh_tick().await;
    let _ = next_event(&mut p).await; // trigger

    // The sell fails (every provider call errors).
    p.chain.set_fail(true);
    let sell = p
        .executor
        .execute(&SwapRequest {
            dex: DexKind::Pumpfun,
            mint: p.mint,
            pool: p.pool,
            side: SwapSide::Sell,
            amount: 1_000_000_000,
            slippage_bps: None,
        })
        .await;
    assert!(!sell.success);

    p.positions.reopen(position.id).await.unwrap();
    assert_eq!(
        p.positions.get(position.id).await.unwrap().status,
        PositionStatus::Open
    );
}

/// Scenario: bundle fallback. The block engine is unreachable, so the
/// executor lands through `sendTransaction`; the returned hash is the
/// RPC signature, never a bundle id.
#[tokio::test]
async fn bundle_failure_falls_back_to_rpc() {
    let p = clean_pipeline();

    let result = p
        .executor
        .execute(&SwapRequest {
            dex: DexKind::Pumpfun,
            mint: p.mint,
            pool: p.pool,
            side: SwapSide::Buy,
            amount: LAMPORTS_PER_SOL / 10,
            slippage_bps: None,
        })
        .await;

    assert!(result.success, "error: {:?}", result.error);
    let hash = result.tx_hash.unwrap();
    let sends = p.chain.sends.lock().unwrap();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0], hash);
}

/// Scenario: dedup across a reconnect. A re-delivered signature is
/// recognized and never reprocessed.
#[tokio::test]
async fn dedup_survives_redelivery() {
    let mut seen = SignatureSet::default();

    assert!(seen.insert("sig-before-disconnect"));
    // Reconnect re-delivers the same signature.
    assert!(!seen.insert("sig-before-disconnect"));
    assert_eq!(seen.len(), 1);
}

/// Repeated analysis inside the cache window returns the identical
/// result; the chain is only consulted once.
#[tokio::test]
async fn analysis_cache_round_trip() {
    let p = clean_pipeline();
    let request = request_for(&p);

    let first = p.analyzer.analyze(&request).await;
    let calls_after_first = p.chain.calls();
    let second = p.analyzer.analyze(&request).await;

    assert_eq!(first.score, second.score);
    assert_eq!(first.timestamp, second.timestamp);
    assert_eq!(first.factors.len(), second.factors.len());
    assert_eq!(p.chain.calls(), calls_after_first);
}
