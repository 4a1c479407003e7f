//! Core types shared across the sniping pipeline.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// Wrapped SOL mint.
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";
/// USDC mint.
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
/// USDT mint.
pub const USDT_MINT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";
/// SPL token program.
pub const TOKEN_PROGRAM: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
/// Token-2022 program.
pub const TOKEN_2022_PROGRAM: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

/// Lamports in one SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// The DEX families the pipeline can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DexKind {
    Raydium,
    Pumpfun,
    Orca,
}

impl DexKind {
    /// On-chain program id owning this DEX's pool accounts.
    pub fn program_id(&self) -> Pubkey {
        let s = match self {
            DexKind::Raydium => "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8",
            DexKind::Pumpfun => "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P",
            DexKind::Orca => "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc",
        };
        Pubkey::from_str(s).expect("static program id")
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DexKind::Raydium => "raydium",
            DexKind::Pumpfun => "pumpfun",
            DexKind::Orca => "orca",
        }
    }
}

impl fmt::Display for DexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pool-related observation emitted by the ingestion layer.
///
/// Decoders produce these from raw account blobs or transaction
/// instructions; everything downstream consumes them by value.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// A freshly created liquidity pool or bonding curve.
    NewPool {
        dex: DexKind,
        /// The tradeable token. Equals `base_mint` unless the decoder
        /// identified the quote side as the wrapped-SOL leg.
        mint: Pubkey,
        pool: Pubkey,
        base_mint: Pubkey,
        quote_mint: Pubkey,
        base_vault: Pubkey,
        quote_vault: Pubkey,
        lp_mint: Option<Pubkey>,
        open_time: Option<u64>,
        slot: u64,
        signature: String,
        timestamp: u64,
    },
    /// A pool moved from one DEX to another (e.g. a completed bonding
    /// curve graduating to an AMM).
    Migration {
        source_dex: DexKind,
        target_dex: DexKind,
        mint: Pubkey,
        source_pool: Pubkey,
        target_pool: Option<Pubkey>,
        slot: u64,
        signature: String,
        timestamp: u64,
    },
    /// Liquidity was added to an existing pool. Decoded but not acted
    /// on by the buy pipeline.
    LiquidityAdded {
        dex: DexKind,
        pool: Pubkey,
        mint: Pubkey,
        lamports_added: u64,
        slot: u64,
        signature: String,
        timestamp: u64,
    },
}

impl PoolEvent {
    pub fn signature(&self) -> &str {
        match self {
            PoolEvent::NewPool { signature, .. }
            | PoolEvent::Migration { signature, .. }
            | PoolEvent::LiquidityAdded { signature, .. } => signature,
        }
    }

    pub fn mint(&self) -> &Pubkey {
        match self {
            PoolEvent::NewPool { mint, .. }
            | PoolEvent::Migration { mint, .. }
            | PoolEvent::LiquidityAdded { mint, .. } => mint,
        }
    }

    pub fn slot(&self) -> u64 {
        match self {
            PoolEvent::NewPool { slot, .. }
            | PoolEvent::Migration { slot, .. }
            | PoolEvent::LiquidityAdded { slot, .. } => *slot,
        }
    }
}

/// Direction of a swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapSide {
    Buy,
    Sell,
}

impl fmt::Display for SwapSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapSide::Buy => f.write_str("buy"),
            SwapSide::Sell => f.write_str("sell"),
        }
    }
}

/// A swap the orchestrator asks the executor to drive to inclusion.
#[derive(Debug, Clone)]
pub struct SwapRequest {
    pub dex: DexKind,
    pub mint: Pubkey,
    pub pool: Pubkey,
    pub side: SwapSide,
    /// Buy: lamports to spend. Sell: token base units to unload.
    pub amount: u64,
    pub slippage_bps: Option<u16>,
}

/// Outcome of a swap attempt.
#[derive(Debug, Clone)]
pub struct SwapResult {
    pub success: bool,
    /// Landed transaction signature (the RPC signature on fallback,
    /// never the bundle id).
    pub tx_hash: Option<String>,
    /// Expected execution price in SOL per whole token at build time.
    pub price: Option<f64>,
    pub error: Option<String>,
    pub latency_ms: u64,
}

impl SwapResult {
    pub fn failure(error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            success: false,
            tx_hash: None,
            price: None,
            error: Some(error.into()),
            latency_ms,
        }
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current unix time in milliseconds.
pub fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn wsol_mint() -> Pubkey {
    Pubkey::from_str(WSOL_MINT).expect("static mint")
}

pub fn token_program() -> Pubkey {
    Pubkey::from_str(TOKEN_PROGRAM).expect("static program id")
}

pub fn token_2022_program() -> Pubkey {
    Pubkey::from_str(TOKEN_2022_PROGRAM).expect("static program id")
}

/// True for the mints treated as SOL-quoted stablecoins by the
/// liquidity check.
pub fn is_stablecoin(mint: &Pubkey) -> bool {
    let s = mint.to_string();
    s == USDC_MINT || s == USDT_MINT
}
