//! Pump.fun bonding curve decoding and pricing.
//!
//! The curve account is a fixed 49-byte record. Curve accounts do not
//! name their mint, so the decoder keeps a bounded curve→mint map fed
//! by the `create` instructions it sees; account updates for unknown
//! curves are dropped rather than guessed at.

use std::time::Duration;

use moka::sync::Cache;
use solana_sdk::pubkey::Pubkey;
use tracing::trace;

use super::DexDecoder;
use crate::rpc::DecodedInstruction;
use crate::types::{unix_now, wsol_mint, DexKind, PoolEvent};

/// Anchor account discriminator of the bonding curve record.
pub const BONDING_CURVE_DISCRIMINATOR: [u8; 8] = [23, 183, 248, 55, 96, 216, 172, 96];

/// Instruction discriminators.
pub const CREATE_DISCRIMINATOR: [u8; 8] = [24, 30, 200, 40, 5, 28, 7, 119];
pub const BUY_DISCRIMINATOR: [u8; 8] = [102, 6, 61, 18, 1, 218, 235, 234];
pub const SELL_DISCRIMINATOR: [u8; 8] = [51, 230, 133, 164, 1, 127, 131, 173];

/// Reserves every fresh curve starts with.
pub const INITIAL_VIRTUAL_TOKEN_RESERVES: u64 = 1_073_000_000_000_000;
pub const INITIAL_VIRTUAL_SOL_RESERVES: u64 = 30_000_000_000;

/// Protocol fee charged on both directions.
pub const FEE_BPS: u64 = 100;

/// Minimum account length: discriminator + five u64 fields + flag.
pub const MIN_CURVE_LEN: usize = 49;

/// SOL has 9 decimals, pump.fun tokens 6; the spot-price quotient of
/// lamports over token base units is off by 10^(6-9).
const DECIMAL_CORRECTION: f64 = 1e-3;

/// Parsed bonding curve state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BondingCurveState {
    pub virtual_token_reserves: u64,
    pub virtual_sol_reserves: u64,
    pub real_token_reserves: u64,
    pub real_sol_reserves: u64,
    pub token_total_supply: u64,
    pub complete: bool,
}

impl BondingCurveState {
    /// A curve still carrying its exact initial virtual reserves has
    /// seen no trades.
    pub fn is_fresh(&self) -> bool {
        self.virtual_token_reserves == INITIAL_VIRTUAL_TOKEN_RESERVES
            && self.virtual_sol_reserves == INITIAL_VIRTUAL_SOL_RESERVES
    }
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

/// Parse a curve account blob; `None` for foreign or truncated data.
pub fn parse_curve(data: &[u8]) -> Option<BondingCurveState> {
    if data.len() < MIN_CURVE_LEN || data[..8] != BONDING_CURVE_DISCRIMINATOR {
        return None;
    }
    Some(BondingCurveState {
        virtual_token_reserves: read_u64(data, 8),
        virtual_sol_reserves: read_u64(data, 16),
        real_token_reserves: read_u64(data, 24),
        real_sol_reserves: read_u64(data, 32),
        token_total_supply: read_u64(data, 40),
        complete: data[48] != 0,
    })
}

/// Encode a curve state as an account blob (test fixtures and the
/// sell-simulation path share this).
pub fn encode_curve(state: &BondingCurveState) -> Vec<u8> {
    let mut data = Vec::with_capacity(MIN_CURVE_LEN);
    data.extend_from_slice(&BONDING_CURVE_DISCRIMINATOR);
    data.extend_from_slice(&state.virtual_token_reserves.to_le_bytes());
    data.extend_from_slice(&state.virtual_sol_reserves.to_le_bytes());
    data.extend_from_slice(&state.real_token_reserves.to_le_bytes());
    data.extend_from_slice(&state.real_sol_reserves.to_le_bytes());
    data.extend_from_slice(&state.token_total_supply.to_le_bytes());
    data.push(state.complete as u8);
    data
}

/// Spot price in SOL per whole token.
pub fn spot_price_sol(state: &BondingCurveState) -> f64 {
    if state.virtual_token_reserves == 0 {
        return 0.0;
    }
    (state.virtual_sol_reserves as f64 / state.virtual_token_reserves as f64) * DECIMAL_CORRECTION
}

/// Token base units received for `lamports_in`, after the protocol fee.
/// All arithmetic widens to u128 before multiplying.
pub fn tokens_out_for_sol(state: &BondingCurveState, lamports_in: u64) -> u64 {
    if state.complete || state.virtual_sol_reserves == 0 || state.virtual_token_reserves == 0 {
        return 0;
    }
    let fee = (lamports_in as u128 * FEE_BPS as u128) / 10_000;
    let net_in = lamports_in as u128 - fee;

    let vsol = state.virtual_sol_reserves as u128;
    let vtok = state.virtual_token_reserves as u128;
    let new_vsol = vsol + net_in;
    let new_vtok = (vsol * vtok) / new_vsol;
    (vtok - new_vtok) as u64
}

/// Lamports received for selling `tokens_in` base units, net of fee.
pub fn sol_out_for_tokens(state: &BondingCurveState, tokens_in: u64) -> u64 {
    if state.complete || state.virtual_sol_reserves == 0 || state.virtual_token_reserves == 0 {
        return 0;
    }
    let vsol = state.virtual_sol_reserves as u128;
    let vtok = state.virtual_token_reserves as u128;
    let new_vtok = vtok + tokens_in as u128;
    let new_vsol = (vsol * vtok) / new_vtok;
    let gross = vsol - new_vsol;
    let fee = (gross * FEE_BPS as u128) / 10_000;
    (gross - fee) as u64
}

/// Curve state after buying with `lamports_in` (fee applied).
pub fn state_after_buy(state: &BondingCurveState, lamports_in: u64) -> BondingCurveState {
    let out = tokens_out_for_sol(state, lamports_in);
    let fee = (lamports_in as u128 * FEE_BPS as u128) / 10_000;
    let net_in = (lamports_in as u128 - fee) as u64;
    BondingCurveState {
        virtual_token_reserves: state.virtual_token_reserves.saturating_sub(out),
        virtual_sol_reserves: state.virtual_sol_reserves.saturating_add(net_in),
        real_token_reserves: state.real_token_reserves.saturating_sub(out),
        real_sol_reserves: state.real_sol_reserves.saturating_add(net_in),
        ..*state
    }
}

#[derive(Debug)]
pub struct PumpfunDecoder {
    /// curve account → mint, learned from `create` instructions. The
    /// curve PDA cannot be inverted, so account updates for curves this
    /// map has never seen are unattributable.
    curve_mints: Cache<Pubkey, Pubkey>,
}

impl Default for PumpfunDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PumpfunDecoder {
    pub fn new() -> Self {
        Self {
            curve_mints: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(24 * 3_600))
                .build(),
        }
    }

    /// Pre-seed the curve→mint map (position refresh uses this for
    /// pools bought before a restart).
    pub fn register_curve(&self, curve: Pubkey, mint: Pubkey) {
        self.curve_mints.insert(curve, mint);
    }

    pub fn mint_for_curve(&self, curve: &Pubkey) -> Option<Pubkey> {
        self.curve_mints.get(curve)
    }
}

impl DexDecoder for PumpfunDecoder {
    fn dex(&self) -> DexKind {
        DexKind::Pumpfun
    }

    fn parse_account(&self, address: &Pubkey, data: &[u8], slot: u64) -> Option<PoolEvent> {
        let state = parse_curve(data)?;

        let mint = match self.mint_for_curve(address) {
            Some(mint) => mint,
            None => {
                trace!(curve = %address, "curve update for unknown mint, dropping");
                return None;
            }
        };

        if state.complete {
            // A completed curve is migrating to the AMM; no further
            // trades through the curve are valid.
            return Some(PoolEvent::Migration {
                source_dex: DexKind::Pumpfun,
                target_dex: DexKind::Raydium,
                mint,
                source_pool: *address,
                target_pool: None,
                slot,
                signature: String::new(),
                timestamp: unix_now(),
            });
        }

        if state.is_fresh() {
            return Some(PoolEvent::NewPool {
                dex: DexKind::Pumpfun,
                mint,
                pool: *address,
                base_mint: mint,
                quote_mint: wsol_mint(),
                base_vault: *address,
                quote_vault: *address,
                lp_mint: None,
                open_time: None,
                slot,
                signature: String::new(),
                timestamp: unix_now(),
            });
        }

        None
    }

    fn parse_transaction(
        &self,
        signature: &str,
        instructions: &[DecodedInstruction],
        slot: u64,
    ) -> Option<PoolEvent> {
        let program = DexKind::Pumpfun.program_id();

        for ix in instructions {
            if ix.program_id != program || ix.data.len() < 8 {
                continue;
            }
            if ix.data[..8] != CREATE_DISCRIMINATOR {
                continue;
            }
            if ix.accounts.len() < 3 {
                continue;
            }

            // Fixed slots of `create`: mint, then the curve PDA.
            let mint = ix.accounts[0];
            let bonding_curve = ix.accounts[2];
            // Slot 3 is the curve's associated token account when present.
            let base_vault = ix.accounts.get(3).copied().unwrap_or(bonding_curve);

            self.curve_mints.insert(bonding_curve, mint);

            return Some(PoolEvent::NewPool {
                dex: DexKind::Pumpfun,
                mint,
                pool: bonding_curve,
                base_mint: mint,
                quote_mint: wsol_mint(),
                base_vault,
                quote_vault: bonding_curve,
                lp_mint: None,
                open_time: None,
                slot,
                signature: signature.to_string(),
                timestamp: unix_now(),
            });
        }

        None
    }
}
