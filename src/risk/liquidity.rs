//! Pool liquidity check (phase 1).
//!
//! Reads the quote vault and expresses its balance in SOL: wrapped SOL
//! vaults report lamports, stablecoin vaults are converted through a
//! crude fixed ratio, anything else is taken at face value.

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;

use super::types::*;
use crate::rpc::{AccountBlob, RpcManager};
use crate::types::{is_stablecoin, wsol_mint, LAMPORTS_PER_SOL};

/// Crude stablecoin→SOL conversion ratio (USD per SOL). Precision does
/// not matter here; the check only needs the right order of magnitude.
const STABLE_USD_PER_SOL: f64 = 150.0;

/// SPL token accounts keep the balance at this offset.
const TOKEN_AMOUNT_OFFSET: usize = 64;
const TOKEN_ACCOUNT_LEN: usize = 165;

fn token_account_amount(blob: &AccountBlob) -> Option<u64> {
    if blob.data.len() < TOKEN_ACCOUNT_LEN {
        return None;
    }
    let bytes: [u8; 8] = blob.data[TOKEN_AMOUNT_OFFSET..TOKEN_AMOUNT_OFFSET + 8]
        .try_into()
        .ok()?;
    Some(u64::from_le_bytes(bytes))
}

/// Express the vault balance in SOL terms.
pub fn vault_balance_sol(quote_mint: &Pubkey, vault: &AccountBlob) -> f64 {
    if *quote_mint == wsol_mint() {
        // Wrapped-SOL leg: the lamport balance is the liquidity. For a
        // bonding curve the vault is the curve account itself.
        return vault.lamports as f64 / LAMPORTS_PER_SOL as f64;
    }

    let amount = token_account_amount(vault).unwrap_or(0);
    if is_stablecoin(quote_mint) {
        // Stablecoins carry 6 decimals.
        let usd = amount as f64 / 1e6;
        usd / STABLE_USD_PER_SOL
    } else {
        // Unknown quote asset: report the raw balance.
        amount as f64
    }
}

/// Fetch the quote vault and produce the liquidity factor. The factor
/// score prorates up to the full bonus at `LIQUIDITY_FULL_SOL`.
pub async fn liquidity_factor(
    rpc: &Arc<RpcManager>,
    quote_mint: &Pubkey,
    quote_vault: &Pubkey,
    min_liquidity_sol: f64,
) -> (RiskFactor, f64) {
    let vault = match rpc.get_account_info(quote_vault).await {
        Ok(Some(blob)) => blob,
        Ok(None) => {
            return (
                RiskFactor::failed(FACTOR_LIQUIDITY, 0, SCORE_LIQUIDITY, "quote vault missing"),
                0.0,
            )
        }
        Err(e) => {
            return (
                RiskFactor::failed(
                    FACTOR_LIQUIDITY,
                    0,
                    SCORE_LIQUIDITY,
                    format!("quote vault read failed: {e}"),
                ),
                0.0,
            )
        }
    };

    let liquidity_sol = vault_balance_sol(quote_mint, &vault);
    (score_liquidity(liquidity_sol, min_liquidity_sol), liquidity_sol)
}

pub fn score_liquidity(liquidity_sol: f64, min_liquidity_sol: f64) -> RiskFactor {
    let prorated =
        ((liquidity_sol / LIQUIDITY_FULL_SOL).min(1.0) * SCORE_LIQUIDITY as f64).floor() as i32;
    let details = format!("{liquidity_sol:.3} SOL in quote vault");

    if liquidity_sol >= min_liquidity_sol {
        RiskFactor::passed(FACTOR_LIQUIDITY, prorated, SCORE_LIQUIDITY, details)
    } else {
        RiskFactor::failed(FACTOR_LIQUIDITY, prorated, SCORE_LIQUIDITY, details)
    }
}
