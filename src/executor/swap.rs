//! DEX swap instruction assembly.
//!
//! Pump.fun buys and sells are built against the bonding curve with
//! slippage-derived output floors. Compute-budget instructions are
//! prepended by the executor, the tip transfer is appended there.

use std::str::FromStr;

use anyhow::{bail, Result};
use solana_compute_budget_interface::ComputeBudgetInstruction;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_program;
use solana_sdk::sysvar::rent;
use spl_associated_token_account::get_associated_token_address;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;

use crate::dex::pumpfun::{
    self, BondingCurveState, BUY_DISCRIMINATOR, SELL_DISCRIMINATOR,
};
use crate::types::{token_program, DexKind};

/// Protocol fee recipient (global state field, stable in practice).
const PUMPFUN_FEE_RECIPIENT: &str = "CebN5WGQ4jvEPvsVU4EoHEpgzq1VV7AbicfhtW4xC9iM";
/// Event authority PDA.
const PUMPFUN_EVENT_AUTHORITY: &str = "Ce6TQqeHC9p8KetsN6JsjHK7UTZk7nasjjnr7XxXp9F1";

/// Compute budget defaults for a single-swap transaction.
pub const COMPUTE_UNIT_LIMIT: u32 = 120_000;
pub const COMPUTE_UNIT_PRICE_MICRO_LAMPORTS: u64 = 100_000;

fn pumpfun_global() -> Pubkey {
    Pubkey::find_program_address(&[b"global"], &DexKind::Pumpfun.program_id()).0
}

fn fee_recipient() -> Pubkey {
    Pubkey::from_str(PUMPFUN_FEE_RECIPIENT).expect("static address")
}

fn event_authority() -> Pubkey {
    Pubkey::from_str(PUMPFUN_EVENT_AUTHORITY).expect("static address")
}

/// The curve's own token account.
pub fn associated_bonding_curve(bonding_curve: &Pubkey, mint: &Pubkey) -> Pubkey {
    get_associated_token_address(bonding_curve, mint)
}

pub fn compute_budget_instructions() -> Vec<Instruction> {
    vec![
        ComputeBudgetInstruction::set_compute_unit_limit(COMPUTE_UNIT_LIMIT),
        ComputeBudgetInstruction::set_compute_unit_price(COMPUTE_UNIT_PRICE_MICRO_LAMPORTS),
    ]
}

/// Apply a slippage floor to an expected output.
pub fn min_out_with_slippage(expected: u64, slippage_bps: u16) -> u64 {
    let bps = slippage_bps.min(10_000) as u128;
    ((expected as u128 * (10_000 - bps)) / 10_000) as u64
}

/// A built pump.fun buy: instruction list plus the outputs the caller
/// tracks (expected tokens and the executable price).
#[derive(Debug, Clone)]
pub struct BuiltSwap {
    pub instructions: Vec<Instruction>,
    pub expected_out: u64,
    /// SOL per whole token at the expected execution.
    pub price_sol: f64,
}

/// Build a pump.fun buy for `lamports_in`. When `create_ata` is set, an
/// idempotent associated-account creation is prepended.
pub fn build_pumpfun_buy(
    wallet: &Pubkey,
    mint: &Pubkey,
    bonding_curve: &Pubkey,
    curve: &BondingCurveState,
    lamports_in: u64,
    slippage_bps: u16,
    create_ata: bool,
) -> Result<BuiltSwap> {
    if curve.complete {
        bail!("bonding curve is complete, trades must route to the AMM");
    }

    let expected = pumpfun::tokens_out_for_sol(curve, lamports_in);
    if expected == 0 {
        bail!("buy would produce zero tokens");
    }
    let min_tokens = min_out_with_slippage(expected, slippage_bps);

    let user_ata = get_associated_token_address(wallet, mint);
    let mut instructions = Vec::with_capacity(2);
    if create_ata {
        instructions.push(create_associated_token_account_idempotent(
            wallet,
            wallet,
            mint,
            &token_program(),
        ));
    }

    let mut data = BUY_DISCRIMINATOR.to_vec();
    data.extend_from_slice(&min_tokens.to_le_bytes());
    data.extend_from_slice(&lamports_in.to_le_bytes());

    instructions.push(Instruction {
        program_id: DexKind::Pumpfun.program_id(),
        accounts: pumpfun_swap_accounts(wallet, mint, bonding_curve, &user_ata),
        data,
    });

    let price_sol = price_for_fill(lamports_in, expected);
    Ok(BuiltSwap {
        instructions,
        expected_out: expected,
        price_sol,
    })
}

/// Build a pump.fun sell of `tokens_in` base units.
pub fn build_pumpfun_sell(
    wallet: &Pubkey,
    mint: &Pubkey,
    bonding_curve: &Pubkey,
    curve: &BondingCurveState,
    tokens_in: u64,
    slippage_bps: u16,
) -> Result<BuiltSwap> {
    if curve.complete {
        bail!("bonding curve is complete, trades must route to the AMM");
    }

    let expected = pumpfun::sol_out_for_tokens(curve, tokens_in);
    let min_sol = min_out_with_slippage(expected, slippage_bps);

    let user_ata = get_associated_token_address(wallet, mint);
    let mut data = SELL_DISCRIMINATOR.to_vec();
    data.extend_from_slice(&tokens_in.to_le_bytes());
    data.extend_from_slice(&min_sol.to_le_bytes());

    let instructions = vec![Instruction {
        program_id: DexKind::Pumpfun.program_id(),
        accounts: pumpfun_swap_accounts(wallet, mint, bonding_curve, &user_ata),
        data,
    }];

    let price_sol = if tokens_in > 0 {
        price_for_fill(expected, tokens_in)
    } else {
        0.0
    };
    Ok(BuiltSwap {
        instructions,
        expected_out: expected,
        price_sol,
    })
}

/// Fixed account order shared by the buy and sell instructions.
fn pumpfun_swap_accounts(
    wallet: &Pubkey,
    mint: &Pubkey,
    bonding_curve: &Pubkey,
    user_ata: &Pubkey,
) -> Vec<AccountMeta> {
    vec![
        AccountMeta::new_readonly(pumpfun_global(), false),
        AccountMeta::new(fee_recipient(), false),
        AccountMeta::new_readonly(*mint, false),
        AccountMeta::new(*bonding_curve, false),
        AccountMeta::new(associated_bonding_curve(bonding_curve, mint), false),
        AccountMeta::new(*user_ata, false),
        AccountMeta::new(*wallet, true),
        AccountMeta::new_readonly(system_program::id(), false),
        AccountMeta::new_readonly(token_program(), false),
        AccountMeta::new_readonly(rent::id(), false),
        AccountMeta::new_readonly(event_authority(), false),
        AccountMeta::new_readonly(DexKind::Pumpfun.program_id(), false),
    ]
}

/// SOL per whole token for a lamports/base-unit fill.
fn price_for_fill(lamports: u64, tokens: u64) -> f64 {
    if tokens == 0 {
        return 0.0;
    }
    // lamports/μtoken → SOL/token carries the 10^(6-9) correction.
    (lamports as f64 / tokens as f64) * 1e-3
}
