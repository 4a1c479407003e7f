//! Sell-path simulation (phase 3, honeypot detection).
//!
//! A nominal sell is simulated against the current slot and the result
//! interpreted: hard denials are honeypots, transfer caps are
//! penalized, tax figures are scraped from the program logs. The
//! Raydium sell path is not simulated until its swap accounts are
//! carried end-to-end; that case takes the could-not-verify bonus
//! instead of submitting a malformed instruction.

use std::sync::Arc;

use regex::Regex;
use solana_sdk::message::{v0, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use tracing::{debug, instrument};

use super::types::*;
use crate::dex::pumpfun;
use crate::executor::swap;
use crate::rpc::RpcManager;
use crate::types::DexKind;

/// Nominal sell used by the probe: 1 000 whole tokens of 6 decimals.
pub const TEST_SELL_TOKENS: u64 = 1_000 * 1_000_000;

/// Taxes above this are a honeypot however they are labelled.
const TAX_HONEYPOT_PERCENT: f64 = 50.0;

/// Outcome of interpreting the simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct SellProbe {
    pub factor: RiskFactor,
    pub warnings: Vec<String>,
    pub has_max_tx: bool,
}

impl SellProbe {
    fn clean(factor: RiskFactor) -> Self {
        Self {
            factor,
            warnings: Vec::new(),
            has_max_tx: false,
        }
    }
}

/// Half-bonus factor for paths the probe cannot verify.
fn unverified(details: impl Into<String>) -> RiskFactor {
    RiskFactor::passed(
        FACTOR_HONEYPOT,
        SCORE_HONEYPOT_PASSED / 2,
        SCORE_HONEYPOT_PASSED,
        details,
    )
}

/// Run the sell probe for a candidate.
#[instrument(skip(rpc), fields(mint = %mint))]
pub async fn sell_probe(
    rpc: &Arc<RpcManager>,
    wallet: &Pubkey,
    dex: DexKind,
    mint: &Pubkey,
    pool: &Pubkey,
    max_tax_percent: f64,
) -> SellProbe {
    match dex {
        DexKind::Pumpfun => {}
        // No verified sell layout for these yet; do not submit a
        // malformed instruction.
        DexKind::Raydium | DexKind::Orca => {
            return SellProbe::clean(unverified(format!("{dex} sell simulation not enabled")));
        }
    }

    let curve_blob = match rpc.get_account_info(pool).await {
        Ok(Some(blob)) => blob,
        _ => {
            return SellProbe::clean(unverified("bonding curve unreadable, skipping probe"));
        }
    };
    let curve = match pumpfun::parse_curve(&curve_blob.data) {
        Some(curve) => curve,
        None => {
            return SellProbe::clean(unverified("bonding curve unparsable, skipping probe"));
        }
    };

    let built = match swap::build_pumpfun_sell(wallet, mint, pool, &curve, TEST_SELL_TOKENS, 0) {
        Ok(built) => built,
        Err(e) => {
            return SellProbe::clean(unverified(format!("sell build failed: {e}")));
        }
    };

    // Unsigned simulation message; the RPC replaces the blockhash and
    // skips signature verification.
    let message = match v0::Message::try_compile(
        wallet,
        &built.instructions,
        &[],
        solana_sdk::hash::Hash::default(),
    ) {
        Ok(message) => message,
        Err(e) => {
            return SellProbe::clean(unverified(format!("message compile failed: {e}")));
        }
    };
    let tx = VersionedTransaction {
        signatures: vec![Signature::default()],
        message: VersionedMessage::V0(message),
    };

    match rpc.simulate_transaction(&tx).await {
        Ok(outcome) => match outcome.err {
            Some(err) => interpret_error(&err),
            None => interpret_logs(&outcome.logs, max_tax_percent),
        },
        Err(e) => {
            debug!(error = %e, "sell simulation rpc failed");
            SellProbe::clean(unverified(format!("simulation unavailable: {e}")))
        }
    }
}

/// Map a simulation error string onto a verdict.
pub fn interpret_error(err: &str) -> SellProbe {
    let lowered = err.to_ascii_lowercase();

    if lowered.contains("insufficientfunds") || lowered.contains("insufficient funds") {
        // The probe wallet simply does not hold the tokens; the path
        // itself could not be fully verified.
        return SellProbe::clean(unverified("sell not fully verified (no test balance)"));
    }

    if ["blocked", "blacklist", "denied"]
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        return SellProbe::clean(RiskFactor::failed(
            FACTOR_HONEYPOT,
            -30,
            SCORE_HONEYPOT_PASSED,
            format!("sell denied by program: {err}"),
        ));
    }

    if lowered.contains("max") || lowered.contains("limit") {
        return SellProbe {
            factor: RiskFactor::passed(
                FACTOR_HONEYPOT,
                SCORE_HONEYPOT_PASSED / 3,
                SCORE_HONEYPOT_PASSED,
                format!("transfer cap detected: {err}"),
            ),
            warnings: vec!["token enforces a max transaction size".to_string()],
            has_max_tx: true,
        };
    }

    SellProbe {
        factor: unverified(format!("simulation error: {err}")),
        warnings: vec![format!("unclassified simulation error: {err}")],
        has_max_tx: false,
    }
}

/// Scan successful-simulation logs for tax figures.
pub fn interpret_logs(logs: &[String], max_tax_percent: f64) -> SellProbe {
    let tax = detect_tax_percent(logs);

    match tax {
        Some(tax) if tax > TAX_HONEYPOT_PERCENT => SellProbe::clean(RiskFactor::failed(
            FACTOR_HONEYPOT,
            -30,
            SCORE_HONEYPOT_PASSED,
            format!("effective sell tax {tax:.1}%"),
        )),
        Some(tax) if tax > max_tax_percent => SellProbe {
            factor: RiskFactor::passed(
                FACTOR_HONEYPOT,
                SCORE_HONEYPOT_PASSED / 3,
                SCORE_HONEYPOT_PASSED,
                format!("sell tax {tax:.1}% above limit"),
            ),
            warnings: vec![format!("sell tax {tax:.1}%")],
            has_max_tx: false,
        },
        _ => SellProbe::clean(RiskFactor::passed(
            FACTOR_HONEYPOT,
            SCORE_HONEYPOT_PASSED,
            SCORE_HONEYPOT_PASSED,
            "sell simulation succeeded",
        )),
    }
}

/// Highest tax/fee percentage named in the logs, if any.
pub fn detect_tax_percent(logs: &[String]) -> Option<f64> {
    let patterns = [
        Regex::new(r"(?i)tax[:\s]+(\d+\.?\d*)").expect("static regex"),
        Regex::new(r"(?i)fee[:\s]+(\d+\.?\d*)").expect("static regex"),
    ];

    let mut highest: Option<f64> = None;
    for line in logs {
        for pattern in &patterns {
            if let Some(captures) = pattern.captures(line) {
                if let Ok(value) = captures[1].parse::<f64>() {
                    highest = Some(highest.map_or(value, |h: f64| h.max(value)));
                }
            }
        }
    }
    highest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_is_half_bonus() {
        let probe = interpret_error("Transfer: InsufficientFunds");
        assert!(probe.factor.passed);
        assert_eq!(probe.factor.score, SCORE_HONEYPOT_PASSED / 2);
        assert!(!probe.has_max_tx);
    }

    #[test]
    fn test_denial_is_honeypot() {
        for err in [
            "custom program error: account blocked",
            "wallet is on the blacklist",
            "transfer denied",
        ] {
            let probe = interpret_error(err);
            assert!(!probe.factor.passed, "{err}");
            assert!(is_critical_failure(&probe.factor), "{err}");
        }
    }

    #[test]
    fn test_transfer_cap_penalized_not_fatal() {
        let probe = interpret_error("amount exceeds max transaction");
        assert!(probe.factor.passed);
        assert!(probe.has_max_tx);
        assert!(probe.factor.score < SCORE_HONEYPOT_PASSED);
        assert!(!probe.warnings.is_empty());
    }

    #[test]
    fn test_tax_detection() {
        let logs = vec![
            "Program log: Instruction: Sell".to_string(),
            "Program log: tax: 12.5".to_string(),
            "Program log: fee: 3".to_string(),
        ];
        assert_eq!(detect_tax_percent(&logs), Some(12.5));
        assert_eq!(detect_tax_percent(&["no numbers here".to_string()]), None);
    }

    #[test]
    fn test_log_interpretation_tiers() {
        // Clean run: full bonus.
        let probe = interpret_logs(&["Program log: ok".to_string()], 10.0);
        assert_eq!(probe.factor.score, SCORE_HONEYPOT_PASSED);
        assert!(probe.factor.passed);

        // Over the configured ceiling: penalized, warned.
        let probe = interpret_logs(&["tax: 15".to_string()], 10.0);
        assert!(probe.factor.passed);
        assert!(probe.factor.score < SCORE_HONEYPOT_PASSED);
        assert_eq!(probe.warnings.len(), 1);

        // Over 50%: honeypot.
        let probe = interpret_logs(&["tax: 80".to_string()], 10.0);
        assert!(!probe.factor.passed);
        assert!(is_critical_failure(&probe.factor));
    }
}
