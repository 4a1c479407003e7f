//! Holder-distribution, LP-lock and creator checks (phase 2).

use std::str::FromStr;
use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address;

use super::types::*;
use crate::rpc::{RpcManager, TokenAccountBalance};

/// Token accounts whose balances count as permanently locked.
const BURN_ADDRESSES: &[&str] = &[
    "1nc1nerator11111111111111111111111111111111",
    "11111111111111111111111111111111",
];

/// An LP supply whose visible circulating share has shrunk below this
/// fraction is treated as burned.
const BURNED_CIRCULATING_FRACTION: f64 = 0.10;

const LP_FULL_LOCK_FRACTION: f64 = 0.90;
const LP_PARTIAL_LOCK_FRACTION: f64 = 0.50;

/// Creator share classification bounds (percent of supply).
const CREATOR_OK_PERCENT: f64 = 5.0;
const CREATOR_WARN_PERCENT: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concentration {
    Low,
    Medium,
    High,
}

/// Top-1/5/10 holder percentages of supply.
#[derive(Debug, Clone, Copy, Default)]
pub struct HolderShares {
    pub top1: f64,
    pub top5: f64,
    pub top10: f64,
}

pub fn holder_shares(holders: &[TokenAccountBalance], supply: u64) -> HolderShares {
    if supply == 0 {
        return HolderShares::default();
    }
    let percent = |take: usize| {
        holders
            .iter()
            .take(take)
            .map(|h| h.amount as f64)
            .sum::<f64>()
            / supply as f64
            * 100.0
    };
    HolderShares {
        top1: percent(1),
        top5: percent(5),
        top10: percent(10),
    }
}

pub fn classify_concentration(shares: &HolderShares) -> Concentration {
    if shares.top1 <= 10.0 && shares.top5 <= 30.0 {
        Concentration::Low
    } else if shares.top1 <= 20.0 && shares.top5 <= 50.0 {
        Concentration::Medium
    } else {
        Concentration::High
    }
}

/// Holder-distribution factor: one penalty point per percentage point
/// the top holder exceeds the configured ceiling, capped.
pub fn holder_factor(shares: &HolderShares, max_top_holder_percent: f64) -> RiskFactor {
    let concentration = classify_concentration(shares);
    let overrun = (shares.top1 - max_top_holder_percent).max(0.0);
    let penalty = -(overrun.round() as i32).min(HOLDER_PENALTY_CAP);

    let details = format!(
        "top1 {:.1}%, top5 {:.1}%, top10 {:.1}% ({concentration:?} concentration)",
        shares.top1, shares.top5, shares.top10
    );

    if overrun > 0.0 {
        RiskFactor::failed(FACTOR_HOLDER_DISTRIBUTION, penalty, 0, details)
    } else {
        RiskFactor::passed(FACTOR_HOLDER_DISTRIBUTION, 0, 0, details)
    }
}

/// Fetch largest accounts + supply and build the distribution factor.
pub async fn holder_distribution(
    rpc: &Arc<RpcManager>,
    mint: &Pubkey,
    max_top_holder_percent: f64,
) -> (RiskFactor, Vec<TokenAccountBalance>, u64) {
    let (largest, supply) = tokio::join!(
        rpc.get_token_largest_accounts(mint),
        rpc.get_token_supply(mint)
    );

    match (largest, supply) {
        (Ok(holders), Ok(supply)) => {
            let shares = holder_shares(&holders, supply.amount);
            (
                holder_factor(&shares, max_top_holder_percent),
                holders,
                supply.amount,
            )
        }
        (largest, supply) => {
            let error = largest
                .err()
                .or(supply.err())
                .map(|e| e.to_string())
                .unwrap_or_default();
            (
                RiskFactor::failed(
                    FACTOR_HOLDER_DISTRIBUTION,
                    0,
                    0,
                    format!("holder data unavailable: {error}"),
                ),
                Vec::new(),
                0,
            )
        }
    }
}

/// LP lock factor. Locked share = balances sitting on burn addresses;
/// a supply whose visible circulation collapsed is treated as burned
/// outright (burns are permanent, which also earns the duration bonus).
pub async fn lp_lock_factor(rpc: &Arc<RpcManager>, lp_mint: &Pubkey) -> RiskFactor {
    let (largest, supply) = tokio::join!(
        rpc.get_token_largest_accounts(lp_mint),
        rpc.get_token_supply(lp_mint)
    );

    let (holders, supply) = match (largest, supply) {
        (Ok(h), Ok(s)) => (h, s.amount),
        _ => {
            return RiskFactor::failed(FACTOR_LP_LOCK, 0, SCORE_LP_LOCKED, "lp data unavailable")
        }
    };

    if supply == 0 {
        // Supply fully burned.
        return RiskFactor::passed(
            FACTOR_LP_LOCK,
            SCORE_LP_LOCKED + SCORE_LP_DURATION_BONUS,
            SCORE_LP_LOCKED + SCORE_LP_DURATION_BONUS,
            "lp supply burned to zero",
        );
    }

    let burn_addresses: Vec<Pubkey> = BURN_ADDRESSES
        .iter()
        .filter_map(|s| Pubkey::from_str(s).ok())
        .collect();

    let burned: u64 = holders
        .iter()
        .filter(|h| burn_addresses.contains(&h.address))
        .map(|h| h.amount)
        .sum();

    let circulating: u64 = holders.iter().map(|h| h.amount).sum();
    let circulating_fraction = circulating as f64 / supply as f64;
    if circulating_fraction < BURNED_CIRCULATING_FRACTION {
        return RiskFactor::passed(
            FACTOR_LP_LOCK,
            SCORE_LP_LOCKED + SCORE_LP_DURATION_BONUS,
            SCORE_LP_LOCKED + SCORE_LP_DURATION_BONUS,
            format!(
                "lp effectively burned ({:.1}% visible circulation)",
                circulating_fraction * 100.0
            ),
        );
    }

    let locked_fraction = burned as f64 / supply as f64;
    let max = SCORE_LP_LOCKED + SCORE_LP_DURATION_BONUS;

    if locked_fraction >= LP_FULL_LOCK_FRACTION {
        RiskFactor::passed(
            FACTOR_LP_LOCK,
            SCORE_LP_LOCKED + SCORE_LP_DURATION_BONUS,
            max,
            format!("{:.1}% of lp locked", locked_fraction * 100.0),
        )
    } else if locked_fraction >= LP_PARTIAL_LOCK_FRACTION {
        RiskFactor::passed(
            FACTOR_LP_LOCK,
            SCORE_LP_LOCKED / 2,
            max,
            format!("{:.1}% of lp locked", locked_fraction * 100.0),
        )
    } else {
        RiskFactor::failed(
            FACTOR_LP_LOCK,
            0,
            max,
            format!("only {:.1}% of lp locked", locked_fraction * 100.0),
        )
    }
}

/// Creator-holdings factor: is the creator's associated account among
/// the top holders, and how big is its share?
pub fn creator_factor(
    creator: &Pubkey,
    mint: &Pubkey,
    holders: &[TokenAccountBalance],
    supply: u64,
) -> (RiskFactor, Option<String>) {
    let creator_ata = get_associated_token_address(creator, mint);
    let held = holders
        .iter()
        .find(|h| h.address == creator_ata)
        .map(|h| h.amount)
        .unwrap_or(0);

    if supply == 0 || held == 0 {
        return (
            RiskFactor::passed(FACTOR_CREATOR, 5, 5, "creator not among top holders"),
            None,
        );
    }

    let percent = held as f64 / supply as f64 * 100.0;
    if percent < CREATOR_OK_PERCENT {
        (
            RiskFactor::passed(
                FACTOR_CREATOR,
                5,
                5,
                format!("creator holds {percent:.1}%"),
            ),
            None,
        )
    } else if percent <= CREATOR_WARN_PERCENT {
        (
            RiskFactor::passed(FACTOR_CREATOR, 0, 5, format!("creator holds {percent:.1}%")),
            Some(format!("creator holds {percent:.1}% of supply")),
        )
    } else {
        (
            RiskFactor::failed(
                FACTOR_CREATOR,
                -10,
                5,
                format!("creator holds {percent:.1}%"),
            ),
            Some(format!("creator holds {percent:.1}% of supply")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holders(amounts: &[u64]) -> Vec<TokenAccountBalance> {
        amounts
            .iter()
            .map(|&amount| TokenAccountBalance {
                address: Pubkey::new_unique(),
                amount,
            })
            .collect()
    }

    #[test]
    fn test_shares_computation() {
        let list = holders(&[80, 40, 30, 20, 10, 5, 5, 5, 3, 2]);
        let shares = holder_shares(&list, 1_000);
        assert!((shares.top1 - 8.0).abs() < 1e-9);
        assert!((shares.top5 - 18.0).abs() < 1e-9);
        assert!((shares.top10 - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_concentration_bands() {
        assert_eq!(
            classify_concentration(&HolderShares {
                top1: 8.0,
                top5: 25.0,
                top10: 30.0
            }),
            Concentration::Low
        );
        assert_eq!(
            classify_concentration(&HolderShares {
                top1: 15.0,
                top5: 45.0,
                top10: 60.0
            }),
            Concentration::Medium
        );
        assert_eq!(
            classify_concentration(&HolderShares {
                top1: 35.0,
                top5: 70.0,
                top10: 80.0
            }),
            Concentration::High
        );
    }

    #[test]
    fn test_holder_penalty_per_point_with_cap() {
        let shares = HolderShares {
            top1: 27.0,
            top5: 40.0,
            top10: 50.0,
        };
        let factor = holder_factor(&shares, 20.0);
        assert!(!factor.passed);
        assert_eq!(factor.score, -7);

        let extreme = HolderShares {
            top1: 95.0,
            top5: 99.0,
            top10: 100.0,
        };
        let factor = holder_factor(&extreme, 20.0);
        assert_eq!(factor.score, -(HOLDER_PENALTY_CAP));
        // Past the critical bound this factor sinks the analysis.
        assert!(is_critical_failure(&factor));
    }

    #[test]
    fn test_holder_within_threshold_passes() {
        let shares = HolderShares {
            top1: 8.0,
            top5: 20.0,
            top10: 28.0,
        };
        let factor = holder_factor(&shares, 20.0);
        assert!(factor.passed);
        assert_eq!(factor.score, 0);
    }

    #[test]
    fn test_creator_classification() {
        let mint = Pubkey::new_unique();
        let creator = Pubkey::new_unique();
        let creator_ata = get_associated_token_address(&creator, &mint);

        let mut list = holders(&[100, 50]);
        list.push(TokenAccountBalance {
            address: creator_ata,
            amount: 300,
        });

        // 30% of supply: failed.
        let (factor, warning) = creator_factor(&creator, &mint, &list, 1_000);
        assert!(!factor.passed);
        assert!(warning.is_some());

        // 3%: fine.
        list.last_mut().unwrap().amount = 30;
        let (factor, warning) = creator_factor(&creator, &mint, &list, 1_000);
        assert!(factor.passed);
        assert_eq!(factor.score, 5);
        assert!(warning.is_none());

        // Creator absent entirely.
        let (factor, _) = creator_factor(&creator, &mint, &holders(&[10, 10]), 1_000);
        assert!(factor.passed);
    }
}
