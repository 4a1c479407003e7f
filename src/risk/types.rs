//! Risk factors, analysis results and the scoring model.

use serde::{Deserialize, Serialize};

use crate::types::unix_now;

// Factor names. The critical set is matched on these.
pub const FACTOR_MINT_AUTHORITY: &str = "mint_authority";
pub const FACTOR_FREEZE_AUTHORITY: &str = "freeze_authority";
pub const FACTOR_LIQUIDITY: &str = "liquidity";
pub const FACTOR_EXTENSIONS: &str = "token_extensions";
pub const FACTOR_CRITICAL_EXTENSIONS: &str = "critical_extensions";
pub const FACTOR_HOLDER_DISTRIBUTION: &str = "holder_distribution";
pub const FACTOR_LP_LOCK: &str = "lp_lock";
pub const FACTOR_CREATOR: &str = "creator_holdings";
pub const FACTOR_HONEYPOT: &str = "honeypot";
pub const FACTOR_BLACKLIST: &str = "blacklist";

// Scoring weights. Initial values; tune from live hit rates.
pub const SCORE_MINT_AUTHORITY_REVOKED: i32 = 20;
pub const SCORE_FREEZE_AUTHORITY_REVOKED: i32 = 15;
pub const SCORE_LP_LOCKED: i32 = 25;
pub const SCORE_LP_DURATION_BONUS: i32 = 5;
pub const SCORE_LIQUIDITY: i32 = 10;
/// Liquidity at or above this many SOL earns the full liquidity score;
/// below it the score is prorated.
pub const LIQUIDITY_FULL_SOL: f64 = 10.0;
pub const SCORE_HONEYPOT_PASSED: i32 = 15;
pub const SCORE_SPL_STANDARD: i32 = 10;
pub const SCORE_BENIGN_TOKEN_2022: i32 = 15;
/// Top-holder overruns cost one point per percentage point, capped.
pub const HOLDER_PENALTY_CAP: i32 = 20;
/// Minimum normalized score for a pass.
pub const PASS_SCORE: u8 = 50;
/// A holder-distribution factor below this is treated as critical.
pub const HOLDER_CRITICAL_SCORE: i32 = -10;

/// One scored signal about a candidate token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub score: i32,
    pub max_score: i32,
    pub passed: bool,
    pub details: String,
}

impl RiskFactor {
    pub fn passed(name: &str, score: i32, max_score: i32, details: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            score,
            max_score,
            passed: true,
            details: details.into(),
        }
    }

    pub fn failed(name: &str, score: i32, max_score: i32, details: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            score,
            max_score,
            passed: false,
            details: details.into(),
        }
    }
}

/// Aggregated verdict over all factors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAnalysis {
    /// Normalized to [0, 100].
    pub score: u8,
    pub passed: bool,
    pub factors: Vec<RiskFactor>,
    pub warnings: Vec<String>,
    pub timestamp: u64,
}

/// A factor failure that sinks the candidate regardless of total score.
pub fn is_critical_failure(factor: &RiskFactor) -> bool {
    if factor.passed {
        return false;
    }
    match factor.name.as_str() {
        FACTOR_HONEYPOT | FACTOR_MINT_AUTHORITY | FACTOR_CRITICAL_EXTENSIONS
        | FACTOR_BLACKLIST => true,
        FACTOR_HOLDER_DISTRIBUTION => factor.score < HOLDER_CRITICAL_SCORE,
        _ => false,
    }
}

/// `round(100 · Σscore / max(Σmax_score, 1))`, clamped to [0, 100].
pub fn normalize_score(factors: &[RiskFactor]) -> u8 {
    let total: i64 = factors.iter().map(|f| f.score as i64).sum();
    let max: i64 = factors.iter().map(|f| f.max_score as i64).sum::<i64>().max(1);
    let normalized = ((100.0 * total as f64) / max as f64).round();
    normalized.clamp(0.0, 100.0) as u8
}

/// Build the final analysis: passed iff no critical failure and the
/// normalized score clears the bar.
pub fn build_analysis(factors: Vec<RiskFactor>, warnings: Vec<String>) -> RiskAnalysis {
    let score = normalize_score(&factors);
    let critical_failed = factors.iter().any(is_critical_failure);
    RiskAnalysis {
        score,
        passed: !critical_failed && score >= PASS_SCORE,
        factors,
        warnings,
        timestamp: unix_now(),
    }
}

/// Outcome of the ultra-fast pre-trade check.
#[derive(Debug, Clone, PartialEq)]
pub struct Viability {
    pub viable: bool,
    pub reason: Option<String>,
}

impl Viability {
    pub fn ok() -> Self {
        Self {
            viable: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            viable: false,
            reason: Some(reason.into()),
        }
    }
}
