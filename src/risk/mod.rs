//! Tiered risk analysis.
//!
//! `quick_check` answers in one or two reads for the paths that cannot
//! wait; `analyze` runs the full three-phase pipeline: fast fatal
//! signals first (authorities, liquidity, extensions), then holder and
//! LP analysis, then the sell simulation. Results are cached per mint;
//! mints that fail critically land on the blacklist.

pub mod authority;
pub mod holders;
pub mod liquidity;
pub mod simulation;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info, instrument, warn};

use crate::config::RiskConfig;
use crate::rpc::RpcManager;
use crate::types::{DexKind, PoolEvent};

pub use types::{RiskAnalysis, RiskFactor, Viability};

/// Analysis results are reused for this long per mint.
const ANALYSIS_TTL: Duration = Duration::from_secs(5 * 60);
const ANALYSIS_CAPACITY: u64 = 2_048;
/// Blacklist: always populated, day-scoped, bounded.
const BLACKLIST_TTL: Duration = Duration::from_secs(24 * 3_600);
const BLACKLIST_CAPACITY: u64 = 10_000;
const WHITELIST_CAPACITY: u64 = 1_000;

/// Everything the analyzer needs to know about a candidate pool.
#[derive(Debug, Clone)]
pub struct RiskRequest {
    pub mint: Pubkey,
    pub pool: Pubkey,
    pub dex: DexKind,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub lp_mint: Option<Pubkey>,
    pub creator: Option<Pubkey>,
}

impl RiskRequest {
    /// Build a request from a new-pool event. Other event kinds carry
    /// nothing to analyze.
    pub fn from_event(event: &PoolEvent) -> Option<Self> {
        match event {
            PoolEvent::NewPool {
                dex,
                mint,
                pool,
                base_mint,
                quote_mint,
                base_vault,
                quote_vault,
                lp_mint,
                ..
            } => Some(Self {
                mint: *mint,
                pool: *pool,
                dex: *dex,
                base_mint: *base_mint,
                quote_mint: *quote_mint,
                base_vault: *base_vault,
                quote_vault: *quote_vault,
                lp_mint: *lp_mint,
                creator: None,
            }),
            _ => None,
        }
    }
}

pub struct RiskAnalyzer {
    rpc: Arc<RpcManager>,
    config: RiskConfig,
    wallet: Pubkey,
    analyses: Cache<String, RiskAnalysis>,
    blacklist: Cache<String, String>,
    whitelist: Cache<String, ()>,
}

impl RiskAnalyzer {
    pub fn new(rpc: Arc<RpcManager>, config: RiskConfig, wallet: Pubkey) -> Self {
        Self {
            rpc,
            config,
            wallet,
            analyses: Cache::builder()
                .max_capacity(ANALYSIS_CAPACITY)
                .time_to_live(ANALYSIS_TTL)
                .build(),
            blacklist: Cache::builder()
                .max_capacity(BLACKLIST_CAPACITY)
                .time_to_live(BLACKLIST_TTL)
                .build(),
            whitelist: Cache::builder().max_capacity(WHITELIST_CAPACITY).build(),
        }
    }

    pub fn blacklist_mint(&self, mint: &Pubkey, reason: impl Into<String>) {
        self.blacklist.insert(mint.to_string(), reason.into());
    }

    pub fn whitelist_mint(&self, mint: &Pubkey) {
        self.whitelist.insert(mint.to_string(), ());
    }

    pub fn is_blacklisted(&self, mint: &Pubkey) -> bool {
        self.blacklist.contains_key(&mint.to_string())
    }

    /// Ultra-fast viability gate: list membership, sell-denying
    /// extensions, liquidity floor. No scoring.
    #[instrument(skip(self, request), fields(mint = %request.mint))]
    pub async fn quick_check(&self, request: &RiskRequest) -> Viability {
        let key = request.mint.to_string();

        if self.whitelist.contains_key(&key) {
            return Viability::ok();
        }
        if let Some(reason) = self.blacklist.get(&key) {
            return Viability::rejected(format!("blacklisted: {reason}"));
        }

        if let Ok(Some(blob)) = self.rpc.get_account_info(&request.mint).await {
            if let Some(info) = authority::parse_mint(&blob.owner, &blob.data) {
                if authority::has_fatal_extension(&info) {
                    return Viability::rejected("critical token extensions");
                }
            }
        }

        let (factor, liquidity_sol) = liquidity::liquidity_factor(
            &self.rpc,
            &request.quote_mint,
            &request.quote_vault,
            self.config.min_liquidity_sol,
        )
        .await;
        if !factor.passed {
            return Viability::rejected(format!(
                "liquidity {liquidity_sol:.2} SOL below minimum {:.2}",
                self.config.min_liquidity_sol
            ));
        }

        Viability::ok()
    }

    /// Full three-phase analysis, cached per mint.
    #[instrument(skip(self, request), fields(mint = %request.mint, dex = %request.dex))]
    pub async fn analyze(&self, request: &RiskRequest) -> RiskAnalysis {
        let key = request.mint.to_string();

        if let Some(cached) = self.analyses.get(&key) {
            debug!("analysis cache hit");
            return cached;
        }

        if let Some(reason) = self.blacklist.get(&key) {
            return types::build_analysis(
                vec![RiskFactor::failed(
                    types::FACTOR_BLACKLIST,
                    -100,
                    0,
                    format!("blacklisted: {reason}"),
                )],
                Vec::new(),
            );
        }

        let analysis = self.run_phases(request).await;

        if analysis.factors.iter().any(types::is_critical_failure) {
            let reason = analysis
                .factors
                .iter()
                .find(|f| types::is_critical_failure(f))
                .map(|f| f.details.clone())
                .unwrap_or_else(|| "critical factor failed".to_string());
            self.blacklist.insert(key.clone(), reason);
        }

        self.analyses.insert(key, analysis.clone());
        info!(
            score = analysis.score,
            passed = analysis.passed,
            factors = analysis.factors.len(),
            "risk analysis complete"
        );
        analysis
    }

    async fn run_phases(&self, request: &RiskRequest) -> RiskAnalysis {
        let mut factors: Vec<RiskFactor> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        // Phase 1: one mint read drives the authority and extension
        // factors; the liquidity read runs alongside it.
        let (mint_read, (liquidity_factor, _liquidity_sol)) = tokio::join!(
            self.rpc.get_account_info(&request.mint),
            liquidity::liquidity_factor(
                &self.rpc,
                &request.quote_mint,
                &request.quote_vault,
                self.config.min_liquidity_sol,
            )
        );

        match mint_read {
            Ok(Some(blob)) => match authority::parse_mint(&blob.owner, &blob.data) {
                Some(info) => {
                    factors.extend(authority::authority_factors(&info));
                    let (ext_factors, ext_warnings) = authority::extension_factors(&info);
                    factors.extend(ext_factors);
                    warnings.extend(ext_warnings);
                }
                None => factors.push(RiskFactor::failed(
                    types::FACTOR_MINT_AUTHORITY,
                    0,
                    types::SCORE_MINT_AUTHORITY_REVOKED,
                    "mint account is not a token mint",
                )),
            },
            Ok(None) => factors.push(RiskFactor::failed(
                types::FACTOR_MINT_AUTHORITY,
                0,
                types::SCORE_MINT_AUTHORITY_REVOKED,
                "mint account missing",
            )),
            Err(e) => factors.push(RiskFactor::failed(
                types::FACTOR_MINT_AUTHORITY,
                0,
                types::SCORE_MINT_AUTHORITY_REVOKED,
                format!("mint read failed: {e}"),
            )),
        }
        factors.push(liquidity_factor);

        // Fast fatal signals short-circuit the rest of the pipeline.
        if self.phase_one_terminal(&factors) {
            warn!("phase-1 fatal signal, skipping deep analysis");
            return types::build_analysis(factors, warnings);
        }

        // Phase 2: holder and LP structure.
        let (holder_factor, top_holders, supply) = holders::holder_distribution(
            &self.rpc,
            &request.mint,
            self.config.max_top_holder_percent,
        )
        .await;
        factors.push(holder_factor);

        if let Some(lp_mint) = &request.lp_mint {
            factors.push(holders::lp_lock_factor(&self.rpc, lp_mint).await);
        }

        if let Some(creator) = &request.creator {
            let (factor, warning) =
                holders::creator_factor(creator, &request.mint, &top_holders, supply);
            factors.push(factor);
            warnings.extend(warning);
        }

        // Phase 3: sell simulation.
        if self.config.enable_honeypot_check {
            let probe = simulation::sell_probe(
                &self.rpc,
                &self.wallet,
                request.dex,
                &request.mint,
                &request.pool,
                self.config.max_tax_percent,
            )
            .await;
            factors.push(probe.factor);
            warnings.extend(probe.warnings);
            if probe.has_max_tx {
                warnings.push("max transaction cap active".to_string());
            }
        }

        types::build_analysis(factors, warnings)
    }

    /// Phase-1 signals that make further chain reads pointless.
    fn phase_one_terminal(&self, factors: &[RiskFactor]) -> bool {
        factors.iter().any(|f| {
            !f.passed
                && matches!(
                    f.name.as_str(),
                    types::FACTOR_MINT_AUTHORITY
                        | types::FACTOR_FREEZE_AUTHORITY
                        | types::FACTOR_LIQUIDITY
                        | types::FACTOR_CRITICAL_EXTENSIONS
                )
        })
    }
}
