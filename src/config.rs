//! Environment-sourced configuration.
//!
//! Every recognized variable is read in one pass; parse failures and
//! missing required values are collected and reported together so a
//! misconfigured deployment fails with a single line-by-line listing
//! instead of dying on the first bad key.

use std::env;
use std::str::FromStr;

use anyhow::{bail, Result};
use solana_sdk::pubkey::Pubkey;

use crate::types::DexKind;

/// One upstream RPC endpoint with its admission parameters.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub url: String,
    /// Websocket endpoint, when the provider exposes one.
    pub ws_url: Option<String>,
    /// Requests per second this endpoint is contracted for.
    pub rps_limit: u32,
    /// 1 is preferred, 3 is last resort.
    pub priority: u8,
}

#[derive(Debug, Clone, Default)]
pub struct GrpcConfig {
    pub endpoint: Option<String>,
    pub token: Option<String>,
    /// Probe the endpoint before committing to the gRPC path.
    pub auto_detect: bool,
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct TradingConfig {
    pub buy_amount_sol: f64,
    pub max_slippage_bps: u16,
    pub take_profit_percent: f64,
    pub stop_loss_percent: f64,
    pub max_position_size_sol: f64,
    pub max_concurrent_positions: usize,
    pub position_refresh_ms: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            buy_amount_sol: 0.1,
            max_slippage_bps: 500,
            take_profit_percent: 50.0,
            stop_loss_percent: 20.0,
            max_position_size_sol: 1.0,
            max_concurrent_positions: 3,
            position_refresh_ms: 500,
        }
    }
}

/// Tip sizing strategy for bundle submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TipStrategyKind {
    Fixed,
    Dynamic,
    Competitive,
}

impl FromStr for TipStrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "dynamic" => Ok(Self::Dynamic),
            "competitive" => Ok(Self::Competitive),
            other => Err(format!("unknown tip strategy '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BundleConfig {
    pub block_engine_url: String,
    pub tip_lamports: u64,
    pub tip_percent: f64,
    pub max_tip_lamports: u64,
    pub tip_strategy: TipStrategyKind,
    pub bundle_timeout_ms: u64,
    pub bundle_poll_interval_ms: u64,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            block_engine_url: "https://mainnet.block-engine.jito.wtf/api/v1".to_string(),
            tip_lamports: 100_000,
            tip_percent: 10.0,
            max_tip_lamports: 1_000_000,
            tip_strategy: TipStrategyKind::Fixed,
            bundle_timeout_ms: 60_000,
            bundle_poll_interval_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub min_liquidity_sol: f64,
    pub max_top_holder_percent: f64,
    pub score_threshold: u8,
    pub enable_honeypot_check: bool,
    pub max_tax_percent: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_liquidity_sol: 5.0,
            max_top_holder_percent: 20.0,
            score_threshold: 60,
            enable_honeypot_check: true,
            max_tax_percent: 10.0,
        }
    }
}

/// Settings for the shared RPC substrate.
#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub cache_ttl_ms: u64,
    pub cache_capacity: u64,
    pub max_concurrent_fetches: usize,
    pub fetch_timeout_ms: u64,
    pub polling_interval_ms: u64,
    /// Consecutive failures before a provider is benched.
    pub failure_threshold: u32,
    /// Seconds a benched provider sits out before retry.
    pub cooldown_secs: u64,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 10_000,
            cache_capacity: 10_000,
            max_concurrent_fetches: 2,
            fetch_timeout_ms: 5_000,
            polling_interval_ms: 2_000,
            failure_threshold: 3,
            cooldown_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SweepConfig {
    pub enabled: bool,
    pub cold_wallet: Option<Pubkey>,
    pub interval_ms: u64,
    /// SOL left behind for fees and future buys.
    pub keep_sol: f64,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub file: Option<String>,
    pub console: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            console: true,
        }
    }
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub providers: Vec<ProviderConfig>,
    pub grpc: GrpcConfig,
    pub private_key: String,
    pub trading: TradingConfig,
    pub bundle: BundleConfig,
    pub risk: RiskConfig,
    pub enabled_dexes: Vec<DexKind>,
    pub rpc: RpcSettings,
    pub sweep: SweepConfig,
    pub log: LogConfig,
    pub dry_run: bool,
    pub use_devnet: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            grpc: GrpcConfig::default(),
            private_key: String::new(),
            trading: TradingConfig::default(),
            bundle: BundleConfig::default(),
            risk: RiskConfig::default(),
            enabled_dexes: vec![DexKind::Pumpfun, DexKind::Raydium],
            rpc: RpcSettings::default(),
            sweep: SweepConfig::default(),
            log: LogConfig::default(),
            dry_run: false,
            use_devnet: false,
        }
    }
}

impl Config {
    /// Load from process environment. Returns every problem found, not
    /// just the first.
    pub fn from_env() -> Result<Self> {
        let mut r = EnvReader::default();

        let grpc = GrpcConfig {
            endpoint: r.opt("GRPC_ENDPOINT"),
            token: r.opt("GRPC_TOKEN"),
            auto_detect: r.parse_or("ENABLE_GRPC_AUTO_DETECT", true),
            probe_timeout_ms: r.parse_or("GRPC_PROBE_TIMEOUT_MS", 3_000u64),
        };

        let use_devnet = r.parse_or("USE_DEVNET", false);
        let providers = Self::build_providers(&mut r, &grpc, use_devnet);

        let private_key = r.required("PRIVATE_KEY");

        let trading = TradingConfig {
            buy_amount_sol: r.parse_or("BUY_AMOUNT_SOL", 0.1),
            max_slippage_bps: r.parse_or("MAX_SLIPPAGE_BPS", 500u16),
            take_profit_percent: r.parse_or("TAKE_PROFIT_PERCENT", 50.0),
            stop_loss_percent: r.parse_or("STOP_LOSS_PERCENT", 20.0),
            max_position_size_sol: r.parse_or("MAX_POSITION_SIZE_SOL", 1.0),
            max_concurrent_positions: r.parse_or("MAX_CONCURRENT_POSITIONS", 3usize),
            position_refresh_ms: r.parse_or("POSITION_REFRESH_MS", 500u64),
        };

        let bundle = BundleConfig {
            block_engine_url: r
                .opt("JITO_BLOCK_ENGINE_URL")
                .unwrap_or_else(|| BundleConfig::default().block_engine_url),
            tip_lamports: r.parse_or("JITO_TIP_LAMPORTS", 100_000u64),
            tip_percent: r.parse_or("JITO_TIP_PERCENT", 10.0),
            max_tip_lamports: r.parse_or("JITO_MAX_TIP_LAMPORTS", 1_000_000u64),
            tip_strategy: r.parse_or("JITO_TIP_STRATEGY", TipStrategyKind::Fixed),
            bundle_timeout_ms: r.parse_or("BUNDLE_TIMEOUT_MS", 60_000u64),
            bundle_poll_interval_ms: r.parse_or("BUNDLE_POLL_INTERVAL_MS", 2_000u64),
        };

        let risk = RiskConfig {
            min_liquidity_sol: r.parse_or("MIN_LIQUIDITY_SOL", 5.0),
            max_top_holder_percent: r.parse_or("MAX_TOP_HOLDER_PERCENT", 20.0),
            score_threshold: r.parse_or("RISK_SCORE_THRESHOLD", 60u8),
            enable_honeypot_check: r.parse_or("ENABLE_HONEYPOT_CHECK", true),
            max_tax_percent: r.parse_or("MAX_TAX_PERCENT", 10.0),
        };

        let mut enabled_dexes = Vec::new();
        if r.parse_or("ENABLE_RAYDIUM", true) {
            enabled_dexes.push(DexKind::Raydium);
        }
        if r.parse_or("ENABLE_PUMPFUN", true) {
            enabled_dexes.push(DexKind::Pumpfun);
        }
        if r.parse_or("ENABLE_ORCA", false) {
            enabled_dexes.push(DexKind::Orca);
        }
        if enabled_dexes.is_empty() {
            r.errors
                .push("at least one of ENABLE_RAYDIUM / ENABLE_PUMPFUN / ENABLE_ORCA must be true".to_string());
        }

        let rpc = RpcSettings {
            cache_ttl_ms: r.parse_or("RPC_CACHE_TTL_MS", 10_000u64),
            cache_capacity: r.parse_or("RPC_CACHE_CAPACITY", 10_000u64),
            max_concurrent_fetches: r.parse_or("MAX_CONCURRENT_FETCHES", 2usize),
            fetch_timeout_ms: r.parse_or("FETCH_TIMEOUT_MS", 5_000u64),
            polling_interval_ms: r.parse_or("RPC_POLLING_INTERVAL_MS", 2_000u64),
            failure_threshold: r.parse_or("RPC_FAILURE_THRESHOLD", 3u32),
            cooldown_secs: r.parse_or("RPC_COOLDOWN_SECS", 30u64),
        };

        let sweep_enabled = r.parse_or("ENABLE_AUTO_SWEEP", false);
        let cold_wallet = r.opt("COLD_WALLET_ADDRESS").and_then(|s| {
            match Pubkey::from_str(&s) {
                Ok(pk) => Some(pk),
                Err(e) => {
                    r.errors
                        .push(format!("COLD_WALLET_ADDRESS: invalid address: {e}"));
                    None
                }
            }
        });
        if sweep_enabled && cold_wallet.is_none() {
            r.errors
                .push("ENABLE_AUTO_SWEEP=true requires a valid COLD_WALLET_ADDRESS".to_string());
        }
        let sweep = SweepConfig {
            enabled: sweep_enabled,
            cold_wallet,
            interval_ms: r.parse_or("SWEEP_INTERVAL_MS", 60_000u64),
            keep_sol: r.parse_or("SWEEP_KEEP_SOL", 0.5),
        };

        let log = LogConfig {
            level: r.opt("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            file: r.opt("LOG_FILE"),
            console: r.parse_or("LOG_CONSOLE", true),
        };

        let dry_run = r.parse_or("DRY_RUN", false);

        if providers.is_empty() {
            r.errors.push(
                "no RPC providers configured: set HELIUS_API_KEY, GRPC_TOKEN or BACKUP_RPC_URLS"
                    .to_string(),
            );
        }

        if !r.errors.is_empty() {
            bail!("invalid configuration:\n  - {}", r.errors.join("\n  - "));
        }

        Ok(Self {
            providers,
            grpc,
            private_key,
            trading,
            bundle,
            risk,
            enabled_dexes,
            rpc,
            sweep,
            log,
            dry_run,
            use_devnet,
        })
    }

    /// Assemble the provider table from the endpoint-shaped variables.
    fn build_providers(r: &mut EnvReader, grpc: &GrpcConfig, devnet: bool) -> Vec<ProviderConfig> {
        let mut providers = Vec::new();

        if let Some(key) = r.opt("HELIUS_API_KEY") {
            let cluster = if devnet { "devnet" } else { "mainnet" };
            providers.push(ProviderConfig {
                name: "helius".to_string(),
                url: format!("https://{cluster}.helius-rpc.com/?api-key={key}"),
                ws_url: Some(format!("wss://{cluster}.helius-rpc.com/?api-key={key}")),
                rps_limit: r.parse_or("HELIUS_RPC_RPS", 10u32),
                priority: r.parse_or("HELIUS_PRIORITY", 1u8),
            });
        }

        // A Shyft gRPC token doubles as an RPC key.
        if let Some(token) = grpc.token.as_deref() {
            let is_shyft = grpc
                .endpoint
                .as_deref()
                .map(|e| e.contains("shyft"))
                .unwrap_or(false);
            if is_shyft {
                providers.push(ProviderConfig {
                    name: "shyft".to_string(),
                    url: format!("https://rpc.shyft.to?api_key={token}"),
                    ws_url: None,
                    rps_limit: r.parse_or("SHYFT_RPC_RPS", 10u32),
                    priority: r.parse_or("SHYFT_PRIORITY", 2u8),
                });
            }
        }

        for (i, url) in r
            .opt("BACKUP_RPC_URLS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
            .into_iter()
            .enumerate()
        {
            providers.push(ProviderConfig {
                name: format!("backup-{i}"),
                url,
                ws_url: None,
                rps_limit: 5,
                priority: 3,
            });
        }

        // The public endpoint is always present as a last resort.
        let public = if devnet {
            "https://api.devnet.solana.com"
        } else {
            "https://api.mainnet-beta.solana.com"
        };
        providers.push(ProviderConfig {
            name: "solana".to_string(),
            url: public.to_string(),
            ws_url: Some(public.replace("https", "wss")),
            rps_limit: 5,
            priority: r.parse_or("SOLANA_PRIORITY", 3u8),
        });

        providers
    }

    /// First configured websocket endpoint, by provider priority.
    pub fn websocket_url(&self) -> Option<String> {
        let mut with_ws: Vec<&ProviderConfig> =
            self.providers.iter().filter(|p| p.ws_url.is_some()).collect();
        with_ws.sort_by_key(|p| p.priority);
        with_ws.first().and_then(|p| p.ws_url.clone())
    }
}

/// Accumulates env lookups and their failures.
#[derive(Default)]
struct EnvReader {
    errors: Vec<String>,
}

impl EnvReader {
    fn opt(&mut self, key: &str) -> Option<String> {
        env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn required(&mut self, key: &str) -> String {
        match self.opt(key) {
            Some(v) => v,
            None => {
                self.errors.push(format!("{key}: required but not set"));
                String::new()
            }
        }
    }

    fn parse_or<T>(&mut self, key: &str, default: T) -> T
    where
        T: FromStr + 'static,
        T::Err: std::fmt::Display,
    {
        match self.opt(key) {
            None => default,
            Some(raw) => match parse_flexible::<T>(&raw) {
                Ok(v) => v,
                Err(e) => {
                    self.errors.push(format!("{key}: cannot parse '{raw}': {e}"));
                    default
                }
            },
        }
    }
}

/// `FromStr` with forgiving booleans ("1"/"yes"/"on").
fn parse_flexible<T>(raw: &str) -> Result<T, String>
where
    T: FromStr + 'static,
    T::Err: std::fmt::Display,
{
    if std::any::TypeId::of::<T>() == std::any::TypeId::of::<bool>() {
        let lowered = raw.to_ascii_lowercase();
        let normalized = match lowered.as_str() {
            "1" | "yes" | "on" | "true" => "true",
            "0" | "no" | "off" | "false" => "false",
            other => other,
        };
        return normalized.parse::<T>().map_err(|e| e.to_string());
    }
    raw.parse::<T>().map_err(|e| e.to_string())
}
