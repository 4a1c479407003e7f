//! solsniper — latency-focused Solana liquidity-pool sniper.
//!
//! Pipeline shape: a multi-source ingestion layer (gRPC stream,
//! WebSocket logs, signature polling) feeds typed pool events into a
//! tiered risk analyzer; passing candidates are bought through a
//! bundle executor with a direct-RPC fallback, and open positions are
//! tracked until a take-profit or stop-loss fires. Every chain read
//! and send flows through one multi-provider RPC manager.

pub mod config;
pub mod dex;
pub mod executor;
pub mod ingest;
pub mod metrics;
pub mod orchestrator;
pub mod position;
pub mod risk;
pub mod rpc;
pub mod sweep;
pub mod types;
pub mod wallet;

pub use config::Config;
pub use orchestrator::Orchestrator;
pub use types::{DexKind, PoolEvent, SwapRequest, SwapResult, SwapSide};
