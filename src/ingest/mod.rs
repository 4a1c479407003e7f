//! Multi-source event ingestion.
//!
//! One source is active at a time. Startup walks the capability chain:
//! gRPC streaming (optionally probed first), then WebSocket log
//! subscriptions, then signature polling — polling always succeeds.
//! A gRPC stream that dies mid-run hands over to WebSocket exactly
//! once; WebSocket reconnects itself with exponential backoff.

pub mod dedup;
pub mod grpc;
pub mod polling;
pub mod websocket;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use solana_sdk::commitment_config::CommitmentConfig;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dex::DecoderRegistry;
use crate::rpc::RpcManager;
use crate::types::{unix_now, DexKind, PoolEvent};

pub use dedup::SignatureSet;

/// Which source is currently feeding the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    Grpc,
    Websocket,
    Polling,
}

/// Live counters for the ingestion layer.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub events_received: AtomicU64,
    pub pools_detected: AtomicU64,
    pub errors: AtomicU64,
    pub last_event_unix: AtomicU64,
}

impl IngestStats {
    pub fn record_event(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
        self.last_event_unix.store(unix_now(), Ordering::Relaxed);
    }

    pub fn record_pool(&self) {
        self.pools_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Hard ceiling on concurrent transaction fetches. At capacity new
/// candidates are dropped, never queued — a backlog is worse than a
/// missed tail-end signal.
#[derive(Debug)]
pub struct FetchGate {
    pending: Arc<AtomicUsize>,
    max: usize,
}

pub struct FetchPermit {
    pending: Arc<AtomicUsize>,
}

impl FetchGate {
    pub fn new(max: usize) -> Self {
        Self {
            pending: Arc::new(AtomicUsize::new(0)),
            max: max.max(1),
        }
    }

    pub fn try_enter(&self) -> Option<FetchPermit> {
        let mut current = self.pending.load(Ordering::SeqCst);
        loop {
            if current >= self.max {
                return None;
            }
            match self.pending.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Some(FetchPermit {
                        pending: self.pending.clone(),
                    })
                }
                Err(observed) => current = observed,
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

impl Drop for FetchPermit {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Shared context every source runs against.
pub(crate) struct SourceContext {
    pub rpc: Arc<RpcManager>,
    pub registry: Arc<DecoderRegistry>,
    pub event_tx: mpsc::Sender<PoolEvent>,
    pub dedup: Mutex<SignatureSet>,
    pub gate: FetchGate,
    pub stats: Arc<IngestStats>,
    pub fetch_timeout: Duration,
}

impl SourceContext {
    /// Fetch a candidate transaction (bounded, with timeout), decode it
    /// and forward any pool event. Used by the WebSocket and polling
    /// paths; the permit is held for the duration of the fetch.
    pub async fn fetch_and_decode(&self, signature: String, _permit: FetchPermit) {
        let fetched = match tokio::time::timeout(
            self.fetch_timeout,
            self.rpc
                .get_parsed_transaction(&signature, CommitmentConfig::confirmed()),
        )
        .await
        {
            Err(_) => {
                debug!(%signature, "transaction fetch timed out");
                self.stats.record_error();
                return;
            }
            Ok(Err(e)) => {
                debug!(%signature, error = %e, "transaction fetch failed");
                self.stats.record_error();
                return;
            }
            Ok(Ok(None)) => return,
            Ok(Ok(Some(tx))) => tx,
        };

        if let Some(event) =
            self.registry
                .parse_transaction(&signature, &fetched.instructions, fetched.slot)
        {
            self.emit(event).await;
        }
    }

    pub async fn emit(&self, event: PoolEvent) {
        self.stats.record_pool();
        if self.event_tx.send(event).await.is_err() {
            warn!("pool event channel closed, dropping event");
        }
    }

    /// True when the signature has not been seen before.
    pub async fn first_sighting(&self, signature: &str) -> bool {
        self.dedup.lock().await.insert(signature)
    }
}

pub struct IngestCoordinator {
    ctx: Arc<SourceContext>,
    dexes: Vec<DexKind>,
    grpc_endpoint: Option<String>,
    grpc_token: Option<String>,
    grpc_auto_detect: bool,
    grpc_probe_timeout: Duration,
    websocket_url: Option<String>,
    polling_interval: Duration,
    use_devnet: bool,
    mode: watch::Sender<Option<IngestMode>>,
}

impl IngestCoordinator {
    pub fn new(
        config: &Config,
        rpc: Arc<RpcManager>,
        registry: Arc<DecoderRegistry>,
        event_tx: mpsc::Sender<PoolEvent>,
    ) -> Self {
        let stats = Arc::new(IngestStats::default());
        let ctx = Arc::new(SourceContext {
            rpc,
            registry,
            event_tx,
            dedup: Mutex::new(SignatureSet::default()),
            gate: FetchGate::new(config.rpc.max_concurrent_fetches),
            stats,
            fetch_timeout: Duration::from_millis(config.rpc.fetch_timeout_ms),
        });
        let (mode, _) = watch::channel(None);

        Self {
            ctx,
            dexes: config.enabled_dexes.clone(),
            grpc_endpoint: config.grpc.endpoint.clone(),
            grpc_token: config.grpc.token.clone(),
            grpc_auto_detect: config.grpc.auto_detect,
            grpc_probe_timeout: Duration::from_millis(config.grpc.probe_timeout_ms),
            websocket_url: config.websocket_url(),
            polling_interval: Duration::from_millis(config.rpc.polling_interval_ms),
            use_devnet: config.use_devnet,
            mode,
        }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.ctx.stats.clone()
    }

    pub fn mode(&self) -> watch::Receiver<Option<IngestMode>> {
        self.mode.subscribe()
    }

    /// Drive the source chain until shutdown. Never returns an error:
    /// the last link (polling) runs on any RPC we have.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let heartbeat = {
            let stats = self.ctx.stats.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(60));
                ticker.tick().await; // immediate first tick is noise
                loop {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                return;
                            }
                        }
                        _ = ticker.tick() => {
                            info!(
                                events = stats.events_received.load(Ordering::Relaxed),
                                pools = stats.pools_detected.load(Ordering::Relaxed),
                                errors = stats.errors.load(Ordering::Relaxed),
                                last_event_unix = stats.last_event_unix.load(Ordering::Relaxed),
                                "ingestion heartbeat"
                            );
                        }
                    }
                }
            })
        };

        let mut mode = self.select_initial_mode().await;

        loop {
            if *shutdown.borrow() {
                break;
            }
            let _ = self.mode.send(Some(mode));
            info!(mode = ?mode, "ingestion source active");

            match mode {
                IngestMode::Grpc => {
                    let endpoint = self
                        .grpc_endpoint
                        .clone()
                        .expect("grpc mode requires endpoint");
                    let result = grpc::run_stream(
                        &endpoint,
                        self.grpc_token.as_deref(),
                        &self.dexes,
                        &self.ctx,
                        &mut shutdown,
                    )
                    .await;
                    if *shutdown.borrow() {
                        break;
                    }
                    if let Err(e) = result {
                        warn!(error = %e, "grpc stream ended, falling back to websocket");
                        self.ctx.stats.record_error();
                    }
                    // gRPC hands over once; it is not retried this run.
                    mode = IngestMode::Websocket;
                }
                IngestMode::Websocket => {
                    match self.websocket_url.as_deref() {
                        Some(url) => {
                            let result = websocket::run(
                                url,
                                &self.dexes,
                                &self.ctx,
                                &mut shutdown,
                            )
                            .await;
                            if *shutdown.borrow() {
                                break;
                            }
                            if let Err(e) = result {
                                warn!(error = %e, "websocket source unavailable, falling back to polling");
                                self.ctx.stats.record_error();
                            }
                        }
                        None => {
                            warn!("no websocket endpoint configured, falling back to polling");
                        }
                    }
                    mode = IngestMode::Polling;
                }
                IngestMode::Polling => {
                    polling::run(
                        &self.dexes,
                        &self.ctx,
                        self.polling_interval,
                        &mut shutdown,
                    )
                    .await;
                    break;
                }
            }
        }

        heartbeat.abort();
        info!("ingestion coordinator stopped");
    }

    async fn select_initial_mode(&self) -> IngestMode {
        if self.use_devnet {
            // Devnet block-stream endpoints are not a thing; go straight
            // to WebSocket.
            debug!("devnet mode, skipping grpc");
            return IngestMode::Websocket;
        }

        let endpoint = match self.grpc_endpoint.as_deref() {
            Some(e) => e,
            None => return IngestMode::Websocket,
        };

        if self.grpc_auto_detect {
            let capable = grpc::probe(
                endpoint,
                self.grpc_token.as_deref(),
                self.grpc_probe_timeout,
            )
            .await;
            if !capable {
                warn!("grpc capability probe failed, endpoint disabled for this run");
                return IngestMode::Websocket;
            }
        }

        IngestMode::Grpc
    }
}
