//! Multi-provider RPC manager.
//!
//! Every chain read and send in the pipeline goes through here. The
//! manager keeps one record per endpoint (bucket, health, stats),
//! serves account reads cache-first with in-flight coalescing, and
//! fails over across healthy providers in priority order, preferring
//! the endpoint with the most rate-limit headroom inside a band.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::cache::{AccountBlob, AccountCache};
use super::coalescer::RequestCoalescer;
use super::provider::ProviderRecord;
use super::rate_limiter::Priority;
use super::transport::{
    FetchedTransaction, RpcTransport, SignatureSummary, SimulationOutcome, SolanaTransport,
    TokenAccountBalance, TokenSupply,
};
use crate::config::{ProviderConfig, RpcSettings};

/// Wire batch ceiling for `getMultipleAccounts`.
const MAX_ACCOUNTS_PER_BATCH: usize = 100;

#[derive(Debug, Error)]
pub enum RpcManagerError {
    #[error("no RPC providers configured")]
    NoProvidersConfigured,
    #[error("all {attempts} providers failed, last error: {last_error}")]
    AllProvidersFailed { attempts: usize, last_error: String },
}

pub struct RpcManager {
    providers: Vec<Arc<ProviderRecord>>,
    cache: AccountCache,
    coalescer: Arc<RequestCoalescer<Option<Arc<AccountBlob>>>>,
}

impl RpcManager {
    /// Build with production transports, one per configured endpoint.
    pub fn from_config(providers: &[ProviderConfig], settings: &RpcSettings) -> Result<Self> {
        let timeout = Duration::from_millis(settings.fetch_timeout_ms.max(1_000));
        let pairs: Vec<(ProviderConfig, Arc<dyn RpcTransport>)> = providers
            .iter()
            .map(|p| {
                let transport: Arc<dyn RpcTransport> =
                    Arc::new(SolanaTransport::new(p.url.clone(), timeout));
                (p.clone(), transport)
            })
            .collect();
        Self::with_transports(pairs, settings)
    }

    /// Build over caller-supplied transports (tests inject mocks here).
    pub fn with_transports(
        providers: Vec<(ProviderConfig, Arc<dyn RpcTransport>)>,
        settings: &RpcSettings,
    ) -> Result<Self> {
        if providers.is_empty() {
            return Err(RpcManagerError::NoProvidersConfigured.into());
        }

        let cooldown = Duration::from_secs(settings.cooldown_secs);
        let records = providers
            .into_iter()
            .map(|(config, transport)| {
                Arc::new(ProviderRecord::new(
                    &config,
                    transport,
                    settings.failure_threshold,
                    cooldown,
                ))
            })
            .collect();

        Ok(Self {
            providers: records,
            cache: AccountCache::new(
                settings.cache_capacity,
                Duration::from_millis(settings.cache_ttl_ms),
            ),
            coalescer: Arc::new(RequestCoalescer::new()),
        })
    }

    /// Eligible providers sorted by priority, then available tokens
    /// (descending) inside a band. The sort is stable, so equal
    /// candidates keep their configured order.
    async fn candidates(&self) -> Vec<Arc<ProviderRecord>> {
        let mut out = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            if provider.is_eligible().await {
                let tokens = provider.bucket.available_tokens().await;
                out.push((provider.clone(), tokens));
            }
        }
        out.sort_by(|a, b| {
            a.0.priority.cmp(&b.0.priority).then(
                b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        out.into_iter().map(|(p, _)| p).collect()
    }

    /// Run `f` against providers in selection order until one succeeds.
    /// Each provider is tried at most once per round.
    async fn with_failover<T, Fut>(
        &self,
        priority: Priority,
        op: &str,
        f: impl Fn(Arc<dyn RpcTransport>) -> Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let candidates = self.candidates().await;
        let attempts = candidates.len();
        let mut last_error = "no eligible providers".to_string();

        for provider in candidates {
            provider.bucket.acquire(priority).await;
            match f(provider.transport.clone()).await {
                Ok(value) => {
                    provider.record_success().await;
                    return Ok(value);
                }
                Err(e) => {
                    warn!(provider = %provider.name, %op, error = %e, "provider call failed, failing over");
                    provider.record_failure().await;
                    last_error = e.to_string();
                }
            }
        }

        Err(RpcManagerError::AllProvidersFailed {
            attempts,
            last_error,
        }
        .into())
    }

    /// Cache-first, coalesced account read.
    #[instrument(skip(self), fields(address = %address))]
    pub async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Arc<AccountBlob>>> {
        if let Some(blob) = self.cache.get(address) {
            debug!("account cache hit");
            return Ok(Some(blob));
        }

        let key = format!("acct:{address}");
        let address = *address;
        let coalescer = self.coalescer.clone();
        coalescer
            .dedupe(&key, || async move {
                let fetched = self
                    .with_failover(Priority::Normal, "getAccountInfo", |transport| {
                        let address = address;
                        async move { transport.get_account(&address).await }
                    })
                    .await?;
                Ok(match fetched {
                    Some(blob) => {
                        self.cache.insert(address, blob.clone());
                        Some(Arc::new(blob))
                    }
                    None => None,
                })
            })
            .await
    }

    /// Batched account read with partial cache-hit handling. The result
    /// vector matches `addresses` in order and length.
    #[instrument(skip(self, addresses), fields(count = addresses.len()))]
    pub async fn get_multiple_account_infos(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Arc<AccountBlob>>>> {
        let mut results: Vec<Option<Arc<AccountBlob>>> = vec![None; addresses.len()];
        let mut missing: Vec<(usize, Pubkey)> = Vec::new();

        for (i, address) in addresses.iter().enumerate() {
            match self.cache.get(address) {
                Some(blob) => results[i] = Some(blob),
                None => missing.push((i, *address)),
            }
        }

        for chunk in missing.chunks(MAX_ACCOUNTS_PER_BATCH) {
            let batch: Vec<Pubkey> = chunk.iter().map(|(_, a)| *a).collect();
            let fetched = self
                .with_failover(Priority::Normal, "getMultipleAccounts", |transport| {
                    let batch = batch.clone();
                    async move { transport.get_multiple_accounts(&batch).await }
                })
                .await?;

            for ((index, address), maybe) in chunk.iter().zip(fetched.into_iter()) {
                if let Some(blob) = maybe {
                    self.cache.insert(*address, blob.clone());
                    results[*index] = Some(Arc::new(blob));
                }
            }
        }

        Ok(results)
    }

    /// Uncached transaction fetch (results are slot-bound).
    pub async fn get_parsed_transaction(
        &self,
        signature: &str,
        commitment: CommitmentConfig,
    ) -> Result<Option<FetchedTransaction>> {
        let signature = signature.to_string();
        self.with_failover(Priority::Normal, "getTransaction", |transport| {
            let signature = signature.clone();
            async move { transport.get_transaction(&signature, commitment).await }
        })
        .await
    }

    /// Highest admission priority: exit paths must never starve behind
    /// discovery reads. Bypasses the cache entirely.
    pub async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
        skip_preflight: bool,
    ) -> Result<String> {
        self.with_failover(Priority::High, "sendTransaction", |transport| {
            let tx = tx.clone();
            async move { transport.send_transaction(&tx, skip_preflight).await }
        })
        .await
    }

    pub async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        limit: usize,
        until: Option<String>,
    ) -> Result<Vec<SignatureSummary>> {
        let address = *address;
        self.with_failover(Priority::Low, "getSignaturesForAddress", |transport| {
            let until = until.clone();
            async move {
                transport
                    .get_signatures_for_address(&address, limit, until)
                    .await
            }
        })
        .await
    }

    pub async fn get_balance(&self, address: &Pubkey) -> Result<u64> {
        let address = *address;
        self.with_failover(Priority::Normal, "getBalance", |transport| async move {
            transport.get_balance(&address).await
        })
        .await
    }

    pub async fn get_token_largest_accounts(
        &self,
        mint: &Pubkey,
    ) -> Result<Vec<TokenAccountBalance>> {
        let mint = *mint;
        self.with_failover(
            Priority::Normal,
            "getTokenLargestAccounts",
            |transport| async move { transport.get_token_largest_accounts(&mint).await },
        )
        .await
    }

    pub async fn get_token_supply(&self, mint: &Pubkey) -> Result<TokenSupply> {
        let mint = *mint;
        self.with_failover(Priority::Normal, "getTokenSupply", |transport| async move {
            transport.get_token_supply(&mint).await
        })
        .await
    }

    pub async fn get_latest_blockhash(&self) -> Result<Hash> {
        self.with_failover(
            Priority::High,
            "getLatestBlockhash",
            |transport| async move { transport.get_latest_blockhash().await },
        )
        .await
    }

    pub async fn simulate_transaction(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<SimulationOutcome> {
        self.with_failover(Priority::Normal, "simulateTransaction", |transport| {
            let tx = tx.clone();
            async move { transport.simulate_transaction(&tx).await }
        })
        .await
    }

    pub async fn confirm_transaction(&self, signature: &str) -> Result<bool> {
        let signature = signature.to_string();
        self.with_failover(Priority::High, "confirmTransaction", |transport| {
            let signature = signature.clone();
            async move { transport.confirm_transaction(&signature).await }
        })
        .await
    }

    /// Drop a cached account so the next read refetches.
    pub fn invalidate_account(&self, address: &Pubkey) {
        self.cache.invalidate(address);
    }

    pub fn provider_records(&self) -> &[Arc<ProviderRecord>] {
        &self.providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Transport that can be flipped between healthy and failing and
    /// counts the calls it served.
    struct ScriptedTransport {
        fail: AtomicBool,
        calls: AtomicUsize,
        blob_data: Vec<u8>,
    }

    impl ScriptedTransport {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(fail),
                calls: AtomicUsize::new(0),
                blob_data: vec![7u8; 16],
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        fn check(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(anyhow!("scripted failure"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl RpcTransport for ScriptedTransport {
        async fn get_account(&self, _address: &Pubkey) -> Result<Option<AccountBlob>> {
            self.check()?;
            Ok(Some(AccountBlob {
                data: self.blob_data.clone(),
                owner: Pubkey::new_unique(),
                lamports: 1,
                slot: 1,
            }))
        }
        async fn get_multiple_accounts(
            &self,
            addresses: &[Pubkey],
        ) -> Result<Vec<Option<AccountBlob>>> {
            self.check()?;
            Ok(addresses
                .iter()
                .map(|_| {
                    Some(AccountBlob {
                        data: self.blob_data.clone(),
                        owner: Pubkey::new_unique(),
                        lamports: 1,
                        slot: 1,
                    })
                })
                .collect())
        }
        async fn get_transaction(
            &self,
            _signature: &str,
            _commitment: CommitmentConfig,
        ) -> Result<Option<FetchedTransaction>> {
            self.check()?;
            Ok(None)
        }
        async fn send_transaction(
            &self,
            _tx: &VersionedTransaction,
            _skip_preflight: bool,
        ) -> Result<String> {
            self.check()?;
            Ok("sig".to_string())
        }
        async fn get_signatures_for_address(
            &self,
            _address: &Pubkey,
            _limit: usize,
            _until: Option<String>,
        ) -> Result<Vec<SignatureSummary>> {
            self.check()?;
            Ok(Vec::new())
        }
        async fn get_balance(&self, _address: &Pubkey) -> Result<u64> {
            self.check()?;
            Ok(42)
        }
        async fn get_token_largest_accounts(
            &self,
            _mint: &Pubkey,
        ) -> Result<Vec<TokenAccountBalance>> {
            self.check()?;
            Ok(Vec::new())
        }
        async fn get_token_supply(&self, _mint: &Pubkey) -> Result<TokenSupply> {
            self.check()?;
            Ok(TokenSupply {
                amount: 0,
                decimals: 6,
            })
        }
        async fn get_latest_blockhash(&self) -> Result<Hash> {
            self.check()?;
            Ok(Hash::default())
        }
        async fn simulate_transaction(
            &self,
            _tx: &VersionedTransaction,
        ) -> Result<SimulationOutcome> {
            self.check()?;
            Ok(SimulationOutcome::default())
        }
        async fn confirm_transaction(&self, _signature: &str) -> Result<bool> {
            self.check()?;
            Ok(true)
        }
    }

    fn provider_config(name: &str, priority: u8, rps: u32) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            url: format!("http://{name}"),
            ws_url: None,
            rps_limit: rps,
            priority,
        }
    }

    fn settings() -> RpcSettings {
        RpcSettings {
            cooldown_secs: 1,
            ..RpcSettings::default()
        }
    }

    #[test]
    fn test_empty_provider_set_rejected() {
        let result = RpcManager::with_transports(Vec::new(), &settings());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_transport() {
        let transport = ScriptedTransport::new(false);
        let manager = RpcManager::with_transports(
            vec![(provider_config("a", 1, 100), transport.clone() as _)],
            &settings(),
        )
        .unwrap();
        let address = Pubkey::new_unique();

        manager.get_account_info(&address).await.unwrap();
        manager.get_account_info(&address).await.unwrap();

        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_failover_to_second_provider() {
        let bad = ScriptedTransport::new(true);
        let good = ScriptedTransport::new(false);
        let manager = RpcManager::with_transports(
            vec![
                (provider_config("bad", 1, 100), bad.clone() as _),
                (provider_config("good", 2, 100), good.clone() as _),
            ],
            &settings(),
        )
        .unwrap();

        let balance = manager.get_balance(&Pubkey::new_unique()).await.unwrap();
        assert_eq!(balance, 42);
        assert_eq!(bad.calls(), 1);
        assert_eq!(good.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_failed_is_terminal() {
        let bad = ScriptedTransport::new(true);
        let manager = RpcManager::with_transports(
            vec![(provider_config("bad", 1, 100), bad.clone() as _)],
            &settings(),
        )
        .unwrap();

        let err = manager
            .get_balance(&Pubkey::new_unique())
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("providers failed"));
        // A single round tries the provider exactly once.
        assert_eq!(bad.calls(), 1);
    }

    #[tokio::test]
    async fn test_unhealthy_provider_excluded_until_cooldown() {
        let flaky = ScriptedTransport::new(true);
        let backup = ScriptedTransport::new(false);
        let manager = RpcManager::with_transports(
            vec![
                (provider_config("flaky", 1, 100), flaky.clone() as _),
                (provider_config("backup", 2, 100), backup.clone() as _),
            ],
            &settings(),
        )
        .unwrap();

        // Three failing rounds bench the flaky provider.
        for _ in 0..3 {
            manager.get_balance(&Pubkey::new_unique()).await.unwrap();
        }
        assert_eq!(flaky.calls(), 3);

        // While benched all traffic goes to the backup.
        for _ in 0..5 {
            manager.get_balance(&Pubkey::new_unique()).await.unwrap();
        }
        assert_eq!(flaky.calls(), 3);

        // Cooldown elapses; the recovered provider is preferred again.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        flaky.set_fail(false);
        manager.get_balance(&Pubkey::new_unique()).await.unwrap();
        assert_eq!(flaky.calls(), 4);
    }

    #[tokio::test]
    async fn test_batched_reads_chunk_and_cache() {
        let transport = ScriptedTransport::new(false);
        let manager = RpcManager::with_transports(
            vec![(provider_config("a", 1, 1_000), transport.clone() as _)],
            &settings(),
        )
        .unwrap();

        let addresses: Vec<Pubkey> = (0..150).map(|_| Pubkey::new_unique()).collect();
        let results = manager.get_multiple_account_infos(&addresses).await.unwrap();
        assert_eq!(results.len(), 150);
        assert!(results.iter().all(|r| r.is_some()));
        // 150 addresses = two wire batches.
        assert_eq!(transport.calls(), 2);

        // Second read is fully cached.
        let results = manager.get_multiple_account_infos(&addresses).await.unwrap();
        assert_eq!(results.len(), 150);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_send_transaction_bypasses_cache() {
        let transport = ScriptedTransport::new(false);
        let manager = RpcManager::with_transports(
            vec![(provider_config("a", 1, 100), transport.clone() as _)],
            &settings(),
        )
        .unwrap();

        let tx = VersionedTransaction::default();
        let sig1 = manager.send_transaction(&tx, true).await.unwrap();
        let sig2 = manager.send_transaction(&tx, true).await.unwrap();
        assert_eq!(sig1, "sig");
        assert_eq!(sig2, "sig");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_bucket_decrements_on_send() {
        let transport = ScriptedTransport::new(false);
        let manager = RpcManager::with_transports(
            vec![(provider_config("a", 1, 1), transport as _)],
            &settings(),
        )
        .unwrap();

        let provider = manager.provider_records()[0].clone();
        let before = provider.bucket.available_tokens().await;
        manager
            .send_transaction(&VersionedTransaction::default(), true)
            .await
            .unwrap();
        let after = provider.bucket.available_tokens().await;
        assert!(before - after > 0.9);
    }
}
