//! Bounded TTL cache for account reads.
//!
//! Only account blobs are cached; transaction fetches are slot-bound
//! and writes always bypass the cache.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use solana_sdk::pubkey::Pubkey;

/// Raw account snapshot as fetched from a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountBlob {
    pub data: Vec<u8>,
    pub owner: Pubkey,
    pub lamports: u64,
    /// Slot the snapshot was observed at, when known.
    pub slot: u64,
}

/// LRU + TTL cache keyed by account address.
pub struct AccountCache {
    inner: Cache<Pubkey, Arc<AccountBlob>>,
}

impl AccountCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self { inner }
    }

    /// Hit refreshes recency; expired entries read as misses.
    pub fn get(&self, address: &Pubkey) -> Option<Arc<AccountBlob>> {
        self.inner.get(address)
    }

    pub fn insert(&self, address: Pubkey, blob: AccountBlob) {
        self.inner.insert(address, Arc::new(blob));
    }

    pub fn invalidate(&self, address: &Pubkey) {
        self.inner.invalidate(address);
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}
