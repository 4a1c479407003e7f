//! In-flight request coalescing.
//!
//! Concurrent reads for the same key share one upstream call: the
//! first caller becomes the leader and runs the fetch, everyone else
//! attaches to its outcome. The registration is removed before any
//! result is delivered so a follow-up call starts a fresh fetch.

use std::collections::HashMap;
use std::future::Future;

use anyhow::{anyhow, Result};
use tokio::sync::{watch, Mutex};
use tracing::trace;

type Outcome<T> = Option<Result<T, String>>;

pub struct RequestCoalescer<T: Clone + Send + Sync + 'static> {
    inflight: Mutex<HashMap<String, watch::Receiver<Outcome<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> Default for RequestCoalescer<T> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> RequestCoalescer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` unless a call for `key` is already in flight, in which
    /// case await that call's outcome instead.
    pub async fn dedupe<F, Fut>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tx = {
            let mut inflight = self.inflight.lock().await;
            if let Some(rx) = inflight.get(key) {
                trace!(key, "joining in-flight request");
                let mut rx = rx.clone();
                drop(inflight);
                return Self::wait_for_outcome(&mut rx).await;
            }
            let (tx, rx) = watch::channel(None);
            inflight.insert(key.to_string(), rx);
            tx
        };

        let outcome = f().await;

        // Deregister before publishing so late arrivals start fresh.
        {
            let mut inflight = self.inflight.lock().await;
            inflight.remove(key);
        }

        match outcome {
            Ok(value) => {
                let _ = tx.send(Some(Ok(value.clone())));
                Ok(value)
            }
            Err(e) => {
                let msg = e.to_string();
                let _ = tx.send(Some(Err(msg)));
                Err(e)
            }
        }
    }

    pub async fn inflight_count(&self) -> usize {
        self.inflight.lock().await.len()
    }

    async fn wait_for_outcome(rx: &mut watch::Receiver<Outcome<T>>) -> Result<T> {
        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return outcome.map_err(|msg| anyhow!("coalesced request failed: {msg}"));
            }
            if rx.changed().await.is_err() {
                return Err(anyhow!("coalesced request abandoned"));
            }
        }
    }
}
