//! Per-provider token-bucket admission control.
//!
//! Each provider owns one bucket sized to its contracted request rate.
//! Callers `acquire` with a priority; waiters are parked in one FIFO
//! queue per priority band and a background dispatcher releases exactly
//! one waiter per refilled token, higher bands first. The real-valued
//! token count is exposed so the provider manager can pick the endpoint
//! with the most headroom.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex, Notify};
use tracing::trace;

/// Admission priority. Position exits always outrank discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
}

const BANDS: usize = 3;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
    /// One FIFO queue per band, index = `Priority as usize`.
    waiters: [VecDeque<oneshot::Sender<()>>; BANDS],
}

impl BucketState {
    fn refill(&mut self, rate: f64, capacity: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * rate).min(capacity);
            self.last_refill = now;
        }
    }

    fn has_waiters(&self) -> bool {
        self.waiters.iter().any(|q| !q.is_empty())
    }

    /// Pop the next waiter: highest band first, FIFO within a band.
    fn pop_waiter(&mut self) -> Option<oneshot::Sender<()>> {
        for band in (0..BANDS).rev() {
            if let Some(tx) = self.waiters[band].pop_front() {
                return Some(tx);
            }
        }
        None
    }
}

struct BucketShared {
    state: Mutex<BucketState>,
    wake: Notify,
    rate: f64,
    capacity: f64,
}

/// Token bucket with prioritized FIFO admission.
pub struct TokenBucket {
    shared: Arc<BucketShared>,
}

impl TokenBucket {
    /// `rps` tokens per second with a burst ceiling of `burst` tokens
    /// (kept small so callers cannot spike past the provider limit).
    pub fn new(rps: u32, burst: u32) -> Self {
        let rate = rps.max(1) as f64;
        let capacity = burst.clamp(1, 2) as f64;
        let shared = Arc::new(BucketShared {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
                waiters: Default::default(),
            }),
            wake: Notify::new(),
            rate,
            capacity,
        });

        Self::spawn_dispatcher(Arc::downgrade(&shared));
        Self { shared }
    }

    /// Wait until one token is available. Tokens are handed out one per
    /// waiter; within a band the order is strictly FIFO.
    pub async fn acquire(&self, priority: Priority) {
        let rx = {
            let mut state = self.shared.state.lock().await;
            state.refill(self.shared.rate, self.shared.capacity);

            if state.tokens >= 1.0 && !state.has_waiters() {
                state.tokens -= 1.0;
                return;
            }

            let (tx, rx) = oneshot::channel();
            state.waiters[priority as usize].push_back(tx);
            self.shared.wake.notify_one();
            rx
        };

        // A dropped sender only happens if the bucket itself is gone.
        let _ = rx.await;
    }

    /// Take a token immediately if one is free and nobody is queued.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.shared.state.lock().await;
        state.refill(self.shared.rate, self.shared.capacity);
        if state.tokens >= 1.0 && !state.has_waiters() {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Real-valued token count after refill; used for capacity-aware
    /// provider selection.
    pub async fn available_tokens(&self) -> f64 {
        let mut state = self.shared.state.lock().await;
        state.refill(self.shared.rate, self.shared.capacity);
        state.tokens
    }

    pub async fn queued_waiters(&self) -> usize {
        let state = self.shared.state.lock().await;
        state.waiters.iter().map(|q| q.len()).sum()
    }

    /// Background dispatcher: releases one waiter per token, sleeping
    /// only as long as the next token takes to refill. Exits when the
    /// bucket is dropped.
    fn spawn_dispatcher(weak: Weak<BucketShared>) {
        tokio::spawn(async move {
            loop {
                let shared = match weak.upgrade() {
                    Some(s) => s,
                    None => break,
                };

                let wait_for = {
                    let mut state = shared.state.lock().await;
                    state.refill(shared.rate, shared.capacity);

                    while state.tokens >= 1.0 {
                        match state.pop_waiter() {
                            Some(tx) => {
                                state.tokens -= 1.0;
                                if tx.send(()).is_err() {
                                    // Waiter gave up; the token stays.
                                    state.tokens += 1.0;
                                }
                            }
                            None => break,
                        }
                    }

                    if state.has_waiters() {
                        let deficit = 1.0 - state.tokens;
                        Some(Duration::from_secs_f64(
                            (deficit / shared.rate).max(0.001),
                        ))
                    } else {
                        None
                    }
                };

                match wait_for {
                    Some(delay) => {
                        trace!(?delay, "bucket dispatcher waiting for refill");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shared.wake.notified() => {}
                        }
                    }
                    None => {
                        // Park until a new waiter arrives. The periodic
                        // wake bounds how long this task pins the bucket
                        // alive after it is dropped.
                        tokio::select! {
                            _ = shared.wake.notified() => {}
                            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_burst_then_block() {
        let bucket = TokenBucket::new(10, 2);

        assert!(bucket.try_acquire().await);
        assert!(bucket.try_acquire().await);
        // Bucket drained; the third immediate attempt must fail.
        assert!(!bucket.try_acquire().await);
    }

    #[tokio::test]
    async fn test_tokens_never_negative() {
        let bucket = TokenBucket::new(5, 1);
        bucket.acquire(Priority::Normal).await;
        assert!(bucket.available_tokens().await >= 0.0);
    }

    #[tokio::test]
    async fn test_refill_restores_capacity() {
        let bucket = TokenBucket::new(50, 1);
        assert!(bucket.try_acquire().await);
        assert!(!bucket.try_acquire().await);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(bucket.try_acquire().await);
    }

    #[tokio::test]
    async fn test_acquire_decrements_by_one() {
        let bucket = TokenBucket::new(1, 2);
        let before = bucket.available_tokens().await;
        bucket.acquire(Priority::Normal).await;
        let after = bucket.available_tokens().await;
        assert!(before - after > 0.9 && before - after < 1.1);
    }

    #[tokio::test]
    async fn test_fifo_within_band() {
        let bucket = Arc::new(TokenBucket::new(20, 1));
        bucket.acquire(Priority::Normal).await; // drain the burst token

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..4 {
            let bucket = bucket.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                bucket.acquire(Priority::Normal).await;
                order.lock().await.push(i);
            }));
            // Give each task time to enqueue before the next starts.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(*order.lock().await, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_high_priority_wakes_first() {
        let bucket = Arc::new(TokenBucket::new(10, 1));
        bucket.acquire(Priority::Normal).await; // drain

        let first_released = Arc::new(AtomicUsize::new(0));

        let low = {
            let bucket = bucket.clone();
            let flag = first_released.clone();
            tokio::spawn(async move {
                bucket.acquire(Priority::Low).await;
                let _ = flag.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst);
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let high = {
            let bucket = bucket.clone();
            let flag = first_released.clone();
            tokio::spawn(async move {
                bucket.acquire(Priority::High).await;
                let _ = flag.compare_exchange(0, 2, Ordering::SeqCst, Ordering::SeqCst);
            })
        };

        low.await.unwrap();
        high.await.unwrap();

        // The high-priority waiter queued later but must be released first.
        assert_eq!(first_released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_queued_waiters_reported() {
        let bucket = Arc::new(TokenBucket::new(1, 1));
        bucket.acquire(Priority::Normal).await;

        let b = bucket.clone();
        let handle = tokio::spawn(async move { b.acquire(Priority::Low).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(bucket.queued_waiters().await <= 1);
        handle.await.unwrap();
    }
}
