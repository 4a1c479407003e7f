//! Signature-polling last resort.
//!
//! Every tick, each enabled program is asked for its newest signatures
//! up to a per-program cursor. New signatures are processed oldest
//! first so pool events come out in chain order. This source cannot
//! fail: an RPC error just means an empty tick.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, trace};

use super::SourceContext;
use crate::types::DexKind;

/// Signatures requested per program per tick.
const SIGNATURES_PER_POLL: usize = 20;

pub(crate) async fn run(
    dexes: &[DexKind],
    ctx: &SourceContext,
    interval: Duration,
    shutdown: &mut watch::Receiver<bool>,
) {
    let mut cursors: HashMap<DexKind, String> = HashMap::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                for dex in dexes {
                    poll_program(*dex, ctx, &mut cursors).await;
                }
            }
        }
    }
}

async fn poll_program(
    dex: DexKind,
    ctx: &SourceContext,
    cursors: &mut HashMap<DexKind, String>,
) {
    let program = dex.program_id();
    let until = cursors.get(&dex).cloned();

    let summaries = match ctx
        .rpc
        .get_signatures_for_address(&program, SIGNATURES_PER_POLL, until)
        .await
    {
        Ok(s) => s,
        Err(e) => {
            debug!(dex = %dex, error = %e, "signature poll failed");
            ctx.stats.record_error();
            return;
        }
    };

    if summaries.is_empty() {
        return;
    }
    ctx.stats.record_event();

    // Newest first on the wire; remember it as the next cursor.
    if let Some(newest) = summaries.first() {
        cursors.insert(dex, newest.signature.clone());
    }

    // Process oldest → newest so downstream sees chain order.
    for summary in summaries.iter().rev() {
        if summary.err {
            continue;
        }
        if !ctx.first_sighting(&summary.signature).await {
            continue;
        }

        let permit = match ctx.gate.try_enter() {
            Some(permit) => permit,
            None => {
                trace!(signature = %summary.signature, "fetch ceiling reached, dropping");
                continue;
            }
        };
        ctx.fetch_and_decode(summary.signature.clone(), permit).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, RpcSettings};
    use crate::dex::{pumpfun, DecoderRegistry};
    use crate::ingest::{FetchGate, IngestStats, SignatureSet, SourceContext};
    use crate::rpc::{
        AccountBlob, DecodedInstruction, FetchedTransaction, RpcManager, RpcTransport,
        SignatureSummary, SimulationOutcome, TokenAccountBalance, TokenSupply,
    };
    use crate::types::PoolEvent;
    use anyhow::Result;
    use async_trait::async_trait;
    use solana_sdk::commitment_config::CommitmentConfig;
    use solana_sdk::hash::Hash;
    use solana_sdk::pubkey::Pubkey;
    use solana_sdk::transaction::VersionedTransaction;
    use std::collections::HashMap as StdHashMap;
    use std::sync::{Arc, Mutex as StdMutex};
    use tokio::sync::{mpsc, Mutex};

    /// Transport scripted with a signature listing and fetchable
    /// transactions.
    #[derive(Default)]
    struct PollFixture {
        signatures: StdMutex<Vec<SignatureSummary>>,
        transactions: StdMutex<StdHashMap<String, FetchedTransaction>>,
    }

    #[async_trait]
    impl RpcTransport for PollFixture {
        async fn get_account(&self, _address: &Pubkey) -> Result<Option<AccountBlob>> {
            Ok(None)
        }
        async fn get_multiple_accounts(
            &self,
            addresses: &[Pubkey],
        ) -> Result<Vec<Option<AccountBlob>>> {
            Ok(vec![None; addresses.len()])
        }
        async fn get_transaction(
            &self,
            signature: &str,
            _commitment: CommitmentConfig,
        ) -> Result<Option<FetchedTransaction>> {
            Ok(self.transactions.lock().unwrap().get(signature).cloned())
        }
        async fn send_transaction(
            &self,
            _tx: &VersionedTransaction,
            _skip_preflight: bool,
        ) -> Result<String> {
            Ok(String::new())
        }
        async fn get_signatures_for_address(
            &self,
            _address: &Pubkey,
            limit: usize,
            until: Option<String>,
        ) -> Result<Vec<SignatureSummary>> {
            let signatures = self.signatures.lock().unwrap();
            // Newest first, stopping at the cursor like the real RPC.
            let mut out = Vec::new();
            for summary in signatures.iter().rev() {
                if Some(&summary.signature) == until.as_ref() {
                    break;
                }
                out.push(summary.clone());
                if out.len() >= limit {
                    break;
                }
            }
            Ok(out)
        }
        async fn get_balance(&self, _address: &Pubkey) -> Result<u64> {
            Ok(0)
        }
        async fn get_token_largest_accounts(
            &self,
            _mint: &Pubkey,
        ) -> Result<Vec<TokenAccountBalance>> {
            Ok(Vec::new())
        }
        async fn get_token_supply(&self, _mint: &Pubkey) -> Result<TokenSupply> {
            Ok(TokenSupply {
                amount: 0,
                decimals: 6,
            })
        }
        async fn get_latest_blockhash(&self) -> Result<Hash> {
            Ok(Hash::default())
        }
        async fn simulate_transaction(
            &self,
            _tx: &VersionedTransaction,
        ) -> Result<SimulationOutcome> {
            Ok(SimulationOutcome::default())
        }
        async fn confirm_transaction(&self, _signature: &str) -> Result<bool> {
            Ok(true)
        }
    }

    impl PollFixture {
        fn push_create(&self, signature: &str, slot: u64, mint: Pubkey, curve: Pubkey) {
            self.signatures.lock().unwrap().push(SignatureSummary {
                signature: signature.to_string(),
                slot,
                err: false,
            });

            let mut accounts = vec![mint, Pubkey::new_unique(), curve, Pubkey::new_unique()];
            accounts.extend((0..8).map(|_| Pubkey::new_unique()));
            self.transactions.lock().unwrap().insert(
                signature.to_string(),
                FetchedTransaction {
                    signature: signature.to_string(),
                    slot,
                    instructions: vec![DecodedInstruction {
                        program_id: DexKind::Pumpfun.program_id(),
                        accounts,
                        data: pumpfun::CREATE_DISCRIMINATOR.to_vec(),
                    }],
                    logs: Vec::new(),
                },
            );
        }
    }

    fn context_over(
        fixture: Arc<PollFixture>,
    ) -> (Arc<SourceContext>, mpsc::Receiver<PoolEvent>) {
        let provider = ProviderConfig {
            name: "poll".to_string(),
            url: "http://poll".to_string(),
            ws_url: None,
            rps_limit: 1_000,
            priority: 1,
        };
        let rpc = Arc::new(
            RpcManager::with_transports(vec![(provider, fixture as _)], &RpcSettings::default())
                .unwrap(),
        );
        let (event_tx, event_rx) = mpsc::channel(32);
        let ctx = Arc::new(SourceContext {
            rpc,
            registry: Arc::new(DecoderRegistry::new(&[DexKind::Pumpfun])),
            event_tx,
            dedup: Mutex::new(SignatureSet::default()),
            gate: FetchGate::new(2),
            stats: Arc::new(IngestStats::default()),
            fetch_timeout: Duration::from_secs(5),
        });
        (ctx, event_rx)
    }

    #[tokio::test]
    async fn test_poll_emits_in_chain_order_and_advances_cursor() {
        let fixture = Arc::new(PollFixture::default());
        let mint_a = Pubkey::new_unique();
        let mint_b = Pubkey::new_unique();
        fixture.push_create("sig-1", 10, mint_a, Pubkey::new_unique());
        fixture.push_create("sig-2", 11, mint_b, Pubkey::new_unique());

        let (ctx, mut events) = context_over(fixture.clone());
        let mut cursors = HashMap::new();

        poll_program(DexKind::Pumpfun, &ctx, &mut cursors).await;

        // Oldest first.
        let first = events.recv().await.unwrap();
        assert_eq!(first.mint(), &mint_a);
        let second = events.recv().await.unwrap();
        assert_eq!(second.mint(), &mint_b);

        // Cursor sits on the newest signature.
        assert_eq!(cursors.get(&DexKind::Pumpfun).unwrap(), "sig-2");

        // A quiet follow-up tick emits nothing.
        poll_program(DexKind::Pumpfun, &ctx, &mut cursors).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_poll_skips_seen_signatures() {
        let fixture = Arc::new(PollFixture::default());
        fixture.push_create("sig-dup", 10, Pubkey::new_unique(), Pubkey::new_unique());

        let (ctx, mut events) = context_over(fixture.clone());
        assert!(ctx.first_sighting("sig-dup").await);

        let mut cursors = HashMap::new();
        poll_program(DexKind::Pumpfun, &ctx, &mut cursors).await;

        // Already processed elsewhere (e.g. before a source hand-over).
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_poll_ignores_failed_transactions() {
        let fixture = Arc::new(PollFixture::default());
        fixture.signatures.lock().unwrap().push(SignatureSummary {
            signature: "sig-err".to_string(),
            slot: 9,
            err: true,
        });

        let (ctx, mut events) = context_over(fixture);
        let mut cursors = HashMap::new();
        poll_program(DexKind::Pumpfun, &ctx, &mut cursors).await;

        assert!(events.try_recv().is_err());
        // The cursor still advances past the failed signature.
        assert_eq!(cursors.get(&DexKind::Pumpfun).unwrap(), "sig-err");
    }
}
