//! gRPC block-stream subscription (primary source).
//!
//! Subscribes to account updates owned by the enabled DEX programs and
//! to non-vote, non-failed transactions mentioning them. Account
//! updates are routed to decoders by owner; transactions by whichever
//! decoder recognizes them.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, StreamExt};
use solana_sdk::pubkey::Pubkey;
use tokio::sync::watch;
use tracing::{debug, trace, warn};
use yellowstone_grpc_client::{ClientTlsConfig, GeyserGrpcClient, Interceptor};
use yellowstone_grpc_proto::prelude::{
    subscribe_update::UpdateOneof, CommitmentLevel, SubscribeRequest,
    SubscribeRequestFilterAccounts, SubscribeRequestFilterTransactions, SubscribeUpdateAccount,
    SubscribeUpdateTransaction,
};

use super::SourceContext;
use crate::rpc::DecodedInstruction;
use crate::types::DexKind;

/// Build the one subscription request this source uses: account
/// updates filtered by owner, transactions filtered by mention.
fn build_subscribe_request(dexes: &[DexKind]) -> SubscribeRequest {
    let programs: Vec<String> = dexes.iter().map(|d| d.program_id().to_string()).collect();

    let mut accounts = HashMap::new();
    accounts.insert(
        "pool_accounts".to_string(),
        SubscribeRequestFilterAccounts {
            account: Vec::new(),
            owner: programs.clone(),
            filters: Vec::new(),
            nonempty_txn_signature: None,
        },
    );

    let mut transactions = HashMap::new();
    transactions.insert(
        "pool_transactions".to_string(),
        SubscribeRequestFilterTransactions {
            vote: Some(false),
            failed: Some(false),
            signature: None,
            account_include: programs,
            account_exclude: Vec::new(),
            account_required: Vec::new(),
        },
    );

    SubscribeRequest {
        accounts,
        transactions,
        commitment: Some(CommitmentLevel::Processed as i32),
        ..SubscribeRequest::default()
    }
}

async fn connect(
    endpoint: &str,
    token: Option<&str>,
    timeout: Duration,
) -> Result<GeyserGrpcClient<impl Interceptor>> {
    let mut builder = GeyserGrpcClient::build_from_shared(endpoint.to_string())
        .context("invalid grpc endpoint")?
        .x_token(token.map(str::to_string))
        .context("invalid grpc token")?
        .connect_timeout(timeout)
        .timeout(timeout)
        .tcp_nodelay(true);

    if endpoint.to_ascii_lowercase().starts_with("https://") {
        builder = builder
            .tls_config(ClientTlsConfig::new().with_native_roots())
            .context("tls config rejected")?;
    }

    builder.connect().await.context("grpc connect failed")
}

/// Short capability check: connect, subscribe, and drain at least one
/// message (or a clean subscription ack) inside the window. A failure
/// disables gRPC for the lifetime of the run.
pub async fn probe(endpoint: &str, token: Option<&str>, window: Duration) -> bool {
    let attempt = async {
        let mut client = connect(endpoint, token, window).await?;
        let (mut tx, mut stream) = client.subscribe().await.context("subscribe failed")?;
        tx.send(build_subscribe_request(&[DexKind::Pumpfun]))
            .await
            .context("subscribe request rejected")?;
        match stream.next().await {
            Some(Ok(_)) => Ok::<_, anyhow::Error>(()),
            Some(Err(e)) => Err(anyhow!("stream error: {e}")),
            None => Err(anyhow!("stream closed during probe")),
        }
    };

    match tokio::time::timeout(window, attempt).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "grpc probe failed");
            false
        }
        Err(_) => {
            debug!("grpc probe timed out");
            false
        }
    }
}

/// Run the subscription until shutdown or stream end. Returns `Err` on
/// any stream failure; the coordinator then transitions to WebSocket.
pub(crate) async fn run_stream(
    endpoint: &str,
    token: Option<&str>,
    dexes: &[DexKind],
    ctx: &SourceContext,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let mut client = connect(endpoint, token, Duration::from_secs(10)).await?;
    let (mut subscribe_tx, mut stream) = client.subscribe().await.context("subscribe failed")?;
    subscribe_tx
        .send(build_subscribe_request(dexes))
        .await
        .context("subscribe request rejected")?;

    debug!(programs = dexes.len(), "grpc subscription established");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
            }
            message = stream.next() => {
                match message {
                    None => return Err(anyhow!("grpc stream closed")),
                    Some(Err(e)) => return Err(anyhow!("grpc stream error: {e}")),
                    Some(Ok(update)) => {
                        match update.update_oneof {
                            Some(UpdateOneof::Account(account)) => {
                                ctx.stats.record_event();
                                handle_account_update(ctx, account).await;
                            }
                            Some(UpdateOneof::Transaction(tx)) => {
                                ctx.stats.record_event();
                                handle_transaction_update(ctx, tx).await;
                            }
                            Some(UpdateOneof::Ping(_)) => trace!("grpc ping"),
                            _ => {}
                        }
                    }
                }
            }
        }
    }
}

async fn handle_account_update(ctx: &SourceContext, update: SubscribeUpdateAccount) {
    let slot = update.slot;
    let info = match update.account {
        Some(info) => info,
        None => return,
    };

    let (address, owner) = match (
        Pubkey::try_from(info.pubkey.as_slice()),
        Pubkey::try_from(info.owner.as_slice()),
    ) {
        (Ok(a), Ok(o)) => (a, o),
        _ => return,
    };

    let decoder = match ctx.registry.for_owner(&owner) {
        Some(d) => d,
        None => return,
    };

    if let Some(event) = decoder.parse_account(&address, &info.data, slot) {
        debug!(pool = %address, dex = %decoder.dex(), "pool event from account update");
        ctx.emit(event).await;
    }
}

async fn handle_transaction_update(ctx: &SourceContext, update: SubscribeUpdateTransaction) {
    let slot = update.slot;
    let info = match update.transaction {
        Some(info) => info,
        None => return,
    };

    let signature = bs58::encode(&info.signature).into_string();
    if !ctx.first_sighting(&signature).await {
        return;
    }

    let message = match info.transaction.and_then(|tx| tx.message) {
        Some(m) => m,
        None => return,
    };

    let keys: Vec<Pubkey> = message
        .account_keys
        .iter()
        .filter_map(|raw| Pubkey::try_from(raw.as_slice()).ok())
        .collect();
    if keys.len() != message.account_keys.len() {
        warn!(%signature, "transaction with malformed account keys");
        return;
    }

    let instructions: Vec<DecodedInstruction> = message
        .instructions
        .iter()
        .filter_map(|ix| {
            let program_id = keys.get(ix.program_id_index as usize)?;
            let accounts = ix
                .accounts
                .iter()
                .map(|idx| keys.get(*idx as usize).copied())
                .collect::<Option<Vec<_>>>()?;
            Some(DecodedInstruction {
                program_id: *program_id,
                accounts,
                data: ix.data.clone(),
            })
        })
        .collect();

    if let Some(event) = ctx.registry.parse_transaction(&signature, &instructions, slot) {
        debug!(%signature, "pool event from transaction update");
        ctx.emit(event).await;
    }
}
