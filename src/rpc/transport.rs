//! Transport seam between the provider manager and the wire.
//!
//! The manager speaks to every endpoint through `RpcTransport`, so
//! tests can stand in an in-memory implementation and the production
//! path wraps the nonblocking solana-client.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::{
    RpcSendTransactionConfig, RpcSimulateTransactionConfig, RpcTransactionConfig,
};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use solana_transaction_status::UiTransactionEncoding;

use super::cache::AccountBlob;

/// One instruction with its account list resolved to addresses.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedInstruction {
    pub program_id: Pubkey,
    pub accounts: Vec<Pubkey>,
    pub data: Vec<u8>,
}

/// A transaction fetched for decoding.
#[derive(Debug, Clone, Default)]
pub struct FetchedTransaction {
    pub signature: String,
    pub slot: u64,
    pub instructions: Vec<DecodedInstruction>,
    pub logs: Vec<String>,
}

/// Signature listing entry from `getSignaturesForAddress`.
#[derive(Debug, Clone)]
pub struct SignatureSummary {
    pub signature: String,
    pub slot: u64,
    pub err: bool,
}

/// Largest-account entry from `getTokenLargestAccounts`.
#[derive(Debug, Clone)]
pub struct TokenAccountBalance {
    pub address: Pubkey,
    pub amount: u64,
}

#[derive(Debug, Clone)]
pub struct TokenSupply {
    pub amount: u64,
    pub decimals: u8,
}

/// Result of `simulateTransaction`, reduced to what the risk analyzer
/// interprets.
#[derive(Debug, Clone, Default)]
pub struct SimulationOutcome {
    pub err: Option<String>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<AccountBlob>>;

    /// `addresses.len()` must be <= 100 (one wire batch).
    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<AccountBlob>>>;

    async fn get_transaction(
        &self,
        signature: &str,
        commitment: CommitmentConfig,
    ) -> Result<Option<FetchedTransaction>>;

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
        skip_preflight: bool,
    ) -> Result<String>;

    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        limit: usize,
        until: Option<String>,
    ) -> Result<Vec<SignatureSummary>>;

    async fn get_balance(&self, address: &Pubkey) -> Result<u64>;

    async fn get_token_largest_accounts(&self, mint: &Pubkey)
        -> Result<Vec<TokenAccountBalance>>;

    async fn get_token_supply(&self, mint: &Pubkey) -> Result<TokenSupply>;

    async fn get_latest_blockhash(&self) -> Result<Hash>;

    async fn simulate_transaction(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<SimulationOutcome>;

    async fn confirm_transaction(&self, signature: &str) -> Result<bool>;
}

/// Production transport over the standard JSON-RPC surface.
pub struct SolanaTransport {
    client: RpcClient,
}

impl SolanaTransport {
    pub fn new(url: String, timeout: Duration) -> Self {
        Self {
            client: RpcClient::new_with_timeout(url, timeout),
        }
    }

    fn to_blob(account: solana_sdk::account::Account, slot: u64) -> AccountBlob {
        AccountBlob {
            data: account.data,
            owner: account.owner,
            lamports: account.lamports,
            slot,
        }
    }
}

#[async_trait]
impl RpcTransport for SolanaTransport {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<AccountBlob>> {
        let response = self
            .client
            .get_account_with_commitment(address, CommitmentConfig::processed())
            .await
            .context("getAccountInfo failed")?;
        Ok(response
            .value
            .map(|account| Self::to_blob(account, response.context.slot)))
    }

    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<AccountBlob>>> {
        let response = self
            .client
            .get_multiple_accounts_with_commitment(addresses, CommitmentConfig::processed())
            .await
            .context("getMultipleAccounts failed")?;
        let slot = response.context.slot;
        Ok(response
            .value
            .into_iter()
            .map(|maybe| maybe.map(|account| Self::to_blob(account, slot)))
            .collect())
    }

    async fn get_transaction(
        &self,
        signature: &str,
        commitment: CommitmentConfig,
    ) -> Result<Option<FetchedTransaction>> {
        let sig = Signature::from_str(signature).context("invalid signature")?;
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(commitment),
            max_supported_transaction_version: Some(0),
        };

        let fetched = match self.client.get_transaction_with_config(&sig, config).await {
            Ok(tx) => tx,
            // A not-yet-indexed signature is a miss, not a failure.
            Err(e) if e.to_string().contains("not found") => return Ok(None),
            Err(e) => return Err(e).context("getTransaction failed"),
        };

        let slot = fetched.slot;
        let decoded = match fetched.transaction.transaction.decode() {
            Some(tx) => tx,
            None => return Ok(None),
        };

        let keys: Vec<Pubkey> = decoded.message.static_account_keys().to_vec();
        let instructions = decoded
            .message
            .instructions()
            .iter()
            .filter_map(|ix| {
                let program_id = keys.get(ix.program_id_index as usize)?;
                // Accounts resolved through address-lookup tables are
                // outside the static key set and cannot be decoded here.
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

        let logs = fetched
            .transaction
            .meta
            .and_then(|meta| Option::<Vec<String>>::from(meta.log_messages))
            .unwrap_or_default();

        Ok(Some(FetchedTransaction {
            signature: signature.to_string(),
            slot,
            instructions,
            logs,
        }))
    }

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
        skip_preflight: bool,
    ) -> Result<String> {
        let config = RpcSendTransactionConfig {
            skip_preflight,
            ..RpcSendTransactionConfig::default()
        };
        let signature = self
            .client
            .send_transaction_with_config(tx, config)
            .await
            .context("sendTransaction failed")?;
        Ok(signature.to_string())
    }

    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        limit: usize,
        until: Option<String>,
    ) -> Result<Vec<SignatureSummary>> {
        let until = match until {
            Some(s) => Some(Signature::from_str(&s).context("invalid cursor signature")?),
            None => None,
        };
        let config = GetConfirmedSignaturesForAddress2Config {
            before: None,
            until,
            limit: Some(limit),
            commitment: Some(CommitmentConfig::confirmed()),
        };
        let entries = self
            .client
            .get_signatures_for_address_with_config(address, config)
            .await
            .context("getSignaturesForAddress failed")?;
        Ok(entries
            .into_iter()
            .map(|entry| SignatureSummary {
                signature: entry.signature,
                slot: entry.slot,
                err: entry.err.is_some(),
            })
            .collect())
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64> {
        self.client
            .get_balance(address)
            .await
            .context("getBalance failed")
    }

    async fn get_token_largest_accounts(
        &self,
        mint: &Pubkey,
    ) -> Result<Vec<TokenAccountBalance>> {
        let entries = self
            .client
            .get_token_largest_accounts(mint)
            .await
            .context("getTokenLargestAccounts failed")?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let address = Pubkey::from_str(&entry.address).ok()?;
                let amount = entry.amount.amount.parse::<u64>().ok()?;
                Some(TokenAccountBalance { address, amount })
            })
            .collect())
    }

    async fn get_token_supply(&self, mint: &Pubkey) -> Result<TokenSupply> {
        let supply = self
            .client
            .get_token_supply(mint)
            .await
            .context("getTokenSupply failed")?;
        Ok(TokenSupply {
            amount: supply.amount.parse::<u64>().unwrap_or(0),
            decimals: supply.decimals,
        })
    }

    async fn get_latest_blockhash(&self) -> Result<Hash> {
        self.client
            .get_latest_blockhash()
            .await
            .context("getLatestBlockhash failed")
    }

    async fn simulate_transaction(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<SimulationOutcome> {
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: true,
            commitment: Some(CommitmentConfig::processed()),
            ..RpcSimulateTransactionConfig::default()
        };
        let response = self
            .client
            .simulate_transaction_with_config(tx, config)
            .await
            .context("simulateTransaction failed")?;
        let value = response.value;
        Ok(SimulationOutcome {
            err: value.err.map(|e| format!("{e:?}")),
            logs: value.logs.unwrap_or_default(),
            units_consumed: value.units_consumed,
        })
    }

    async fn confirm_transaction(&self, signature: &str) -> Result<bool> {
        let sig = Signature::from_str(signature).context("invalid signature")?;
        self.client
            .confirm_transaction(&sig)
            .await
            .context("confirmTransaction failed")
    }
}
