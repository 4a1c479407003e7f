//! Block-engine JSON-RPC client.
//!
//! Three methods are consumed: `sendBundle`, `getBundleStatuses` and
//! `getTipAccounts`. Responses are normalized into a small status enum;
//! only `Landed` counts as success.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

/// Normalized bundle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    Landed,
    Failed,
    Dropped,
    Pending,
    Unknown,
}

impl BundleState {
    pub fn from_status(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "landed" | "confirmed" | "finalized" => Self::Landed,
            "failed" | "rejected" => Self::Failed,
            "dropped" => Self::Dropped,
            "pending" | "processing" => Self::Pending,
            _ => Self::Unknown,
        }
    }

    /// Terminal states end the polling loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Landed | Self::Failed | Self::Dropped)
    }
}

#[derive(Debug, Clone)]
pub struct BundleStatus {
    pub bundle_id: String,
    pub state: BundleState,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<Value>,
}

pub struct JitoClient {
    http: reqwest::Client,
    endpoint: String,
}

impl JitoClient {
    /// `base_url` is the engine root (e.g. `…/api/v1`); the bundles
    /// path is appended if missing.
    pub fn new(base_url: &str) -> Self {
        let trimmed = base_url.trim_end_matches('/');
        let endpoint = if trimmed.ends_with("/bundles") {
            trimmed.to_string()
        } else {
            format!("{trimmed}/bundles")
        };
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("block engine {method} request failed"))?;

        let parsed: RpcResponse = response
            .json()
            .await
            .with_context(|| format!("block engine {method} returned malformed json"))?;

        if let Some(error) = parsed.error {
            return Err(anyhow!("block engine {method} error: {error}"));
        }
        parsed
            .result
            .ok_or_else(|| anyhow!("block engine {method} returned no result"))
    }

    /// Submit base58-encoded transactions as one bundle; returns the
    /// bundle id.
    #[instrument(skip(self, encoded_transactions), fields(txs = encoded_transactions.len()))]
    pub async fn send_bundle(&self, encoded_transactions: Vec<String>) -> Result<String> {
        let result = self
            .call("sendBundle", json!([encoded_transactions]))
            .await?;
        let bundle_id = result
            .as_str()
            .ok_or_else(|| anyhow!("sendBundle returned non-string id"))?
            .to_string();
        debug!(%bundle_id, "bundle submitted");
        Ok(bundle_id)
    }

    /// Fetch and normalize statuses for the given bundle ids.
    pub async fn get_bundle_statuses(&self, bundle_ids: &[String]) -> Result<Vec<BundleStatus>> {
        let result = self.call("getBundleStatuses", json!([bundle_ids])).await?;

        let entries = result
            .get("value")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let bundle_id = entry.get("bundle_id")?.as_str()?.to_string();
                let status = entry
                    .get("confirmation_status")
                    .or_else(|| entry.get("status"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                Some(BundleStatus {
                    bundle_id,
                    state: BundleState::from_status(status),
                })
            })
            .collect())
    }

    /// The engine's current tip accounts (informational; the fixed
    /// list in `tip` is used for submission).
    pub async fn get_tip_accounts(&self) -> Result<Vec<String>> {
        let result = self.call("getTipAccounts", json!([])).await?;
        Ok(result
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }
}
