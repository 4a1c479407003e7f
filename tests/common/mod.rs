//! Shared in-memory chain fixture for the scenario tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;

use solsniper::config::{BundleConfig, ProviderConfig, RpcSettings};
use solsniper::dex::pumpfun::{
    self, BondingCurveState, INITIAL_VIRTUAL_SOL_RESERVES, INITIAL_VIRTUAL_TOKEN_RESERVES,
};
use solsniper::rpc::{
    AccountBlob, FetchedTransaction, RpcManager, RpcTransport, SignatureSummary,
    SimulationOutcome, TokenAccountBalance, TokenSupply,
};
use solsniper::types::{token_program, DexKind};

/// Scriptable transport: a mutable account map plus canned holder,
/// supply and simulation responses, with a failure toggle and call
/// counters for routing assertions.
#[derive(Default)]
pub struct MockChain {
    pub accounts: Mutex<HashMap<Pubkey, AccountBlob>>,
    pub largest: Mutex<Vec<TokenAccountBalance>>,
    pub supply: Mutex<u64>,
    pub simulation: Mutex<SimulationOutcome>,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
    pub sends: Mutex<Vec<String>>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_account(&self, address: Pubkey, blob: AccountBlob) {
        self.accounts.lock().unwrap().insert(address, blob);
    }

    /// The curve account doubles as the SOL vault: its lamports track
    /// the real reserves plus rent.
    pub fn set_curve(&self, pool: Pubkey, state: &BondingCurveState) {
        self.set_account(
            pool,
            AccountBlob {
                data: pumpfun::encode_curve(state),
                owner: DexKind::Pumpfun.program_id(),
                lamports: state.real_sol_reserves + 2_039_280,
                slot: 1,
            },
        );
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err(anyhow!("mock transport failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RpcTransport for MockChain {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<AccountBlob>> {
        self.check()?;
        Ok(self.accounts.lock().unwrap().get(address).cloned())
    }
    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<AccountBlob>>> {
        self.check()?;
        let accounts = self.accounts.lock().unwrap();
        Ok(addresses.iter().map(|a| accounts.get(a).cloned()).collect())
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
        tx: &VersionedTransaction,
        _skip_preflight: bool,
    ) -> Result<String> {
        self.check()?;
        let signature = tx.signatures[0].to_string();
        self.sends.lock().unwrap().push(signature.clone());
        Ok(signature)
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
    async fn get_balance(&self, address: &Pubkey) -> Result<u64> {
        self.check()?;
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .get(address)
            .map(|b| b.lamports)
            .unwrap_or(0))
    }
    async fn get_token_largest_accounts(
        &self,
        _mint: &Pubkey,
    ) -> Result<Vec<TokenAccountBalance>> {
        self.check()?;
        Ok(self.largest.lock().unwrap().clone())
    }
    async fn get_token_supply(&self, _mint: &Pubkey) -> Result<TokenSupply> {
        self.check()?;
        Ok(TokenSupply {
            amount: *self.supply.lock().unwrap(),
            decimals: 6,
        })
    }
    async fn get_latest_blockhash(&self) -> Result<Hash> {
        self.check()?;
        Ok(Hash::new_unique())
    }
    async fn simulate_transaction(
        &self,
        _tx: &VersionedTransaction,
    ) -> Result<SimulationOutcome> {
        self.check()?;
        Ok(self.simulation.lock().unwrap().clone())
    }
    async fn confirm_transaction(&self, _signature: &str) -> Result<bool> {
        self.check()?;
        Ok(true)
    }
}

pub fn provider(name: &str, priority: u8, rps: u32) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        url: format!("http://{name}"),
        ws_url: None,
        rps_limit: rps,
        priority,
    }
}

pub fn manager_over(
    chains: Vec<(ProviderConfig, Arc<MockChain>)>,
    settings: &RpcSettings,
) -> Arc<RpcManager> {
    let pairs = chains
        .into_iter()
        .map(|(config, chain)| (config, chain as Arc<dyn RpcTransport>))
        .collect();
    Arc::new(RpcManager::with_transports(pairs, settings).unwrap())
}

pub fn single_manager(chain: Arc<MockChain>) -> Arc<RpcManager> {
    manager_over(
        vec![(provider("mock", 1, 1_000), chain)],
        &RpcSettings::default(),
    )
}

/// Fresh bonding curve carrying the protocol's initial reserves.
pub fn fresh_curve() -> BondingCurveState {
    BondingCurveState {
        virtual_token_reserves: INITIAL_VIRTUAL_TOKEN_RESERVES,
        virtual_sol_reserves: INITIAL_VIRTUAL_SOL_RESERVES,
        real_token_reserves: 793_100_000_000_000,
        real_sol_reserves: 0,
        token_total_supply: 1_000_000_000_000_000,
        complete: false,
    }
}

/// Curve tuned so the spot price is exactly `price_sol_per_token`.
pub fn curve_at_price(price_sol_per_token: f64) -> BondingCurveState {
    let vtok: u64 = 100_000_000_000_000;
    let vsol = (price_sol_per_token * 1e3 * vtok as f64) as u64;
    BondingCurveState {
        virtual_token_reserves: vtok,
        virtual_sol_reserves: vsol,
        real_token_reserves: vtok,
        real_sol_reserves: vsol,
        token_total_supply: vtok,
        complete: false,
    }
}

/// Minimal SPL mint account blob.
pub fn mint_blob(mint_authority: Option<Pubkey>, freeze_authority: Option<Pubkey>) -> AccountBlob {
    let mut data = vec![0u8; 82];
    if let Some(authority) = mint_authority {
        data[0..4].copy_from_slice(&1u32.to_le_bytes());
        data[4..36].copy_from_slice(authority.as_ref());
    }
    data[36..44].copy_from_slice(&1_000_000_000_000_000u64.to_le_bytes());
    data[44] = 6;
    data[45] = 1;
    if let Some(authority) = freeze_authority {
        data[46..50].copy_from_slice(&1u32.to_le_bytes());
        data[50..82].copy_from_slice(authority.as_ref());
    }
    AccountBlob {
        data,
        owner: token_program(),
        lamports: 1_461_600,
        slot: 1,
    }
}

/// Token-2022 mint blob with one extension TLV entry.
pub fn token_2022_mint_blob(extension_type: u16, body_len: usize) -> AccountBlob {
    let mut blob = mint_blob(None, None);
    blob.owner = solsniper::types::token_2022_program();
    blob.data.resize(165, 0);
    blob.data.push(1); // account type: mint
    blob.data.extend_from_slice(&extension_type.to_le_bytes());
    blob.data.extend_from_slice(&(body_len as u16).to_le_bytes());
    blob.data.extend(std::iter::repeat(0u8).take(body_len));
    blob
}

/// Unroutable block-engine endpoint: the bundle path fails fast and
/// execution falls back to the direct RPC send.
pub fn offline_bundle_config() -> BundleConfig {
    BundleConfig {
        block_engine_url: "http://127.0.0.1:9/api/v1".to_string(),
        bundle_timeout_ms: 500,
        bundle_poll_interval_ms: 100,
        ..BundleConfig::default()
    }
}
