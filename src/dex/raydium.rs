//! Raydium AMM v4 decoding.
//!
//! Two entry points: the fixed-offset pool account layout for account
//! updates, and the `initialize2` instruction for transaction updates.
//! Anything that does not parse is simply not a pool.

use solana_sdk::pubkey::Pubkey;
use tracing::trace;

use super::DexDecoder;
use crate::rpc::DecodedInstruction;
use crate::types::{unix_now, wsol_mint, DexKind, PoolEvent};

/// Shortest account blob the field walk below can read. The v4 layout
/// is 752 bytes on chain; everything this decoder touches sits before
/// this boundary.
pub const MIN_POOL_STATE_LEN: usize = 679;

/// 8-byte prefix of the `initialize2` instruction data.
pub const INITIALIZE2_DISCRIMINATOR: [u8; 8] = [0xaf, 0xaf, 0x6d, 0x1f, 0x0d, 0x98, 0x9b, 0xed];

/// `initialize2` carries 21 accounts; everything the decoder reads sits
/// in the first 12.
const MIN_INITIALIZE2_ACCOUNTS: usize = 12;

// Fixed offsets into the v4 pool state.
const OFFSET_STATUS: usize = 0;
const OFFSET_BASE_DECIMALS: usize = 32;
const OFFSET_QUOTE_DECIMALS: usize = 40;
const OFFSET_POOL_OPEN_TIME: usize = 224;
const OFFSET_BASE_VAULT: usize = 336;
const OFFSET_QUOTE_VAULT: usize = 368;
const OFFSET_BASE_MINT: usize = 400;
const OFFSET_QUOTE_MINT: usize = 432;
const OFFSET_LP_MINT: usize = 464;
const OFFSET_OPEN_ORDERS: usize = 496;
const OFFSET_MARKET_ID: usize = 528;

/// Pool statuses representing a live, tradeable pool.
const STATUS_INITIALIZED: u64 = 1;
const STATUS_SWAP_ENABLED: u64 = 6;

/// Structured view over the v4 pool account.
#[derive(Debug, Clone, PartialEq)]
pub struct RaydiumPoolState {
    pub status: u64,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub pool_open_time: u64,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub lp_mint: Pubkey,
    pub open_orders: Pubkey,
    pub market_id: Pubkey,
}

impl RaydiumPoolState {
    pub fn is_live(&self) -> bool {
        self.status == STATUS_INITIALIZED || self.status == STATUS_SWAP_ENABLED
    }
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn read_pubkey(data: &[u8], offset: usize) -> Pubkey {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&data[offset..offset + 32]);
    Pubkey::new_from_array(bytes)
}

/// Parse a v4 pool account blob. Returns `None` for anything too short
/// to hold the layout.
pub fn parse_pool_state(data: &[u8]) -> Option<RaydiumPoolState> {
    if data.len() < MIN_POOL_STATE_LEN {
        return None;
    }

    Some(RaydiumPoolState {
        status: read_u64(data, OFFSET_STATUS),
        base_decimals: read_u64(data, OFFSET_BASE_DECIMALS) as u8,
        quote_decimals: read_u64(data, OFFSET_QUOTE_DECIMALS) as u8,
        pool_open_time: read_u64(data, OFFSET_POOL_OPEN_TIME),
        base_vault: read_pubkey(data, OFFSET_BASE_VAULT),
        quote_vault: read_pubkey(data, OFFSET_QUOTE_VAULT),
        base_mint: read_pubkey(data, OFFSET_BASE_MINT),
        quote_mint: read_pubkey(data, OFFSET_QUOTE_MINT),
        lp_mint: read_pubkey(data, OFFSET_LP_MINT),
        open_orders: read_pubkey(data, OFFSET_OPEN_ORDERS),
        market_id: read_pubkey(data, OFFSET_MARKET_ID),
    })
}

/// Serialize a pool state back into a minimal account blob. Test
/// fixture support: fields round-trip through `parse_pool_state`.
#[cfg(test)]
pub fn encode_pool_state(state: &RaydiumPoolState) -> Vec<u8> {
    let mut data = vec![0u8; MIN_POOL_STATE_LEN];
    data[OFFSET_STATUS..OFFSET_STATUS + 8].copy_from_slice(&state.status.to_le_bytes());
    data[OFFSET_BASE_DECIMALS..OFFSET_BASE_DECIMALS + 8]
        .copy_from_slice(&(state.base_decimals as u64).to_le_bytes());
    data[OFFSET_QUOTE_DECIMALS..OFFSET_QUOTE_DECIMALS + 8]
        .copy_from_slice(&(state.quote_decimals as u64).to_le_bytes());
    data[OFFSET_POOL_OPEN_TIME..OFFSET_POOL_OPEN_TIME + 8]
        .copy_from_slice(&state.pool_open_time.to_le_bytes());
    data[OFFSET_BASE_VAULT..OFFSET_BASE_VAULT + 32].copy_from_slice(state.base_vault.as_ref());
    data[OFFSET_QUOTE_VAULT..OFFSET_QUOTE_VAULT + 32].copy_from_slice(state.quote_vault.as_ref());
    data[OFFSET_BASE_MINT..OFFSET_BASE_MINT + 32].copy_from_slice(state.base_mint.as_ref());
    data[OFFSET_QUOTE_MINT..OFFSET_QUOTE_MINT + 32].copy_from_slice(state.quote_mint.as_ref());
    data[OFFSET_LP_MINT..OFFSET_LP_MINT + 32].copy_from_slice(state.lp_mint.as_ref());
    data[OFFSET_OPEN_ORDERS..OFFSET_OPEN_ORDERS + 32]
        .copy_from_slice(state.open_orders.as_ref());
    data[OFFSET_MARKET_ID..OFFSET_MARKET_ID + 32].copy_from_slice(state.market_id.as_ref());
    data
}

#[derive(Debug, Default)]
pub struct RaydiumDecoder;

impl RaydiumDecoder {
    pub fn new() -> Self {
        Self
    }

    fn event_from_state(
        &self,
        address: &Pubkey,
        state: &RaydiumPoolState,
        slot: u64,
        signature: String,
    ) -> PoolEvent {
        // If the base leg is wrapped SOL the tradeable token is on the
        // quote side.
        let mint = if state.base_mint == wsol_mint() {
            state.quote_mint
        } else {
            state.base_mint
        };

        PoolEvent::NewPool {
            dex: DexKind::Raydium,
            mint,
            pool: *address,
            base_mint: state.base_mint,
            quote_mint: state.quote_mint,
            base_vault: state.base_vault,
            quote_vault: state.quote_vault,
            lp_mint: Some(state.lp_mint),
            open_time: Some(state.pool_open_time),
            slot,
            signature,
            timestamp: unix_now(),
        }
    }
}

impl DexDecoder for RaydiumDecoder {
    fn dex(&self) -> DexKind {
        DexKind::Raydium
    }

    fn parse_account(&self, address: &Pubkey, data: &[u8], slot: u64) -> Option<PoolEvent> {
        let state = parse_pool_state(data)?;
        if !state.is_live() {
            trace!(pool = %address, status = state.status, "ignoring non-live raydium pool");
            return None;
        }
        Some(self.event_from_state(address, &state, slot, String::new()))
    }

    fn parse_transaction(
        &self,
        signature: &str,
        instructions: &[DecodedInstruction],
        slot: u64,
    ) -> Option<PoolEvent> {
        let program = DexKind::Raydium.program_id();

        for ix in instructions {
            if ix.program_id != program {
                continue;
            }
            if ix.data.len() < 8 || ix.data[..8] != INITIALIZE2_DISCRIMINATOR {
                continue;
            }
            if ix.accounts.len() < MIN_INITIALIZE2_ACCOUNTS {
                trace!(%signature, accounts = ix.accounts.len(), "initialize2 with too few accounts");
                continue;
            }

            // Fixed account slots of initialize2.
            let pool = ix.accounts[4];
            let lp_mint = ix.accounts[7];
            let base_mint = ix.accounts[8];
            let quote_mint = ix.accounts[9];
            let base_vault = ix.accounts[10];
            let quote_vault = ix.accounts[11];

            let mint = if base_mint == wsol_mint() {
                quote_mint
            } else {
                base_mint
            };

            return Some(PoolEvent::NewPool {
                dex: DexKind::Raydium,
                mint,
                pool,
                base_mint,
                quote_mint,
                base_vault,
                quote_vault,
                lp_mint: Some(lp_mint),
                open_time: None,
                slot,
                signature: signature.to_string(),
                timestamp: unix_now(),
            });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_state() -> RaydiumPoolState {
        RaydiumPoolState {
            status: STATUS_SWAP_ENABLED,
            base_decimals: 6,
            quote_decimals: 9,
            pool_open_time: 1_700_000_000,
            base_vault: Pubkey::new_unique(),
            quote_vault: Pubkey::new_unique(),
            base_mint: Pubkey::new_unique(),
            quote_mint: wsol_mint(),
            lp_mint: Pubkey::new_unique(),
            open_orders: Pubkey::new_unique(),
            market_id: Pubkey::new_unique(),
        }
    }

    #[test]
    fn test_pool_state_round_trip() {
        let state = live_state();
        let encoded = encode_pool_state(&state);
        let decoded = parse_pool_state(&encoded).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_short_blob_rejected() {
        assert!(parse_pool_state(&[0u8; MIN_POOL_STATE_LEN - 1]).is_none());
    }

    #[test]
    fn test_non_live_status_ignored() {
        let mut state = live_state();
        state.status = 4; // withdraw-only
        let encoded = encode_pool_state(&state);

        let decoder = RaydiumDecoder::new();
        assert!(decoder
            .parse_account(&Pubkey::new_unique(), &encoded, 1)
            .is_none());
    }

    #[test]
    fn test_live_statuses_accepted() {
        let decoder = RaydiumDecoder::new();
        for status in [STATUS_INITIALIZED, STATUS_SWAP_ENABLED] {
            let mut state = live_state();
            state.status = status;
            let encoded = encode_pool_state(&state);
            let event = decoder
                .parse_account(&Pubkey::new_unique(), &encoded, 7)
                .unwrap();
            assert!(matches!(event, PoolEvent::NewPool { dex: DexKind::Raydium, .. }));
        }
    }

    #[test]
    fn test_account_mint_side_selection() {
        let decoder = RaydiumDecoder::new();

        // Base is WSOL: the token is the quote mint.
        let mut state = live_state();
        let token = Pubkey::new_unique();
        state.base_mint = wsol_mint();
        state.quote_mint = token;
        let event = decoder
            .parse_account(&Pubkey::new_unique(), &encode_pool_state(&state), 1)
            .unwrap();
        match event {
            PoolEvent::NewPool { mint, .. } => assert_eq!(mint, token),
            other => panic!("unexpected event {other:?}"),
        }
    }

    fn initialize2_instruction(accounts: Vec<Pubkey>) -> DecodedInstruction {
        let mut data = INITIALIZE2_DISCRIMINATOR.to_vec();
        data.extend_from_slice(&[0u8; 24]); // nonce + open_time + amounts
        DecodedInstruction {
            program_id: DexKind::Raydium.program_id(),
            accounts,
            data,
        }
    }

    #[test]
    fn test_initialize2_transaction() {
        let accounts: Vec<Pubkey> = (0..21).map(|_| Pubkey::new_unique()).collect();
        let ix = initialize2_instruction(accounts.clone());

        let decoder = RaydiumDecoder::new();
        let event = decoder.parse_transaction("sig1", &[ix], 99).unwrap();

        match event {
            PoolEvent::NewPool {
                dex,
                pool,
                base_mint,
                quote_mint,
                base_vault,
                quote_vault,
                lp_mint,
                slot,
                signature,
                ..
            } => {
                assert_eq!(dex, DexKind::Raydium);
                assert_eq!(pool, accounts[4]);
                assert_eq!(lp_mint, Some(accounts[7]));
                assert_eq!(base_mint, accounts[8]);
                assert_eq!(quote_mint, accounts[9]);
                assert_eq!(base_vault, accounts[10]);
                assert_eq!(quote_vault, accounts[11]);
                assert_eq!(slot, 99);
                assert_eq!(signature, "sig1");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_initialize2_too_few_accounts_skipped() {
        let accounts: Vec<Pubkey> = (0..11).map(|_| Pubkey::new_unique()).collect();
        let ix = initialize2_instruction(accounts);

        let decoder = RaydiumDecoder::new();
        assert!(decoder.parse_transaction("sig", &[ix], 1).is_none());
    }

    #[test]
    fn test_wrong_discriminator_skipped() {
        let mut ix = initialize2_instruction((0..21).map(|_| Pubkey::new_unique()).collect());
        ix.data[0] ^= 0xff;

        let decoder = RaydiumDecoder::new();
        assert!(decoder.parse_transaction("sig", &[ix], 1).is_none());
    }

    #[test]
    fn test_other_program_skipped() {
        let mut ix = initialize2_instruction((0..21).map(|_| Pubkey::new_unique()).collect());
        ix.program_id = Pubkey::new_unique();

        let decoder = RaydiumDecoder::new();
        assert!(decoder.parse_transaction("sig", &[ix], 1).is_none());
    }
}
