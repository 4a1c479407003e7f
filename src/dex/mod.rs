//! DEX decoders: raw account blobs and transaction instructions in,
//! typed pool events out. Decode failures are silent by design — most
//! accounts owned by a DEX program are not pools.

pub mod pumpfun;
pub mod raydium;

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;

use crate::rpc::DecodedInstruction;
use crate::types::{DexKind, PoolEvent};

pub use pumpfun::PumpfunDecoder;
pub use raydium::RaydiumDecoder;

pub trait DexDecoder: Send + Sync {
    fn dex(&self) -> DexKind;

    /// Decode a raw account update. `None` when the blob is not a pool
    /// this decoder recognizes.
    fn parse_account(&self, address: &Pubkey, data: &[u8], slot: u64) -> Option<PoolEvent>;

    /// Decode pool-creation instructions out of a transaction.
    fn parse_transaction(
        &self,
        signature: &str,
        instructions: &[DecodedInstruction],
        slot: u64,
    ) -> Option<PoolEvent>;
}

/// Owner-program → decoder routing table built from the enabled DEXes.
pub struct DecoderRegistry {
    entries: Vec<(Pubkey, Arc<dyn DexDecoder>)>,
    pumpfun: Option<Arc<PumpfunDecoder>>,
}

impl DecoderRegistry {
    pub fn new(enabled: &[DexKind]) -> Self {
        let mut entries: Vec<(Pubkey, Arc<dyn DexDecoder>)> = Vec::new();
        let mut pumpfun = None;

        for dex in enabled {
            match dex {
                DexKind::Raydium => {
                    entries.push((dex.program_id(), Arc::new(RaydiumDecoder::new())));
                }
                DexKind::Pumpfun => {
                    let decoder = Arc::new(PumpfunDecoder::new());
                    pumpfun = Some(decoder.clone());
                    entries.push((dex.program_id(), decoder));
                }
                // Orca pools are watched for creation logs but have no
                // account decoder wired yet.
                DexKind::Orca => {}
            }
        }

        Self { entries, pumpfun }
    }

    pub fn for_owner(&self, owner: &Pubkey) -> Option<&Arc<dyn DexDecoder>> {
        self.entries
            .iter()
            .find(|(program, _)| program == owner)
            .map(|(_, decoder)| decoder)
    }

    /// Hand a transaction to each decoder until one recognizes it.
    pub fn parse_transaction(
        &self,
        signature: &str,
        instructions: &[DecodedInstruction],
        slot: u64,
    ) -> Option<PoolEvent> {
        self.entries
            .iter()
            .find_map(|(_, decoder)| decoder.parse_transaction(signature, instructions, slot))
    }

    /// The pumpfun decoder, for components that need curve parsing or
    /// the curve→mint map directly.
    pub fn pumpfun(&self) -> Option<&Arc<PumpfunDecoder>> {
        self.pumpfun.as_ref()
    }

    pub fn watched_programs(&self) -> Vec<Pubkey> {
        self.entries.iter().map(|(program, _)| *program).collect()
    }
}
