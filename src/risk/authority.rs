//! Mint authority and token-program extension checks (phase 1).
//!
//! One account read produces the mint/freeze authority factors and,
//! for Token-2022 mints, a walk of the extension TLV list. Several
//! extension types are capable of denying sells outright and are
//! treated as fatal.

use solana_sdk::pubkey::Pubkey;

use super::types::*;
use crate::types::{token_2022_program, token_program};

/// Base SPL mint record length.
const MINT_BASE_LEN: usize = 82;
/// Token-2022 account-type byte position; extensions follow it.
const ACCOUNT_TYPE_OFFSET: usize = 165;
const EXTENSION_START: usize = 166;
const ACCOUNT_TYPE_MINT: u8 = 1;

// Token-2022 extension type ids.
const EXT_TRANSFER_FEE_CONFIG: u16 = 1;
const EXT_MINT_CLOSE_AUTHORITY: u16 = 3;
const EXT_DEFAULT_ACCOUNT_STATE: u16 = 6;
const EXT_NON_TRANSFERABLE: u16 = 9;
const EXT_PERMANENT_DELEGATE: u16 = 12;
const EXT_TRANSFER_HOOK: u16 = 14;

/// Basis-point thresholds for the transfer-fee rules.
const TRANSFER_FEE_HEAVY_BPS: u16 = 100;
const TRANSFER_FEE_WARN_BPS: u16 = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionKind {
    TransferFeeConfig { basis_points: u16 },
    MintCloseAuthority,
    DefaultAccountState { frozen: bool },
    NonTransferable,
    PermanentDelegate,
    TransferHook,
    Other(u16),
}

impl ExtensionKind {
    /// Extensions capable of denying a sell.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExtensionKind::MintCloseAuthority
                | ExtensionKind::PermanentDelegate
                | ExtensionKind::TransferHook
                | ExtensionKind::NonTransferable
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExtensionKind::TransferFeeConfig { .. } => "TransferFeeConfig",
            ExtensionKind::MintCloseAuthority => "MintCloseAuthority",
            ExtensionKind::DefaultAccountState { .. } => "DefaultAccountState",
            ExtensionKind::NonTransferable => "NonTransferable",
            ExtensionKind::PermanentDelegate => "PermanentDelegate",
            ExtensionKind::TransferHook => "TransferHook",
            ExtensionKind::Other(_) => "Other",
        }
    }
}

/// Parsed view over a mint account.
#[derive(Debug, Clone)]
pub struct MintInfo {
    pub mint_authority: Option<Pubkey>,
    pub freeze_authority: Option<Pubkey>,
    pub supply: u64,
    pub decimals: u8,
    pub token_2022: bool,
    pub extensions: Vec<ExtensionKind>,
}

fn read_coption_pubkey(data: &[u8], offset: usize) -> Option<Pubkey> {
    let tag = u32::from_le_bytes(data[offset..offset + 4].try_into().ok()?);
    if tag == 0 {
        return None;
    }
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&data[offset + 4..offset + 36]);
    Some(Pubkey::new_from_array(bytes))
}

/// Parse a mint owned by either token program. `None` when the blob is
/// not a mint.
pub fn parse_mint(owner: &Pubkey, data: &[u8]) -> Option<MintInfo> {
    let token_2022 = *owner == token_2022_program();
    if !token_2022 && *owner != token_program() {
        return None;
    }
    if data.len() < MINT_BASE_LEN {
        return None;
    }

    let mint_authority = read_coption_pubkey(data, 0);
    let supply = u64::from_le_bytes(data[36..44].try_into().ok()?);
    let decimals = data[44];
    let freeze_authority = read_coption_pubkey(data, 46);

    let extensions = if token_2022 {
        parse_extension_tlv(data)
    } else {
        Vec::new()
    };

    Some(MintInfo {
        mint_authority,
        freeze_authority,
        supply,
        decimals,
        token_2022,
        extensions,
    })
}

/// Walk the Token-2022 TLV list after the base record.
fn parse_extension_tlv(data: &[u8]) -> Vec<ExtensionKind> {
    let mut out = Vec::new();
    if data.len() <= EXTENSION_START || data[ACCOUNT_TYPE_OFFSET] != ACCOUNT_TYPE_MINT {
        return out;
    }

    let mut cursor = EXTENSION_START;
    while cursor + 4 <= data.len() {
        let ext_type = u16::from_le_bytes([data[cursor], data[cursor + 1]]);
        let length = u16::from_le_bytes([data[cursor + 2], data[cursor + 3]]) as usize;
        let body_start = cursor + 4;
        if ext_type == 0 {
            break;
        }
        if body_start + length > data.len() {
            break;
        }
        let body = &data[body_start..body_start + length];

        out.push(match ext_type {
            EXT_TRANSFER_FEE_CONFIG => ExtensionKind::TransferFeeConfig {
                basis_points: parse_transfer_fee_bps(body),
            },
            EXT_MINT_CLOSE_AUTHORITY => ExtensionKind::MintCloseAuthority,
            EXT_DEFAULT_ACCOUNT_STATE => ExtensionKind::DefaultAccountState {
                frozen: body.first().copied() == Some(2),
            },
            EXT_NON_TRANSFERABLE => ExtensionKind::NonTransferable,
            EXT_PERMANENT_DELEGATE => ExtensionKind::PermanentDelegate,
            EXT_TRANSFER_HOOK => ExtensionKind::TransferHook,
            other => ExtensionKind::Other(other),
        });

        cursor = body_start + length;
    }

    out
}

/// The newer of the two fee schedules lives at the tail of the record.
fn parse_transfer_fee_bps(body: &[u8]) -> u16 {
    if body.len() >= 108 {
        u16::from_le_bytes([body[106], body[107]])
    } else {
        0
    }
}

/// Authority factors from a parsed mint.
pub fn authority_factors(info: &MintInfo) -> Vec<RiskFactor> {
    let mut factors = Vec::with_capacity(2);

    factors.push(match info.mint_authority {
        None => RiskFactor::passed(
            FACTOR_MINT_AUTHORITY,
            SCORE_MINT_AUTHORITY_REVOKED,
            SCORE_MINT_AUTHORITY_REVOKED,
            "mint authority revoked",
        ),
        Some(authority) => RiskFactor::failed(
            FACTOR_MINT_AUTHORITY,
            0,
            SCORE_MINT_AUTHORITY_REVOKED,
            format!("mint authority live: {authority}"),
        ),
    });

    factors.push(match info.freeze_authority {
        None => RiskFactor::passed(
            FACTOR_FREEZE_AUTHORITY,
            SCORE_FREEZE_AUTHORITY_REVOKED,
            SCORE_FREEZE_AUTHORITY_REVOKED,
            "freeze authority revoked",
        ),
        Some(authority) => RiskFactor::failed(
            FACTOR_FREEZE_AUTHORITY,
            0,
            SCORE_FREEZE_AUTHORITY_REVOKED,
            format!("freeze authority live: {authority}"),
        ),
    });

    factors
}

/// Extension factor plus any warnings it generates.
pub fn extension_factors(info: &MintInfo) -> (Vec<RiskFactor>, Vec<String>) {
    let mut warnings = Vec::new();

    if !info.token_2022 {
        return (
            vec![RiskFactor::passed(
                FACTOR_EXTENSIONS,
                SCORE_SPL_STANDARD,
                SCORE_SPL_STANDARD,
                "standard SPL mint",
            )],
            warnings,
        );
    }

    let fatal: Vec<&'static str> = info
        .extensions
        .iter()
        .filter(|e| e.is_fatal())
        .map(|e| e.name())
        .collect();
    if !fatal.is_empty() {
        return (
            vec![RiskFactor::failed(
                FACTOR_CRITICAL_EXTENSIONS,
                -30,
                0,
                format!("sell-denying extensions present: {}", fatal.join(", ")),
            )],
            warnings,
        );
    }

    let mut factors = Vec::new();
    let mut penalty = 0i32;

    for ext in &info.extensions {
        match ext {
            ExtensionKind::TransferFeeConfig { basis_points } => {
                if *basis_points > TRANSFER_FEE_HEAVY_BPS {
                    penalty -= 20;
                    warnings.push(format!("transfer fee {basis_points} bps"));
                } else if *basis_points > TRANSFER_FEE_WARN_BPS {
                    penalty -= 5;
                    warnings.push(format!("transfer fee {basis_points} bps"));
                } else if *basis_points > 0 {
                    warnings.push(format!("negligible transfer fee {basis_points} bps"));
                }
            }
            ExtensionKind::DefaultAccountState { frozen: true } => {
                penalty -= 10;
                warnings.push("default account state is frozen".to_string());
            }
            _ => {}
        }
    }

    factors.push(RiskFactor::passed(
        FACTOR_EXTENSIONS,
        SCORE_BENIGN_TOKEN_2022 + penalty,
        SCORE_BENIGN_TOKEN_2022,
        if penalty == 0 {
            "token-2022 with benign extensions".to_string()
        } else {
            format!("token-2022 with penalized extensions ({penalty})")
        },
    ));

    (factors, warnings)
}

/// True when any sell-denying extension is present; drives the
/// quick-check rejection.
pub fn has_fatal_extension(info: &MintInfo) -> bool {
    info.extensions.iter().any(|e| e.is_fatal())
}
