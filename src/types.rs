//! Shared data structures and types

use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::{Address, OutPoint, ScriptBuf, XOnlyPublicKey};

// ── Constants ────────────────────────────────────────────────────────────────

/// Default fee rate when the caller supplies none.
pub const DEFAULT_SATS_BYTE: u64 = 10;

/// Fallback fee rate when auto-detection fails or returns a non-number.
pub const FALLBACK_SATS_BYTE: u64 = 200;

/// Default value for a minted atomical output.
pub const DEFAULT_SATS_ATOMICAL_UTXO: u64 = 1000;

/// Minimum output value below which change is not worth adding.
pub const DUST_AMOUNT: u64 = 546;

/// Hard ceiling on the implied fee of any transaction we broadcast.
/// 1/100 of a BTC; exceeding it requires an explicit operator override.
pub const EXCESSIVE_FEE_LIMIT: u64 = 1_000_000;

/// Input sequence signalling opt-in replace-by-fee.
pub const RBF_INPUT_SEQUENCE: u32 = 0xFFFF_FFFD;

// ── UTXO & Output Types ──────────────────────────────────────────────────────

/// A spendable output reference, captured once and owned by exactly one
/// operation for the duration of its commit/reveal sequence.
#[derive(Debug, Clone)]
pub struct UtxoRef {
    pub outpoint: OutPoint,
    pub value: u64,
    /// Prevout script, required as the witness UTXO when signing.
    pub script_pubkey: ScriptBuf,
    /// X-only key of the owner, when known (key-path spendable inputs).
    pub owner: Option<XOnlyPublicKey>,
}

/// Destination of a declared output: an address or a raw script, never both.
#[derive(Debug, Clone)]
pub enum OutputTarget {
    Address(Address),
    Script(ScriptBuf),
}

/// One caller-declared reveal output.
#[derive(Debug, Clone)]
pub struct OutputRequest {
    pub target: OutputTarget,
    pub value: u64,
}

impl OutputRequest {
    pub fn to_address(address: Address, value: u64) -> Self {
        OutputRequest {
            target: OutputTarget::Address(address),
            value,
        }
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        match &self.target {
            OutputTarget::Address(addr) => addr.script_pubkey(),
            OutputTarget::Script(script) => script.clone(),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Current unix time in whole seconds.
pub fn unix_time_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
