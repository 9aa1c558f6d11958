//! Ledger collaborator interface and its Esplora HTTP implementation.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use bitcoin::{address::Address, OutPoint, Txid};
use log::{debug, warn};
use reqwest::blocking::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::types::UtxoRef;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Connection-level failure; safe to retry after a reset.
    #[error("ledger transport error: {0}")]
    Transport(String),
    /// Definitive rejection from the ledger (bad tx, double spend, ...).
    #[error("rejected by ledger: {0}")]
    Rejected(String),
    /// A polling loop ran out of attempts.
    #[error("timed out waiting on ledger: {0}")]
    Timeout(String),
}

/// External ledger service: UTXO lookup, fee estimation, broadcast.
pub trait LedgerClient {
    fn address_utxos(&self, address: &Address) -> Result<Vec<UtxoRef>, LedgerError>;

    /// Estimated fee rate in sat/vB for confirmation within `target_blocks`.
    fn estimate_fee(&self, target_blocks: u16) -> Result<f64, LedgerError>;

    /// Submit a raw transaction (hex). Idempotent-safe to retry.
    fn broadcast(&self, raw_tx_hex: &str) -> Result<Txid, LedgerError>;

    fn reset_connection(&self) -> Result<(), LedgerError>;
}

/// Poll `address` until a UTXO worth at least `min_value` appears.
/// Lookup errors are logged and count as a failed attempt.
pub fn wait_for_funding_utxo(
    client: &dyn LedgerClient,
    address: &Address,
    min_value: u64,
    max_attempts: u32,
    backoff: Duration,
) -> Result<UtxoRef, LedgerError> {
    for attempt in 1..=max_attempts {
        match client.address_utxos(address) {
            Ok(utxos) => {
                if let Some(utxo) = utxos.into_iter().find(|u| u.value >= min_value) {
                    debug!(
                        "funding utxo {}:{} ({} sats) found for {}",
                        utxo.outpoint.txid, utxo.outpoint.vout, utxo.value, address
                    );
                    return Ok(utxo);
                }
            }
            Err(e) => warn!("utxo lookup failed (attempt {attempt}): {e}"),
        }
        if attempt < max_attempts {
            std::thread::sleep(backoff);
        }
    }
    Err(LedgerError::Timeout(format!(
        "no UTXO of {min_value} sats at {address} after {max_attempts} attempts"
    )))
}

// ── Esplora implementation ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
}

/// Esplora REST client (`/address/:a/utxo`, `/fee-estimates`, `POST /tx`).
pub struct EsploraClient {
    base_url: String,
    http: Mutex<Client>,
}

impl EsploraClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        EsploraClient {
            base_url,
            http: Mutex::new(Client::new()),
        }
    }

    fn client(&self) -> Client {
        self.http.lock().expect("http client lock").clone()
    }
}

impl LedgerClient for EsploraClient {
    fn address_utxos(&self, address: &Address) -> Result<Vec<UtxoRef>, LedgerError> {
        let url = format!("{}/address/{}/utxo", self.base_url, address);
        let rows: Vec<EsploraUtxo> = self
            .client()
            .get(&url)
            .send()
            .map_err(|e| LedgerError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| LedgerError::Transport(e.to_string()))?
            .json()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let script_pubkey = address.script_pubkey();
        rows.into_iter()
            .map(|row| {
                let txid: Txid = row
                    .txid
                    .parse()
                    .map_err(|e| LedgerError::Transport(format!("bad txid from ledger: {e}")))?;
                Ok(UtxoRef {
                    outpoint: OutPoint {
                        txid,
                        vout: row.vout,
                    },
                    value: row.value,
                    script_pubkey: script_pubkey.clone(),
                    owner: None,
                })
            })
            .collect()
    }

    fn estimate_fee(&self, target_blocks: u16) -> Result<f64, LedgerError> {
        let url = format!("{}/fee-estimates", self.base_url);
        let estimates: BTreeMap<String, f64> = self
            .client()
            .get(&url)
            .send()
            .map_err(|e| LedgerError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| LedgerError::Transport(e.to_string()))?
            .json()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        // Exact target when present, otherwise the nearest deeper window.
        let mut keyed: Vec<(u16, f64)> = estimates
            .iter()
            .filter_map(|(k, v)| k.parse::<u16>().ok().map(|n| (n, *v)))
            .collect();
        keyed.sort_by_key(|(n, _)| *n);
        keyed
            .iter()
            .find(|(n, _)| *n >= target_blocks)
            .or(keyed.last())
            .map(|(_, rate)| *rate)
            .ok_or_else(|| LedgerError::Transport("empty fee-estimates response".into()))
    }

    fn broadcast(&self, raw_tx_hex: &str) -> Result<Txid, LedgerError> {
        let url = format!("{}/tx", self.base_url);
        let resp = self
            .client()
            .post(&url)
            .body(raw_tx_hex.to_string())
            .send()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        if status.is_client_error() {
            return Err(LedgerError::Rejected(body));
        }
        if !status.is_success() {
            return Err(LedgerError::Transport(format!("HTTP {status}: {body}")));
        }
        body.trim()
            .parse()
            .map_err(|e| LedgerError::Transport(format!("bad txid from broadcast: {e}")))
    }

    fn reset_connection(&self) -> Result<(), LedgerError> {
        *self.http.lock().expect("http client lock") = Client::new();
        Ok(())
    }
}

// ── Confirmation collaborator ────────────────────────────────────────────────

/// Operator yes/no gate, consulted only when an excessive fee is detected.
pub trait Confirm {
    fn confirm_excessive_fee(&self, fee: u64, limit: u64) -> bool;
}

/// Non-interactive default: never override the safety gate.
pub struct DenyAll;

impl Confirm for DenyAll {
    fn confirm_excessive_fee(&self, _fee: u64, _limit: u64) -> bool {
        false
    }
}

/// Interactive prompt on stdin for CLI use.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm_excessive_fee(&self, fee: u64, limit: u64) -> bool {
        eprintln!(
            "Excessive fee of {fee} sats detected (limit {limit} sats). Aborting protects funds."
        );
        loop {
            eprint!("To ignore and continue type 'y', or 'n' to cancel: ");
            let _ = std::io::stderr().flush();
            let mut reply = String::new();
            if std::io::stdin().read_line(&mut reply).is_err() {
                return false;
            }
            match reply.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return true,
                "n" | "no" => return false,
                _ => eprintln!("Invalid input."),
            }
        }
    }
}
