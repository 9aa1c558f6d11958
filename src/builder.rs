//! Atomical operation builder: accumulates the declared inputs, outputs,
//! claims and bitwork requests for one commit/reveal operation, then drives
//! payload assembly, fee planning, mining, signing and broadcast end to end.

use std::time::Duration;

use bitcoin::{
    absolute::LockTime, Amount, Network, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use ciborium::value::Value;
use log::{debug, info, warn};
use rand::Rng;
use secp256k1::{All, Secp256k1};
use thiserror::Error;

use crate::bitcoin_utils::{
    envelope::{prepare_commit_reveal, CommitRevealSpend, EnvelopeError},
    keys::KeyInfo,
    signing::{
        build_commit_tx, opret_txout, prevouts_for, sign_taproot_key_spend,
        sign_taproot_script_spend, SignError,
    },
};
use crate::bitwork::{has_valid_bitwork, Bitwork};
use crate::client::{wait_for_funding_utxo, Confirm, LedgerClient, LedgerError};
use crate::fees::{self, FeeCalculations};
use crate::miner::{
    default_worker_count, mine_commit, MinerConfig, MinerError, MiningJob, MiningOutcome,
};
use crate::payload::{Payload, PayloadError, RESERVED_KEYS};
use crate::types::{
    unix_time_now, OutputRequest, UtxoRef, EXCESSIVE_FEE_LIMIT, FALLBACK_SATS_BYTE,
    RBF_INPUT_SEQUENCE,
};

/// Attempts between reveal-mining progress reports and `time` refreshes.
const REVEAL_PROGRESS_INTERVAL: u64 = 10_000;

#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("excessive fee of {fee} sats exceeds the {limit} sat limit; aborted")]
    SafetyGate { fee: u64, limit: u64 },
    #[error("bitwork search exhausted after {attempts} attempts")]
    MiningExhausted { attempts: u64 },
    #[error("transaction {txid} rejected by ledger: {reason}")]
    BroadcastRejected { txid: String, reason: String },
    #[error("unable to broadcast transaction {txid} after {attempts} attempts")]
    BroadcastExhausted { txid: String, attempts: u32 },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error(transparent)]
    Miner(#[from] MinerError),
}

impl BuilderError {
    fn validation(msg: impl Into<String>) -> Self {
        BuilderError::Validation(msg.into())
    }
}

/// Requested fee rate: a manual sat/vB figure or ledger auto-detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeRate {
    Auto,
    Manual(u64),
}

impl FeeRate {
    /// CLI convention: any negative value means auto-detect.
    pub fn from_arg(value: i64) -> Result<Self, BuilderError> {
        match value {
            v if v < 0 => Ok(FeeRate::Auto),
            0 => Err(BuilderError::validation("satsbyte must be positive")),
            v => Ok(FeeRate::Manual(v as u64)),
        }
    }
}

/// The closed set of operation kinds this builder can commit and reveal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    Nft,
    Ft,
    Dft,
    Dmt { mint_ticker: String },
    Dat,
    Mod,
    Evt,
}

impl OperationKind {
    /// Wire tag embedded in the envelope script.
    pub fn tag(&self) -> &'static str {
        match self {
            OperationKind::Nft => "nft",
            OperationKind::Ft => "ft",
            OperationKind::Dft => "dft",
            OperationKind::Dmt { .. } => "dmt",
            OperationKind::Dat => "dat",
            OperationKind::Mod => "mod",
            OperationKind::Evt => "evt",
        }
    }

    /// Kinds that mint a new atomical at the commit's first output.
    fn yields_atomical_id(&self) -> bool {
        matches!(
            self,
            OperationKind::Nft | OperationKind::Ft | OperationKind::Dft
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealmClaimType {
    Direct,
    Rule,
}

/// One accepted name claim; at most one per operation.
#[derive(Debug, Clone)]
enum NameRequest {
    Ticker(String),
    Realm(String),
    Subrealm {
        name: String,
        parent_realm_id: String,
        claim: RealmClaimType,
    },
    Container(String),
    Item {
        item_id: String,
        parent_container_id: String,
    },
}

/// An existing on-ledger atomical consumed and passed through by the reveal.
#[derive(Debug, Clone)]
pub struct ParentInput {
    pub parent_id: String,
    pub utxo: UtxoRef,
    pub key: KeyInfo,
}

#[derive(Debug, Clone)]
pub struct BuilderOptions {
    pub network: Network,
    pub op: OperationKind,
    pub satsbyte: FeeRate,
    pub rbf: bool,
    /// Mining worker count; `None` means available cores minus one.
    pub workers: Option<usize>,
    /// Attempt ceiling for bitwork searches; `None` searches forever.
    pub max_mining_attempts: Option<u64>,
    pub utxo_wait_attempts: u32,
    pub utxo_wait_backoff: Duration,
    pub broadcast_attempts: u32,
    pub broadcast_backoff: Duration,
}

impl BuilderOptions {
    pub fn new(network: Network, op: OperationKind) -> Self {
        BuilderOptions {
            network,
            op,
            satsbyte: FeeRate::Manual(crate::types::DEFAULT_SATS_BYTE),
            rbf: false,
            workers: None,
            max_mining_attempts: None,
            utxo_wait_attempts: 120,
            utxo_wait_backoff: Duration::from_secs(5),
            broadcast_attempts: 20,
            broadcast_backoff: Duration::from_secs(15),
        }
    }
}

/// Identifiers of a completed operation.
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub commit_txid: Txid,
    pub reveal_txid: Txid,
    /// `<commit txid>i0` for operations minting a new atomical.
    pub atomical_id: Option<String>,
    /// `<reveal txid>i0` for data (`dat`) operations.
    pub data_id: Option<String>,
    pub urn: Option<String>,
}

pub struct AtomicalOperationBuilder<'a> {
    options: BuilderOptions,
    client: &'a dyn LedgerClient,
    confirm: &'a dyn Confirm,
    user_data: Option<Payload>,
    args: Vec<(String, Value)>,
    meta: Vec<(String, Value)>,
    ctx: Vec<(String, Value)>,
    init: Vec<(String, Value)>,
    bitwork_commit: Option<Bitwork>,
    bitwork_reveal: Option<Bitwork>,
    name_request: Option<NameRequest>,
    container_membership: Option<String>,
    parent: Option<ParentInput>,
    input_utxos: Vec<(UtxoRef, KeyInfo)>,
    additional_outputs: Vec<OutputRequest>,
}

impl<'a> AtomicalOperationBuilder<'a> {
    pub fn new(
        options: BuilderOptions,
        client: &'a dyn LedgerClient,
        confirm: &'a dyn Confirm,
    ) -> Self {
        AtomicalOperationBuilder {
            options,
            client,
            confirm,
            user_data: None,
            args: Vec::new(),
            meta: Vec::new(),
            ctx: Vec::new(),
            init: Vec::new(),
            bitwork_commit: None,
            bitwork_reveal: None,
            name_request: None,
            container_membership: None,
            parent: None,
            input_utxos: Vec::new(),
            additional_outputs: Vec::new(),
        }
    }

    // ── Setters ──────────────────────────────────────────────────────────────

    pub fn set_rbf(&mut self, rbf: bool) {
        self.options.rbf = rbf;
    }

    /// Caller-supplied payload fields. The reserved builder keys may not
    /// appear.
    pub fn set_user_data(&mut self, data: Payload) -> Result<(), BuilderError> {
        for key in RESERVED_KEYS {
            if data.get(key).is_some() {
                return Err(BuilderError::validation(format!(
                    "payload field '{key}' is reserved; use the builder options"
                )));
            }
        }
        self.user_data = Some(data);
        Ok(())
    }

    pub fn set_args(&mut self, args: Vec<(String, Value)>) {
        self.args = args;
    }

    pub fn set_meta(&mut self, meta: Vec<(String, Value)>) {
        self.meta = meta;
    }

    pub fn set_ctx(&mut self, ctx: Vec<(String, Value)>) {
        self.ctx = ctx;
    }

    pub fn set_init(&mut self, init: Vec<(String, Value)>) {
        self.init = init;
    }

    pub fn set_request_ticker(&mut self, name: &str) -> Result<(), BuilderError> {
        if !matches!(self.options.op, OperationKind::Ft | OperationKind::Dft) {
            return Err(BuilderError::validation(
                "a ticker can only be requested for ft or dft operations",
            ));
        }
        let trimmed = name.strip_prefix('$').unwrap_or(name);
        if !is_valid_ticker_name(trimmed) {
            return Err(BuilderError::validation(format!(
                "invalid ticker name '{trimmed}'"
            )));
        }
        self.name_request = Some(NameRequest::Ticker(trimmed.to_string()));
        Ok(())
    }

    pub fn set_request_realm(&mut self, name: &str) -> Result<(), BuilderError> {
        self.require_nft("a realm claim")?;
        let trimmed = name.strip_prefix('+').unwrap_or(name);
        if !is_valid_realm_name(trimmed) {
            return Err(BuilderError::validation(format!(
                "invalid realm name '{trimmed}'"
            )));
        }
        self.name_request = Some(NameRequest::Realm(trimmed.to_string()));
        Ok(())
    }

    pub fn set_request_subrealm(
        &mut self,
        name: &str,
        parent_realm_id: &str,
        claim: RealmClaimType,
    ) -> Result<(), BuilderError> {
        self.require_nft("a subrealm claim")?;
        if !is_atomical_id(parent_realm_id) {
            return Err(BuilderError::validation(format!(
                "invalid parent realm atomical id '{parent_realm_id}'"
            )));
        }
        let trimmed = name.strip_prefix('+').unwrap_or(name);
        let Some(tail) = trimmed.rsplit('.').next().filter(|_| trimmed.contains('.')) else {
            return Err(BuilderError::validation(
                "a subrealm request needs a dotted name below a top level realm",
            ));
        };
        if !is_valid_realm_name(tail) {
            return Err(BuilderError::validation(format!(
                "invalid subrealm part '{tail}'"
            )));
        }
        self.name_request = Some(NameRequest::Subrealm {
            name: tail.to_string(),
            parent_realm_id: parent_realm_id.to_string(),
            claim,
        });
        Ok(())
    }

    pub fn set_request_container(&mut self, name: &str) -> Result<(), BuilderError> {
        self.require_nft("a container claim")?;
        let trimmed = name.strip_prefix('#').unwrap_or(name);
        if !is_valid_container_name(trimmed) {
            return Err(BuilderError::validation(format!(
                "invalid container name '{trimmed}'"
            )));
        }
        self.name_request = Some(NameRequest::Container(trimmed.to_string()));
        Ok(())
    }

    pub fn set_request_item(
        &mut self,
        item_id: &str,
        parent_container_id: &str,
    ) -> Result<(), BuilderError> {
        self.require_nft("an item claim")?;
        if !is_atomical_id(parent_container_id) {
            return Err(BuilderError::validation(format!(
                "invalid parent container atomical id '{parent_container_id}'"
            )));
        }
        if !is_valid_item_name(item_id) {
            return Err(BuilderError::validation(format!(
                "invalid item name '{item_id}'"
            )));
        }
        self.name_request = Some(NameRequest::Item {
            item_id: item_id.to_string(),
            parent_container_id: parent_container_id.to_string(),
        });
        Ok(())
    }

    pub fn set_container_membership(&mut self, name: &str) -> Result<(), BuilderError> {
        self.require_nft("container membership")?;
        let trimmed = name.strip_prefix('#').unwrap_or(name);
        if !is_valid_container_name(trimmed) {
            return Err(BuilderError::validation(format!(
                "invalid container name '{trimmed}'"
            )));
        }
        self.container_membership = Some(trimmed.to_string());
        Ok(())
    }

    pub fn set_bitwork_commit(&mut self, bitwork: Bitwork) -> Result<(), BuilderError> {
        if bitwork.is_any() {
            return Err(BuilderError::validation(
                "bitwork 'any' cannot be mined; omit the commit bitwork instead",
            ));
        }
        self.bitwork_commit = Some(bitwork);
        Ok(())
    }

    pub fn set_bitwork_reveal(&mut self, bitwork: Bitwork) -> Result<(), BuilderError> {
        if bitwork.is_any() {
            return Err(BuilderError::validation(
                "bitwork 'any' cannot be mined; omit the reveal bitwork instead",
            ));
        }
        self.bitwork_reveal = Some(bitwork);
        Ok(())
    }

    /// Declare an extra reveal input together with its signing key.
    pub fn add_input_utxo(&mut self, utxo: UtxoRef, key: KeyInfo) {
        self.input_utxos.push((utxo, key));
    }

    /// Declare a reveal output. The builder never invents outputs on its
    /// own; callers decide the context they are created in.
    pub fn add_output(&mut self, output: OutputRequest) {
        self.additional_outputs.push(output);
    }

    pub fn set_parent(&mut self, parent: ParentInput) -> Result<(), BuilderError> {
        if !is_atomical_id(&parent.parent_id) {
            return Err(BuilderError::validation(format!(
                "invalid parent atomical id '{}'",
                parent.parent_id
            )));
        }
        self.parent = Some(parent);
        Ok(())
    }

    fn require_nft(&self, what: &str) -> Result<(), BuilderError> {
        if self.options.op != OperationKind::Nft {
            return Err(BuilderError::validation(format!(
                "{what} can only be set for nft operations"
            )));
        }
        Ok(())
    }

    // ── Accumulated sums ─────────────────────────────────────────────────────

    fn total_output_sum(&self) -> u64 {
        self.additional_outputs.iter().map(|o| o.value).sum()
    }

    fn additional_input_sum(&self) -> u64 {
        self.input_utxos.iter().map(|(u, _)| u.value).sum()
    }

    // ── Payload assembly ─────────────────────────────────────────────────────

    fn map_value(entries: &[(String, Value)]) -> Value {
        Value::Map(
            entries
                .iter()
                .map(|(k, v)| (Value::Text(k.clone()), v.clone()))
                .collect(),
        )
    }

    /// Merge the accumulated state into the final payload. Each field group
    /// is applied as its own explicit step; no claim kind leaks fields into
    /// another.
    fn assemble_payload(&self) -> Result<Payload, BuilderError> {
        let mut payload = self.user_data.clone().unwrap_or_default();
        for key in RESERVED_KEYS {
            if payload.get(key).is_some() {
                return Err(BuilderError::validation(format!(
                    "payload field '{key}' is reserved; use the builder options"
                )));
            }
        }

        if !self.args.is_empty() {
            payload.insert("args", Self::map_value(&self.args));
        }
        if !self.ctx.is_empty() {
            payload.insert("ctx", Self::map_value(&self.ctx));
        }
        if !self.meta.is_empty() {
            payload.insert("meta", Self::map_value(&self.meta));
        }
        if !self.init.is_empty() {
            payload.insert("init", Self::map_value(&self.init));
        }

        if let Some(container) = &self.container_membership {
            payload.insert("in", Value::Text(format!("[\"#{container}\"]")));
        }

        match &self.name_request {
            Some(NameRequest::Ticker(name)) => {
                payload.set_arg("request_ticker", Value::Text(name.clone()));
            }
            Some(NameRequest::Realm(name)) => {
                payload.set_arg("request_realm", Value::Text(name.clone()));
            }
            Some(NameRequest::Subrealm {
                name,
                parent_realm_id,
                claim,
            }) => {
                payload.set_arg("request_subrealm", Value::Text(name.clone()));
                payload.set_arg("parent_realm", Value::Text(parent_realm_id.clone()));
                let claim = match claim {
                    RealmClaimType::Direct => "direct",
                    RealmClaimType::Rule => "rule",
                };
                payload.set_arg("claim_type", Value::Text(claim.into()));
            }
            Some(NameRequest::Container(name)) => {
                payload.set_arg("request_container", Value::Text(name.clone()));
            }
            Some(NameRequest::Item {
                item_id,
                parent_container_id,
            }) => {
                payload.set_arg("request_dmitem", Value::Text(item_id.clone()));
                payload.set_arg("parent_container", Value::Text(parent_container_id.clone()));
            }
            None => {}
        }

        if let Some(bitwork) = &self.bitwork_commit {
            payload.set_arg("bitworkc", Value::Text(bitwork.to_string()));
        }
        if let Some(bitwork) = &self.bitwork_reveal {
            payload.set_arg("bitworkr", Value::Text(bitwork.to_string()));
        }
        if let OperationKind::Dmt { mint_ticker } = &self.options.op {
            payload.set_arg("mint_ticker", Value::Text(mint_ticker.clone()));
        }
        if let Some(parent) = &self.parent {
            payload.set_arg(
                "parents",
                Value::Map(vec![(
                    Value::Text(parent.parent_id.clone()),
                    Value::from(0u64),
                )]),
            );
        }

        Ok(payload)
    }

    fn resolve_satsbyte(&self) -> u64 {
        match self.options.satsbyte {
            FeeRate::Manual(rate) => {
                info!("satsbyte fee manually set to {rate}");
                rate
            }
            FeeRate::Auto => match self.client.estimate_fee(1) {
                Ok(rate) if rate.is_finite() && rate > 0.0 => {
                    let rate = rate.ceil() as u64;
                    info!("satsbyte fee auto-detected to {rate}");
                    rate
                }
                other => {
                    warn!(
                        "satsbyte fee query failed ({other:?}), defaulting to {FALLBACK_SATS_BYTE}"
                    );
                    FALLBACK_SATS_BYTE
                }
            },
        }
    }

    fn log_bitwork(bitwork: &Bitwork, commit: bool) {
        let side = if commit { "commit" } else { "reveal" };
        info!(
            "requested bitwork proof-of-work for the {side} transaction: {bitwork} \
             (~{:.0} ids per solution); this may take a long time on slow CPUs",
            bitwork.difficulty()
        );
    }

    // ── Orchestration ────────────────────────────────────────────────────────

    /// Run the full operation: assemble, fund, mine/commit, reveal,
    /// broadcast. The funding UTXO and key are exclusively held for the
    /// duration of this call; concurrent starts must not share them.
    pub fn start(&self, funding: &KeyInfo) -> Result<OperationResult, BuilderError> {
        let secp = Secp256k1::new();

        let mut payload = self.assemble_payload()?;
        let satsbyte = self.resolve_satsbyte();

        // Placeholders keep the mined address derivable from recorded args.
        if self.bitwork_commit.is_some() {
            payload.set_arg("nonce", Value::from(0u64));
            payload.set_arg("time", Value::from(unix_time_now()));
        }

        let payload_bytes = payload.encode()?;
        info!("payload CBOR size: {} bytes", payload_bytes.len());
        if payload_bytes.len() > 1000 {
            warn!("payload exceeds 1000 bytes; fees scale with envelope size");
        }

        let op_tag = self.options.op.tag();
        let mock_spend = prepare_commit_reveal(
            &secp,
            &funding.x_only,
            op_tag,
            &payload_bytes,
            self.options.network,
        )?;
        let fees = fees::calculate(
            satsbyte,
            mock_spend.reveal_script.len(),
            self.input_utxos.len(),
            self.additional_outputs.len(),
            self.total_output_sum(),
            self.bitwork_reveal.is_some(),
        );
        debug!("fee plan: {fees:?}");

        let funding_utxo = self
            .wait_for_utxo(&funding.address, fees.commit_and_reveal_fee_plus_outputs)
            .map_err(map_wait_error)?;

        let commit_spend = if let Some(bitwork) = &self.bitwork_commit {
            Self::log_bitwork(bitwork, true);
            let job = MiningJob {
                payload: &payload,
                op_tag,
                bitwork,
                funding_key: funding,
                funding_utxo: &funding_utxo,
                fees: &fees,
                satsbyte,
                additional_input_sum: self.additional_input_sum(),
                network: self.options.network,
            };
            let config = MinerConfig {
                workers: self.options.workers.unwrap_or_else(default_worker_count),
                max_attempts: self.options.max_mining_attempts,
            };
            match mine_commit(&job, &config)? {
                MiningOutcome::Solved(solution) => {
                    let output_total = output_total(&solution.commit_tx);
                    self.check_excessive_fee(funding_utxo.value, output_total)?;
                    self.broadcast_with_retries(&solution.commit_tx)?;
                    solution.spend
                }
                MiningOutcome::Exhausted { attempts } => {
                    return Err(BuilderError::MiningExhausted { attempts });
                }
            }
        } else {
            self.build_and_broadcast_commit(
                &secp,
                funding,
                &funding_utxo,
                &fees,
                satsbyte,
                &mock_spend,
            )?;
            mock_spend
        };

        // The commit output is the reveal's first input; poll until the
        // ledger shows it.
        let commit_value = fees::commit_output_value(&fees, self.additional_input_sum());
        let commit_utxo = self
            .wait_for_utxo(&commit_spend.address, commit_value)
            .map_err(map_wait_error)?;
        let commit_txid = commit_utxo.outpoint.txid;

        let reveal_txid =
            self.build_and_broadcast_reveal(&secp, funding, &commit_spend, &commit_utxo, &fees, satsbyte)?;

        let atomical_id = self
            .options
            .op
            .yields_atomical_id()
            .then(|| format!("{commit_txid}i0"));
        let (data_id, urn) = if self.options.op == OperationKind::Dat {
            (
                Some(format!("{reveal_txid}i0")),
                Some(format!("atom:btc:dat:{reveal_txid}i0")),
            )
        } else {
            (None, None)
        };

        Ok(OperationResult {
            commit_txid,
            reveal_txid,
            atomical_id,
            data_id,
            urn,
        })
    }

    fn wait_for_utxo(&self, address: &bitcoin::Address, value: u64) -> Result<UtxoRef, LedgerError> {
        wait_for_funding_utxo(
            self.client,
            address,
            value,
            self.options.utxo_wait_attempts,
            self.options.utxo_wait_backoff,
        )
    }

    /// Direct commit path when no commit bitwork was requested.
    fn build_and_broadcast_commit(
        &self,
        secp: &Secp256k1<All>,
        funding: &KeyInfo,
        funding_utxo: &UtxoRef,
        fees: &FeeCalculations,
        satsbyte: u64,
        spend: &CommitRevealSpend,
    ) -> Result<Txid, BuilderError> {
        let output_value = fees::commit_output_value(fees, self.additional_input_sum());
        let change = fees::commit_change_value(
            funding_utxo.value,
            output_value,
            fees.commit_fee_only,
            satsbyte,
        )
        .map(|value| (funding_utxo.script_pubkey.clone(), value));

        let mut tx = build_commit_tx(
            &funding_utxo.outpoint,
            &spend.address,
            output_value,
            change,
            self.input_sequence(),
        );
        let prevouts = prevouts_for(&[funding_utxo]);
        sign_taproot_key_spend(secp, &mut tx, 0, &prevouts, &funding.keypair)?;

        self.check_excessive_fee(funding_utxo.value, output_total(&tx))?;
        self.broadcast_with_retries(&tx)
    }

    /// Build, (optionally) mine, sign and broadcast the reveal transaction.
    /// Reveal-side mining is deliberately single-threaded: each attempt is
    /// cheap next to the commit-side search.
    fn build_and_broadcast_reveal(
        &self,
        secp: &Secp256k1<All>,
        funding: &KeyInfo,
        spend: &CommitRevealSpend,
        commit_utxo: &UtxoRef,
        fees: &FeeCalculations,
        satsbyte: u64,
    ) -> Result<Txid, BuilderError> {
        if let Some(bitwork) = &self.bitwork_reveal {
            Self::log_bitwork(bitwork, false);
        }

        let sequence = self.input_sequence();
        let mut nonce: u64 = rand::thread_rng().gen_range(0..100_000_000);
        let mut time = unix_time_now();
        let mut attempts: u64 = 0;

        loop {
            let mut tx = Transaction {
                version: bitcoin::transaction::Version::ONE,
                lock_time: LockTime::ZERO,
                input: Vec::new(),
                output: Vec::new(),
            };
            let mut prevout_refs: Vec<&UtxoRef> = Vec::new();
            let mut total_inputs: u64 = 0;
            let mut total_outputs: u64 = 0;

            tx.input.push(TxIn {
                previous_output: commit_utxo.outpoint,
                script_sig: ScriptBuf::new(),
                sequence,
                witness: Witness::default(),
            });
            prevout_refs.push(commit_utxo);
            total_inputs += commit_utxo.value;

            for (utxo, _) in &self.input_utxos {
                tx.input.push(TxIn {
                    previous_output: utxo.outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence,
                    witness: Witness::default(),
                });
                prevout_refs.push(utxo);
                total_inputs += utxo.value;
            }
            if let Some(parent) = &self.parent {
                tx.input.push(TxIn {
                    previous_output: parent.utxo.outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence,
                    witness: Witness::default(),
                });
                prevout_refs.push(&parent.utxo);
                total_inputs += parent.utxo.value;
            }

            for output in &self.additional_outputs {
                tx.output.push(TxOut {
                    value: Amount::from_sat(output.value),
                    script_pubkey: output.script_pubkey(),
                });
                total_outputs += output.value;
            }
            if let Some(parent) = &self.parent {
                // Pass the parent atomical back to its owner.
                tx.output.push(TxOut {
                    value: Amount::from_sat(parent.utxo.value),
                    script_pubkey: parent.key.address.script_pubkey(),
                });
                total_outputs += parent.utxo.value;
            }
            if self.bitwork_reveal.is_some() {
                tx.output.push(opret_txout(format!("{time}:{nonce}").as_bytes()));
            }
            if let Some(change) =
                fees::reveal_change_value(total_inputs, total_outputs, fees.reveal_fee_only, satsbyte)
            {
                tx.output.push(TxOut {
                    value: Amount::from_sat(change),
                    script_pubkey: funding.output.clone(),
                });
            }

            let txid = tx.txid();
            let solved = match &self.bitwork_reveal {
                None => true,
                Some(bitwork) => has_valid_bitwork(&txid.to_string(), bitwork),
            };

            if solved {
                if self.bitwork_reveal.is_some() {
                    info!("bitwork matches reveal txid {txid} after {attempts} attempts");
                }
                let prevouts = prevouts_for(&prevout_refs);
                sign_taproot_script_spend(
                    secp,
                    &mut tx,
                    0,
                    &prevouts,
                    spend.leaf_hash(),
                    &spend.reveal_script,
                    &spend.control_block,
                    &funding.keypair,
                )?;
                let mut index = 1;
                for (_, key) in &self.input_utxos {
                    sign_taproot_key_spend(secp, &mut tx, index, &prevouts, &key.keypair)?;
                    index += 1;
                }
                if let Some(parent) = &self.parent {
                    sign_taproot_key_spend(secp, &mut tx, index, &prevouts, &parent.key.keypair)?;
                }

                self.check_excessive_fee(total_inputs, output_total(&tx))?;
                return self.broadcast_with_retries(&tx);
            }

            nonce += 1;
            attempts += 1;
            if attempts % REVEAL_PROGRESS_INTERVAL == 0 {
                time = unix_time_now();
                debug!("reveal mining: {attempts} attempts, last txid {txid}");
            }
            if let Some(max) = self.options.max_mining_attempts {
                if attempts >= max {
                    return Err(BuilderError::MiningExhausted { attempts });
                }
            }
        }
    }

    fn input_sequence(&self) -> Sequence {
        if self.options.rbf {
            Sequence(RBF_INPUT_SEQUENCE)
        } else {
            Sequence::MAX
        }
    }

    /// Final guard before any broadcast: an implied fee above the hard limit
    /// needs an explicit operator override.
    fn check_excessive_fee(&self, input_total: u64, output_total: u64) -> Result<(), BuilderError> {
        let fee = input_total.saturating_sub(output_total);
        if fee > EXCESSIVE_FEE_LIMIT {
            warn!("excessive fee of {fee} sats detected (limit {EXCESSIVE_FEE_LIMIT})");
            if !self
                .confirm
                .confirm_excessive_fee(fee, EXCESSIVE_FEE_LIMIT)
            {
                return Err(BuilderError::SafetyGate {
                    fee,
                    limit: EXCESSIVE_FEE_LIMIT,
                });
            }
        }
        Ok(())
    }

    /// Submit a finalized transaction, retrying transport failures with a
    /// connection reset and backoff. Definitive rejections abort at once.
    fn broadcast_with_retries(&self, tx: &Transaction) -> Result<Txid, BuilderError> {
        let raw = bitcoin::consensus::encode::serialize_hex(tx);
        let txid = tx.txid();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.client.broadcast(&raw) {
                Ok(accepted) => {
                    info!("success sent tx {accepted}");
                    return Ok(accepted);
                }
                Err(LedgerError::Rejected(reason)) => {
                    return Err(BuilderError::BroadcastRejected {
                        txid: txid.to_string(),
                        reason,
                    });
                }
                Err(err) => {
                    warn!("network error broadcasting {txid} (attempt {attempt}): {err}");
                    if attempt >= self.options.broadcast_attempts {
                        return Err(BuilderError::BroadcastExhausted {
                            txid: txid.to_string(),
                            attempts: attempt,
                        });
                    }
                    if let Err(reset) = self.client.reset_connection() {
                        warn!("connection reset failed: {reset}");
                    }
                    std::thread::sleep(self.options.broadcast_backoff);
                }
            }
        }
    }
}

fn output_total(tx: &Transaction) -> u64 {
    tx.output.iter().map(|o| o.value.to_sat()).sum()
}

fn map_wait_error(err: LedgerError) -> BuilderError {
    match err {
        LedgerError::Timeout(msg) => BuilderError::Precondition(msg),
        other => BuilderError::Ledger(other),
    }
}

// ── Name grammar ─────────────────────────────────────────────────────────────

pub fn is_valid_ticker_name(name: &str) -> bool {
    (1..=21).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

pub fn is_valid_realm_name(name: &str) -> bool {
    (1..=64).contains(&name.len())
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

pub fn is_valid_container_name(name: &str) -> bool {
    is_valid_realm_name(name)
}

pub fn is_valid_item_name(name: &str) -> bool {
    (1..=64).contains(&name.len())
        && name.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Compact atomical id: 64 hex chars, `i`, then a decimal output index.
pub fn is_atomical_id(id: &str) -> bool {
    let bytes = id.as_bytes();
    if bytes.len() < 66 || bytes[64] != b'i' {
        return false;
    }
    id[..64]
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        && id[65..].chars().all(|c| c.is_ascii_digit())
}
