//! Commit-side proof-of-work: a fixed pool of workers searching disjoint
//! slices of the input-sequence space for a txid that satisfies the
//! requested bitwork.
//!
//! Coordination is message passing only: each worker receives its dispatch
//! parameters at spawn time and reports at most one result message. A
//! cancellation token, observed at every loop iteration, bounds shutdown
//! latency once a winner is selected.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};
use std::time::Instant;

use bitcoin::{Network, Sequence, Transaction};
use ciborium::value::Value;
use log::{debug, error, info};
use secp256k1::Secp256k1;
use thiserror::Error;

use crate::bitcoin_utils::{
    envelope::{prepare_commit_reveal, CommitRevealSpend},
    keys::KeyInfo,
    signing::{build_commit_tx, prevouts_for, sign_taproot_key_spend},
};
use crate::bitwork::{has_valid_bitwork, Bitwork};
use crate::fees::{commit_change_value, commit_output_value, FeeCalculations};
use crate::payload::Payload;
use crate::types::{unix_time_now, UtxoRef};

/// Exclusive upper bound of the sequence search space.
pub const MAX_SEQUENCE: u32 = u32::MAX;

/// Attempts between progress reports.
const PROGRESS_INTERVAL: u64 = 10_000;

#[derive(Debug, Error)]
pub enum MinerError {
    #[error("failed to build mining thread pool: {0}")]
    Pool(String),
    #[error("all mining workers failed: {0}")]
    Workers(String),
}

/// Cooperative cancellation signal shared by one mining session.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything one mining session needs, captured before dispatch.
pub struct MiningJob<'a> {
    /// Payload template; workers refresh `args.time` independently.
    pub payload: &'a Payload,
    pub op_tag: &'a str,
    pub bitwork: &'a Bitwork,
    pub funding_key: &'a KeyInfo,
    pub funding_utxo: &'a UtxoRef,
    pub fees: &'a FeeCalculations,
    pub satsbyte: u64,
    /// Total value of extra reveal inputs, subtracted from the envelope
    /// output.
    pub additional_input_sum: u64,
    pub network: Network,
}

#[derive(Debug, Clone)]
pub struct MinerConfig {
    pub workers: usize,
    /// Total attempt ceiling across the session; `None` searches forever.
    pub max_attempts: Option<u64>,
}

impl Default for MinerConfig {
    fn default() -> Self {
        MinerConfig {
            workers: default_worker_count(),
            max_attempts: None,
        }
    }
}

/// Available cores minus one, never below one.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(1)
}

/// The winning worker's finalized state.
pub struct MinerSolution {
    /// Payload variant actually committed (carries the final `time`).
    pub payload: Payload,
    pub sequence: u32,
    /// Signed commit transaction, ready to broadcast.
    pub commit_tx: Transaction,
    /// Envelope matching `payload`, reused for the reveal spend.
    pub spend: CommitRevealSpend,
}

pub enum MiningOutcome {
    Solved(Box<MinerSolution>),
    /// Every worker exhausted its attempt budget without a match.
    Exhausted { attempts: u64 },
}

/// Partition `[0, MAX_SEQUENCE)` into `workers` contiguous half-open ranges.
/// The last range absorbs the division remainder.
pub fn partition_sequence_space(workers: usize) -> Vec<(u32, u32)> {
    assert!(workers >= 1, "at least one worker required");
    let per_worker = MAX_SEQUENCE / workers as u32;
    (0..workers)
        .map(|i| {
            let start = i as u32 * per_worker;
            let end = if i == workers - 1 {
                MAX_SEQUENCE
            } else {
                start + per_worker
            };
            (start, end)
        })
        .collect()
}

enum WorkerMessage {
    Solved(Box<MinerSolution>),
    Failed(String),
}

/// Run one mining session to completion: first satisfying worker wins, the
/// rest are cancelled, and exactly one solution is ever returned.
pub fn mine_commit(job: &MiningJob<'_>, cfg: &MinerConfig) -> Result<MiningOutcome, MinerError> {
    let workers = cfg.workers.max(1);
    let ranges = partition_sequence_space(workers);
    let per_worker_budget = cfg.max_attempts.map(|m| (m / workers as u64).max(1));

    // One extra slot so the coordinator can block on the channel without
    // starving a worker of its thread.
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers + 1)
        .build()
        .map_err(|e| MinerError::Pool(e.to_string()))?;

    let cancel = CancelToken::new();
    let (sender, receiver) = mpsc::channel::<WorkerMessage>();

    info!(
        "dispatching {} mining workers over sequence space [0, {})",
        workers, MAX_SEQUENCE
    );

    let (solution, failures, last_error) = pool.scope(move |scope| {
        for (worker_id, range) in ranges.into_iter().enumerate() {
            let sender = sender.clone();
            let cancel = cancel.clone();
            scope.spawn(move |_| {
                match run_worker(worker_id, range, job, per_worker_budget, &cancel) {
                    Ok(Some(solution)) => {
                        // Stop the others before the send so losers observe
                        // the token on their next iteration.
                        cancel.cancel();
                        let _ = sender.send(WorkerMessage::Solved(Box::new(solution)));
                    }
                    Ok(None) => {} // cancelled or budget exhausted
                    Err(msg) => {
                        let _ = sender.send(WorkerMessage::Failed(msg));
                    }
                }
            });
        }
        drop(sender);

        let mut failures = 0usize;
        let mut last_error = None;
        let mut solution = None;
        loop {
            match receiver.recv() {
                Ok(WorkerMessage::Solved(sol)) => {
                    cancel.cancel();
                    solution = Some(sol);
                    break;
                }
                Ok(WorkerMessage::Failed(msg)) => {
                    error!("mining worker failed: {msg}");
                    failures += 1;
                    last_error = Some(msg);
                    if failures == workers {
                        break;
                    }
                }
                Err(_) => break, // every worker finished without a solution
            }
        }
        (solution, failures, last_error)
    });

    match solution {
        Some(solution) => {
            info!(
                "sequence {} solved commit bitwork, txid {}",
                solution.sequence,
                solution.commit_tx.txid()
            );
            Ok(MiningOutcome::Solved(solution))
        }
        None if failures == workers => Err(MinerError::Workers(
            last_error.unwrap_or_else(|| "no worker reported a reason".into()),
        )),
        None => match cfg.max_attempts {
            Some(attempts) => Ok(MiningOutcome::Exhausted { attempts }),
            None => Err(MinerError::Workers(
                last_error.unwrap_or_else(|| "workers terminated without result".into()),
            )),
        },
    }
}

/// Single worker: walk the assigned sequence range, refreshing the payload
/// timestamp (and thus the envelope address) whenever the range is
/// exhausted, until bitwork matches, the budget runs out, or cancellation.
fn run_worker(
    worker_id: usize,
    (seq_start, seq_end): (u32, u32),
    job: &MiningJob<'_>,
    budget: Option<u64>,
    cancel: &CancelToken,
) -> Result<Option<MinerSolution>, String> {
    let secp = Secp256k1::new();
    let mut payload = job.payload.clone();
    payload.set_arg("time", Value::from(unix_time_now()));

    let output_value = commit_output_value(job.fees, job.additional_input_sum);
    let change = commit_change_value(
        job.funding_utxo.value,
        output_value,
        job.fees.commit_fee_only,
        job.satsbyte,
    )
    .map(|value| (job.funding_utxo.script_pubkey.clone(), value));

    let mut spend = prepare_commit_reveal(
        &secp,
        &job.funding_key.x_only,
        job.op_tag,
        &payload.encode().map_err(|e| e.to_string())?,
        job.network,
    )
    .map_err(|e| e.to_string())?;

    let mut tx = build_commit_tx(
        &job.funding_utxo.outpoint,
        &spend.address,
        output_value,
        change.clone(),
        Sequence(seq_start),
    );

    let mut sequence = seq_start;
    let mut attempts: u64 = 0;
    let started = Instant::now();
    let mut window_started = started;

    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        if let Some(max) = budget {
            if attempts >= max {
                debug!("worker {worker_id}: budget of {max} attempts exhausted");
                return Ok(None);
            }
        }
        if sequence >= seq_end {
            // Range exhausted: a fresh timestamp changes the committed
            // payload, the envelope script and therefore every txid in the
            // range, so restarting from the range base stays productive.
            payload.set_arg("time", Value::from(unix_time_now()));
            spend = prepare_commit_reveal(
                &secp,
                &job.funding_key.x_only,
                job.op_tag,
                &payload.encode().map_err(|e| e.to_string())?,
                job.network,
            )
            .map_err(|e| e.to_string())?;
            tx.output[0].script_pubkey = spend.address.script_pubkey();
            sequence = seq_start;
        }

        tx.input[0].sequence = Sequence(sequence);
        let txid = tx.txid();
        if has_valid_bitwork(&txid.to_string(), job.bitwork) {
            let prevouts = prevouts_for(&[job.funding_utxo]);
            sign_taproot_key_spend(&secp, &mut tx, 0, &prevouts, &job.funding_key.keypair)
                .map_err(|e| e.to_string())?;
            info!(
                "worker {worker_id}: bitwork matches commit txid {txid} at sequence {sequence}"
            );
            return Ok(Some(MinerSolution {
                payload,
                sequence,
                commit_tx: tx,
                spend,
            }));
        }

        sequence += 1;
        attempts += 1;
        if attempts % PROGRESS_INTERVAL == 0 {
            let rate = PROGRESS_INTERVAL as f64 / window_started.elapsed().as_secs_f64();
            window_started = Instant::now();
            debug!(
                "worker {worker_id}: {attempts} attempts, {:.0} seq/s, at sequence {sequence}",
                rate
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::{OutPoint, Txid};
    use secp256k1::SecretKey;

    use crate::fees;

    #[test]
    fn partition_covers_space_without_gaps_or_overlap() {
        for workers in 1..=8usize {
            let ranges = partition_sequence_space(workers);
            assert_eq!(ranges.len(), workers);
            assert_eq!(ranges[0].0, 0);
            assert_eq!(ranges[workers - 1].1, MAX_SEQUENCE);
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].1, pair[1].0, "ranges must be contiguous");
                assert!(pair[0].0 < pair[0].1);
            }
        }
    }

    fn test_job_parts() -> (KeyInfo, UtxoRef, FeeCalculations, Payload) {
        let secp = Secp256k1::new();
        let key = KeyInfo::from_secret_key(
            &secp,
            SecretKey::from_slice(&[5u8; 32]).unwrap(),
            Network::Regtest,
        );
        let utxo = UtxoRef {
            outpoint: OutPoint {
                txid: Txid::from_byte_array([0xCCu8; 32]),
                vout: 1,
            },
            value: 20_000,
            script_pubkey: key.output.clone(),
            owner: Some(key.x_only),
        };
        let fees = fees::calculate(1, 150, 0, 1, 1_000, false);
        let mut payload = Payload::new();
        payload.set_arg("nonce", Value::from(0u64));
        payload.set_arg("time", Value::from(0u64));
        (key, utxo, fees, payload)
    }

    #[test]
    fn four_workers_solve_a_single_hex_char_prefix() {
        let (key, utxo, fees, payload) = test_job_parts();
        let bitwork = Bitwork::parse("7").unwrap();
        let job = MiningJob {
            payload: &payload,
            op_tag: "nft",
            bitwork: &bitwork,
            funding_key: &key,
            funding_utxo: &utxo,
            fees: &fees,
            satsbyte: 1,
            additional_input_sum: 0,
            network: Network::Regtest,
        };
        let cfg = MinerConfig {
            workers: 4,
            max_attempts: None,
        };
        match mine_commit(&job, &cfg).unwrap() {
            MiningOutcome::Solved(solution) => {
                let txid = solution.commit_tx.txid().to_string();
                assert!(txid.starts_with('7'), "txid {txid} must satisfy bitwork");
                assert_eq!(
                    solution.commit_tx.input[0].sequence,
                    Sequence(solution.sequence)
                );
                // Winner arrives signed.
                assert_eq!(solution.commit_tx.input[0].witness.len(), 1);
            }
            MiningOutcome::Exhausted { .. } => panic!("unbounded search cannot exhaust"),
        }
    }

    #[test]
    fn impossible_target_with_budget_reports_exhausted() {
        let (key, utxo, fees, payload) = test_job_parts();
        // 16 leading zero nibbles will not show up in a few thousand tries.
        let bitwork = Bitwork::parse("0000000000000000").unwrap();
        let job = MiningJob {
            payload: &payload,
            op_tag: "nft",
            bitwork: &bitwork,
            funding_key: &key,
            funding_utxo: &utxo,
            fees: &fees,
            satsbyte: 1,
            additional_input_sum: 0,
            network: Network::Regtest,
        };
        let cfg = MinerConfig {
            workers: 2,
            max_attempts: Some(2_000),
        };
        match mine_commit(&job, &cfg).unwrap() {
            MiningOutcome::Exhausted { attempts } => assert_eq!(attempts, 2_000),
            MiningOutcome::Solved(_) => panic!("target should be unreachable in budget"),
        }
    }
}
