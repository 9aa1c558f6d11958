//! Fee model: pure byte-size and satoshi arithmetic for the commit/reveal
//! pair. All estimates round up to whole satoshis.
//!
//! The byte constants are wire-compatibility numbers: indexer-side tooling
//! and existing wallets size these transactions the same way.

use crate::types::DUST_AMOUNT;

/// Fixed transaction overhead in virtual bytes.
pub const BASE_BYTES: f64 = 10.5;

/// Per-input cost of a key-path taproot input.
pub const INPUT_BYTES_BASE: f64 = 57.5;

/// Per-output cost.
pub const OUTPUT_BYTES_BASE: f64 = 43.0;

/// Script-path reveal input, excluding the witness script itself:
/// <txid> <vout> <scriptSig len> <sequence> = 32 + 4 + 1 + 4 = 41,
/// (<stack item len> <signature> ... <control block>) / 4 = 25.
pub const REVEAL_INPUT_BYTES_BASE: f64 = 66.0;

/// Zero-value OP_RETURN marker output: 21-byte script, 8-byte value,
/// 1-byte script length.
pub const OP_RETURN_BYTES: f64 = 30.0;

/// Fee figures for one accumulated commit/reveal pair. Derived purely from
/// sizes and the fee rate; only ever replaced by recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeCalculations {
    pub commit_fee_only: u64,
    pub reveal_fee_only: u64,
    pub commit_and_reveal_fee: u64,
    pub commit_and_reveal_fee_plus_outputs: u64,
    pub reveal_fee_plus_outputs: u64,
}

/// Bytes of the compact-size length prefix for a script of `len` bytes.
fn compact_size_bytes(len: usize) -> f64 {
    if len <= 252 {
        1.0
    } else if len <= 0xFFFF {
        3.0
    } else if len <= 0xFFFF_FFFF {
        5.0
    } else {
        9.0
    }
}

/// Commit transaction fee: one input, one output, base overhead.
pub fn commit_fee(satsbyte: u64) -> u64 {
    (satsbyte as f64 * (BASE_BYTES + INPUT_BYTES_BASE + OUTPUT_BYTES_BASE)).ceil() as u64
}

/// Reveal transaction fee: the script-path input (with its variable-length
/// reveal script counted in witness units), per-item costs for the extra
/// inputs/outputs, and the optional bitwork marker output.
pub fn reveal_fee(
    satsbyte: u64,
    reveal_script_len: usize,
    extra_inputs: usize,
    extra_outputs: usize,
    with_bitwork_marker: bool,
) -> u64 {
    let script_units = (compact_size_bytes(reveal_script_len) + reveal_script_len as f64) / 4.0;
    let marker = if with_bitwork_marker { OP_RETURN_BYTES } else { 0.0 };
    (satsbyte as f64
        * (BASE_BYTES
            + REVEAL_INPUT_BYTES_BASE
            + script_units
            + extra_inputs as f64 * INPUT_BYTES_BASE
            + extra_outputs as f64 * OUTPUT_BYTES_BASE
            + marker))
        .ceil() as u64
}

/// Compute every accumulated figure at once. `outputs_sum` is the total
/// satoshi value of the declared reveal outputs.
pub fn calculate(
    satsbyte: u64,
    reveal_script_len: usize,
    extra_inputs: usize,
    extra_outputs: usize,
    outputs_sum: u64,
    with_bitwork_marker: bool,
) -> FeeCalculations {
    let reveal = reveal_fee(
        satsbyte,
        reveal_script_len,
        extra_inputs,
        extra_outputs,
        with_bitwork_marker,
    );
    let commit = commit_fee(satsbyte);
    FeeCalculations {
        commit_fee_only: commit,
        reveal_fee_only: reveal,
        commit_and_reveal_fee: commit + reveal,
        commit_and_reveal_fee_plus_outputs: commit + reveal + outputs_sum,
        reveal_fee_plus_outputs: reveal + outputs_sum,
    }
}

/// Value of the commit transaction's envelope output: everything the reveal
/// will need, minus what the extra reveal inputs already carry.
pub fn commit_output_value(fees: &FeeCalculations, additional_input_sum: u64) -> u64 {
    fees.reveal_fee_plus_outputs.saturating_sub(additional_input_sum)
}

/// Change returned to the funding address by the commit transaction, if the
/// leftover still clears the dust floor after paying for the change output's
/// own bytes. `None` means no change output is added.
pub fn commit_change_value(
    funding_value: u64,
    commit_output: u64,
    commit_fee_only: u64,
    satsbyte: u64,
) -> Option<u64> {
    let calculated = funding_value as i64 - commit_output as i64;
    if calculated <= 0 {
        return None;
    }
    let expected = commit_fee_only as i64 + (satsbyte as f64 * OUTPUT_BYTES_BASE).ceil() as i64;
    let excess = calculated - expected;
    if excess > 0 && excess as u64 >= DUST_AMOUNT {
        Some(excess as u64)
    } else {
        None
    }
}

/// Change appended to the reveal transaction when the inputs carry more than
/// the declared outputs plus the reveal fee plus one extra output's bytes.
pub fn reveal_change_value(
    total_inputs: u64,
    total_outputs: u64,
    reveal_fee_only: u64,
    satsbyte: u64,
) -> Option<u64> {
    let planned = total_inputs as i64 - total_outputs as i64;
    if planned <= 0 {
        return None;
    }
    let excess =
        planned - reveal_fee_only as i64 - (satsbyte as f64 * OUTPUT_BYTES_BASE).ceil() as i64;
    if excess > 0 && excess as u64 >= DUST_AMOUNT {
        Some(excess as u64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_fee_is_exact() {
        // ceil(10 * (10.5 + 57.5 + 43)) = 1110
        assert_eq!(commit_fee(10), 1110);
        // ceil(1 * 111.0) = 111
        assert_eq!(commit_fee(1), 111);
    }

    #[test]
    fn fees_are_deterministic() {
        let a = calculate(7, 301, 2, 3, 5_000, true);
        let b = calculate(7, 301, 2, 3, 5_000, true);
        assert_eq!(a, b);
    }

    #[test]
    fn fees_grow_with_every_byte_contributing_parameter() {
        let base = calculate(10, 200, 1, 1, 1_000, false);
        assert!(calculate(11, 200, 1, 1, 1_000, false).reveal_fee_only >= base.reveal_fee_only);
        assert!(calculate(10, 201, 1, 1, 1_000, false).reveal_fee_only >= base.reveal_fee_only);
        assert!(calculate(10, 200, 2, 1, 1_000, false).reveal_fee_only > base.reveal_fee_only);
        assert!(calculate(10, 200, 1, 2, 1_000, false).reveal_fee_only > base.reveal_fee_only);
        assert!(calculate(10, 200, 1, 1, 1_000, true).reveal_fee_only > base.reveal_fee_only);
        assert!(
            calculate(10, 200, 1, 1, 2_000, false).reveal_fee_plus_outputs
                > base.reveal_fee_plus_outputs
        );
    }

    #[test]
    fn compact_size_steps_at_script_length_boundaries() {
        let small = reveal_fee(4, 252, 0, 0, false);
        let medium = reveal_fee(4, 253, 0, 0, false);
        // One length byte becomes three: (3 - 1) / 4 extra vbytes plus the
        // extra script byte itself.
        assert!(medium > small);
    }

    #[test]
    fn commit_output_accounts_for_additional_inputs() {
        let fees = calculate(10, 100, 1, 1, 1_000, false);
        assert_eq!(commit_output_value(&fees, 0), fees.reveal_fee_plus_outputs);
        assert_eq!(
            commit_output_value(&fees, 600),
            fees.reveal_fee_plus_outputs - 600
        );
    }

    #[test]
    fn commit_change_respects_dust_floor() {
        let fees = calculate(10, 100, 0, 1, 1_000, false);
        let output = commit_output_value(&fees, 0);
        let expected_spend = output + fees.commit_fee_only + 430;
        // Exactly at dust above the expected spend: change is made.
        assert_eq!(
            commit_change_value(expected_spend + DUST_AMOUNT, output, fees.commit_fee_only, 10),
            Some(DUST_AMOUNT)
        );
        // One satoshi short of dust: swallowed as fee.
        assert_eq!(
            commit_change_value(
                expected_spend + DUST_AMOUNT - 1,
                output,
                fees.commit_fee_only,
                10
            ),
            None
        );
        // Underfunded: no change, caller sees the invalid tx at broadcast.
        assert_eq!(commit_change_value(100, output, fees.commit_fee_only, 10), None);
    }

    #[test]
    fn reveal_change_respects_dust_floor() {
        assert_eq!(reveal_change_value(10_000, 1_000, 1_498, 10), Some(7_072));
        assert_eq!(reveal_change_value(1_000, 900, 1_498, 10), None);
        assert_eq!(reveal_change_value(900, 1_000, 100, 10), None);
    }
}
