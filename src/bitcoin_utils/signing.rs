//! Transaction assembly and taproot signing helpers for the commit/reveal
//! pair. Key-path spends sign with the tweaked keypair; the reveal's
//! script-path spend signs with the untweaked owner key and carries
//! `[signature, reveal script, control block]` in its witness.

use bitcoin::{
    absolute::LockTime,
    hashes::Hash,
    key::TapTweak,
    script::PushBytesBuf,
    sighash::{Prevouts, SighashCache, TapSighashType},
    taproot::{ControlBlock, TapLeafHash},
    Address, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};
use secp256k1::{All, Keypair, Message, Secp256k1};
use thiserror::Error;

use crate::types::UtxoRef;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("sighash computation failed: {0}")]
    Sighash(String),
    #[error("input index {0} out of range")]
    InputIndex(usize),
}

pub fn opret_txout(data: &[u8]) -> TxOut {
    use bitcoin::script::Builder;
    let push_bytes =
        PushBytesBuf::try_from(data.to_vec()).expect("OP_RETURN data too large");
    let script = Builder::new()
        .push_opcode(bitcoin::opcodes::all::OP_RETURN)
        .push_slice(&push_bytes)
        .into_script();
    TxOut {
        value: Amount::from_sat(0),
        script_pubkey: script,
    }
}

/// Build the unsigned commit transaction: one funding input at `sequence`,
/// the envelope output, and an optional change output back to the funder.
pub fn build_commit_tx(
    funding_utxo: &OutPoint,
    envelope_address: &Address,
    envelope_value: u64,
    change: Option<(ScriptBuf, u64)>,
    sequence: Sequence,
) -> Transaction {
    let mut output = vec![TxOut {
        value: Amount::from_sat(envelope_value),
        script_pubkey: envelope_address.script_pubkey(),
    }];
    if let Some((script_pubkey, value)) = change {
        output.push(TxOut {
            value: Amount::from_sat(value),
            script_pubkey,
        });
    }
    Transaction {
        version: bitcoin::transaction::Version::ONE,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: *funding_utxo,
            script_sig: ScriptBuf::new(),
            sequence,
            witness: Witness::default(),
        }],
        output,
    }
}

/// Prevout list for sighashing, in input order.
pub fn prevouts_for(utxos: &[&UtxoRef]) -> Vec<TxOut> {
    utxos
        .iter()
        .map(|u| TxOut {
            value: Amount::from_sat(u.value),
            script_pubkey: u.script_pubkey.clone(),
        })
        .collect()
}

/// Sign input `index` as a taproot key-path spend and fill its witness.
pub fn sign_taproot_key_spend(
    secp: &Secp256k1<All>,
    tx: &mut Transaction,
    index: usize,
    prevouts: &[TxOut],
    keypair: &Keypair,
) -> Result<(), SignError> {
    if index >= tx.input.len() {
        return Err(SignError::InputIndex(index));
    }
    let sighash = SighashCache::new(&*tx)
        .taproot_key_spend_signature_hash(index, &Prevouts::All(prevouts), TapSighashType::Default)
        .map_err(|e| SignError::Sighash(e.to_string()))?;

    let msg = Message::from_digest(sighash.to_byte_array());
    let tweaked = keypair.tap_tweak(secp, None);
    let mut rng = rand::thread_rng();
    let sig = secp.sign_schnorr_with_rng(&msg, &tweaked.to_inner(), &mut rng);

    let mut witness = Witness::new();
    witness.push(sig.as_ref());
    tx.input[index].witness = witness;
    Ok(())
}

/// Sign input `index` as a taproot script-path spend of the envelope leaf.
/// The witness is `[signature, reveal script, control block]`.
pub fn sign_taproot_script_spend(
    secp: &Secp256k1<All>,
    tx: &mut Transaction,
    index: usize,
    prevouts: &[TxOut],
    leaf_hash: TapLeafHash,
    reveal_script: &ScriptBuf,
    control_block: &ControlBlock,
    keypair: &Keypair,
) -> Result<(), SignError> {
    if index >= tx.input.len() {
        return Err(SignError::InputIndex(index));
    }
    let sighash = SighashCache::new(&*tx)
        .taproot_script_spend_signature_hash(
            index,
            &Prevouts::All(prevouts),
            leaf_hash,
            TapSighashType::Default,
        )
        .map_err(|e| SignError::Sighash(e.to_string()))?;

    let msg = Message::from_digest(sighash.to_byte_array());
    let mut rng = rand::thread_rng();
    let sig = secp.sign_schnorr_with_rng(&msg, keypair, &mut rng);

    let mut witness = Witness::new();
    witness.push(sig.as_ref());
    witness.push(reveal_script.as_bytes());
    witness.push(control_block.serialize());
    tx.input[index].witness = witness;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::{Network, Txid};
    use secp256k1::SecretKey;

    use crate::bitcoin_utils::envelope::prepare_commit_reveal;
    use crate::bitcoin_utils::keys::KeyInfo;

    fn funding(secp: &Secp256k1<All>) -> (KeyInfo, UtxoRef) {
        let key = KeyInfo::from_secret_key(
            secp,
            SecretKey::from_slice(&[9u8; 32]).unwrap(),
            Network::Regtest,
        );
        let utxo = UtxoRef {
            outpoint: OutPoint {
                txid: Txid::from_byte_array([0xAAu8; 32]),
                vout: 0,
            },
            value: 50_000,
            script_pubkey: key.output.clone(),
            owner: Some(key.x_only),
        };
        (key, utxo)
    }

    #[test]
    fn commit_tx_shape() {
        let secp = Secp256k1::new();
        let (key, utxo) = funding(&secp);
        let spend =
            prepare_commit_reveal(&secp, &key.x_only, "nft", b"data", Network::Regtest).unwrap();
        let tx = build_commit_tx(
            &utxo.outpoint,
            &spend.address,
            10_000,
            Some((key.output.clone(), 2_000)),
            Sequence(7),
        );
        assert_eq!(tx.version, bitcoin::transaction::Version::ONE);
        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.input[0].sequence, Sequence(7));
        assert_eq!(tx.output.len(), 2);
        assert_eq!(tx.output[0].value.to_sat(), 10_000);
        assert_eq!(tx.output[0].script_pubkey, spend.address.script_pubkey());
    }

    #[test]
    fn key_spend_signature_fills_single_element_witness() {
        let secp = Secp256k1::new();
        let (key, utxo) = funding(&secp);
        let spend =
            prepare_commit_reveal(&secp, &key.x_only, "nft", b"data", Network::Regtest).unwrap();
        let mut tx = build_commit_tx(
            &utxo.outpoint,
            &spend.address,
            10_000,
            None,
            Sequence::MAX,
        );
        let prevouts = prevouts_for(&[&utxo]);
        sign_taproot_key_spend(&secp, &mut tx, 0, &prevouts, &key.keypair).unwrap();
        assert_eq!(tx.input[0].witness.len(), 1);
        // Schnorr signature with default sighash type is exactly 64 bytes.
        assert_eq!(tx.input[0].witness.iter().next().unwrap().len(), 64);
    }

    #[test]
    fn script_spend_witness_carries_script_and_control_block() {
        let secp = Secp256k1::new();
        let (key, utxo) = funding(&secp);
        let spend =
            prepare_commit_reveal(&secp, &key.x_only, "nft", b"data", Network::Regtest).unwrap();
        let commit_utxo = UtxoRef {
            outpoint: OutPoint {
                txid: Txid::from_byte_array([0xBBu8; 32]),
                vout: 0,
            },
            value: 9_000,
            script_pubkey: spend.address.script_pubkey(),
            owner: None,
        };
        let mut tx = Transaction {
            version: bitcoin::transaction::Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: commit_utxo.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(8_000),
                script_pubkey: key.output.clone(),
            }],
        };
        let prevouts = prevouts_for(&[&commit_utxo]);
        sign_taproot_script_spend(
            &secp,
            &mut tx,
            0,
            &prevouts,
            spend.leaf_hash(),
            &spend.reveal_script,
            &spend.control_block,
            &key.keypair,
        )
        .unwrap();
        let witness: Vec<_> = tx.input[0].witness.iter().collect();
        assert_eq!(witness.len(), 3);
        assert_eq!(witness[1], spend.reveal_script.as_bytes());
        assert_eq!(witness[2], spend.control_block.serialize());
        // Index out of range is reported, not panicked.
        assert!(sign_taproot_key_spend(&secp, &mut tx, 5, &prevouts, &key.keypair).is_err());
    }

    #[test]
    fn opret_output_is_zero_value_op_return() {
        let out = opret_txout(b"1700000000:12345");
        assert_eq!(out.value.to_sat(), 0);
        assert!(out.script_pubkey.is_op_return());
    }
}
