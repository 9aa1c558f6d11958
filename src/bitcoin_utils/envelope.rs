//! Envelope script construction for commit/reveal operations.
//!
//! The reveal script commits to an owner key, the protocol tag, the
//! operation tag and the chunked payload:
//!
//! `<xonly pubkey> OP_CHECKSIG OP_0 OP_IF <"atom"> <op-tag> <chunk>* OP_ENDIF`
//!
//! The push-data block after OP_CHECKSIG is never executed, so the output is
//! spendable only by the owner's signature through the script path, while the
//! payload rides along on-ledger for indexers to parse. This byte layout is
//! the protocol's wire surface; do not reorder it.

use bitcoin::{
    address::Address,
    opcodes::all::{OP_CHECKSIG, OP_ENDIF, OP_IF, OP_PUSHBYTES_0},
    script::{Builder, Instruction, PushBytesBuf},
    taproot::{ControlBlock, LeafVersion, TapLeafHash, TaprootBuilder},
    Network, Script, ScriptBuf, XOnlyPublicKey,
};
use secp256k1::{All, Secp256k1};
use thiserror::Error;

use crate::payload::{chunk_bytes, MAX_SCRIPT_CHUNK};

/// Protocol identifier embedded in every envelope.
pub const ATOMICALS_PROTOCOL_ENVELOPE_ID: &[u8] = b"atom";

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope push data too large: {0}")]
    PushData(String),
    #[error("taproot tree construction failed")]
    Taproot,
    #[error("control block unavailable for reveal script")]
    ControlBlock,
    #[error("invalid envelope script: {0}")]
    Decode(String),
}

/// Everything needed to pay into, and later satisfy, one envelope script.
/// Rebuilt whenever the embedded payload bytes change.
#[derive(Debug, Clone)]
pub struct CommitRevealSpend {
    /// Script-path address the commit transaction pays into.
    pub address: Address,
    /// The reveal (redeem) script itself.
    pub reveal_script: ScriptBuf,
    /// Control block satisfying the script path in the reveal witness.
    pub control_block: ControlBlock,
}

impl CommitRevealSpend {
    pub fn leaf_hash(&self) -> TapLeafHash {
        TapLeafHash::from_script(&self.reveal_script, LeafVersion::TapScript)
    }
}

fn push_data(builder: Builder, bytes: &[u8]) -> Result<Builder, EnvelopeError> {
    let data = PushBytesBuf::try_from(bytes.to_vec())
        .map_err(|e| EnvelopeError::PushData(e.to_string()))?;
    Ok(builder.push_slice(&data))
}

/// Build the reveal script for `payload_bytes` owned by `owner_key`.
pub fn build_envelope_script(
    owner_key: &XOnlyPublicKey,
    op_tag: &str,
    payload_bytes: &[u8],
) -> Result<ScriptBuf, EnvelopeError> {
    let mut builder = Builder::new()
        .push_x_only_key(owner_key)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_PUSHBYTES_0)
        .push_opcode(OP_IF);
    builder = push_data(builder, ATOMICALS_PROTOCOL_ENVELOPE_ID)?;
    builder = push_data(builder, op_tag.as_bytes())?;
    for chunk in chunk_bytes(payload_bytes, MAX_SCRIPT_CHUNK) {
        builder = push_data(builder, chunk)?;
    }
    Ok(builder.push_opcode(OP_ENDIF).into_script())
}

/// Build the envelope script and wrap it in a single-leaf taproot tree over
/// the owner's internal key, yielding the commit address and the control
/// block for the eventual script-path spend.
pub fn prepare_commit_reveal(
    secp: &Secp256k1<All>,
    owner_key: &XOnlyPublicKey,
    op_tag: &str,
    payload_bytes: &[u8],
    network: Network,
) -> Result<CommitRevealSpend, EnvelopeError> {
    let reveal_script = build_envelope_script(owner_key, op_tag, payload_bytes)?;
    let spend_info = TaprootBuilder::new()
        .add_leaf(0, reveal_script.clone())
        .map_err(|_| EnvelopeError::Taproot)?
        .finalize(secp, *owner_key)
        .map_err(|_| EnvelopeError::Taproot)?;
    let control_block = spend_info
        .control_block(&(reveal_script.clone(), LeafVersion::TapScript))
        .ok_or(EnvelopeError::ControlBlock)?;
    let address = Address::p2tr_tweaked(spend_info.output_key(), network);
    Ok(CommitRevealSpend {
        address,
        reveal_script,
        control_block,
    })
}

/// A parsed envelope, as an indexer would recover it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEnvelope {
    pub owner_key: XOnlyPublicKey,
    pub protocol_tag: Vec<u8>,
    pub op_tag: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Decode a reveal script back into its committed parts. Chunk concatenation
/// is order-preserving, so `payload` is byte-identical to the encoder input.
pub fn decode_envelope(script: &Script) -> Result<DecodedEnvelope, EnvelopeError> {
    let bad = |msg: &str| EnvelopeError::Decode(msg.to_string());
    let mut instructions = script.instructions();

    let mut next = || {
        instructions
            .next()
            .ok_or_else(|| bad("truncated script"))?
            .map_err(|e| EnvelopeError::Decode(e.to_string()))
    };

    let owner_key = match next()? {
        Instruction::PushBytes(bytes) if bytes.len() == 32 => {
            XOnlyPublicKey::from_slice(bytes.as_bytes())
                .map_err(|e| EnvelopeError::Decode(e.to_string()))?
        }
        _ => return Err(bad("expected 32-byte owner key push")),
    };
    match next()? {
        Instruction::Op(op) if op == OP_CHECKSIG => {}
        _ => return Err(bad("expected OP_CHECKSIG")),
    }
    match next()? {
        Instruction::PushBytes(bytes) if bytes.is_empty() => {}
        _ => return Err(bad("expected OP_0")),
    }
    match next()? {
        Instruction::Op(op) if op == OP_IF => {}
        _ => return Err(bad("expected OP_IF")),
    }
    let protocol_tag = match next()? {
        Instruction::PushBytes(bytes) => bytes.as_bytes().to_vec(),
        _ => return Err(bad("expected protocol tag push")),
    };
    if protocol_tag != ATOMICALS_PROTOCOL_ENVELOPE_ID {
        return Err(bad("unknown protocol tag"));
    }
    let op_tag = match next()? {
        Instruction::PushBytes(bytes) => bytes.as_bytes().to_vec(),
        _ => return Err(bad("expected operation tag push")),
    };

    let mut payload = Vec::new();
    loop {
        match next()? {
            Instruction::PushBytes(bytes) => payload.extend_from_slice(bytes.as_bytes()),
            Instruction::Op(op) if op == OP_ENDIF => break,
            _ => return Err(bad("unexpected opcode inside envelope")),
        }
    }
    Ok(DecodedEnvelope {
        owner_key,
        protocol_tag,
        op_tag,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{Keypair, SecretKey};

    fn owner_key(secp: &Secp256k1<All>) -> XOnlyPublicKey {
        let sk = SecretKey::from_slice(&[7u8; 32]).unwrap();
        XOnlyPublicKey::from_keypair(&Keypair::from_secret_key(secp, &sk)).0
    }

    #[test]
    fn envelope_round_trips_with_multiple_chunks() {
        let secp = Secp256k1::new();
        let key = owner_key(&secp);
        // 1100 bytes forces three push-data chunks (520 + 520 + 60).
        let payload: Vec<u8> = (0..1100u32).map(|i| (i % 256) as u8).collect();

        let script = build_envelope_script(&key, "dft", &payload).unwrap();
        let decoded = decode_envelope(&script).unwrap();

        assert_eq!(decoded.owner_key, key);
        assert_eq!(decoded.protocol_tag, b"atom");
        assert_eq!(decoded.op_tag, b"dft");
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn commit_address_changes_with_payload() {
        let secp = Secp256k1::new();
        let key = owner_key(&secp);
        let a = prepare_commit_reveal(&secp, &key, "nft", b"payload-a", Network::Regtest).unwrap();
        let b = prepare_commit_reveal(&secp, &key, "nft", b"payload-b", Network::Regtest).unwrap();
        assert_ne!(a.address, b.address);
        assert!(a.address.script_pubkey().is_p2tr());
        assert!(!a.control_block.serialize().is_empty());
    }

    #[test]
    fn foreign_scripts_are_rejected() {
        let secp = Secp256k1::new();
        let key = owner_key(&secp);
        let script = Builder::new()
            .push_x_only_key(&key)
            .push_opcode(OP_CHECKSIG)
            .into_script();
        assert!(decode_envelope(&script).is_err());
    }
}
