//! Key management and address derivation

use bitcoin::{address::Address, Network, ScriptBuf, XOnlyPublicKey};
use secp256k1::{All, Keypair, Secp256k1, SecretKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error(
        "unsupported key format; expected WIF (51/52 chars) or raw hex (64 chars)"
    )]
    UnsupportedFormat,
    #[error("invalid secret key: {0}")]
    InvalidSecret(String),
}

/// A signing key with everything the builder needs derived up front: the
/// key-path taproot address, its output script and the x-only internal key.
#[derive(Debug, Clone)]
pub struct KeyInfo {
    pub keypair: Keypair,
    pub x_only: XOnlyPublicKey,
    pub address: Address,
    pub output: ScriptBuf,
}

impl KeyInfo {
    pub fn from_secret_key(secp: &Secp256k1<All>, sk: SecretKey, network: Network) -> Self {
        let keypair = Keypair::from_secret_key(secp, &sk);
        let (x_only, _) = XOnlyPublicKey::from_keypair(&keypair);
        let address = Address::p2tr(secp, x_only, None, network);
        let output = address.script_pubkey();
        KeyInfo {
            keypair,
            x_only,
            address,
            output,
        }
    }

    /// Parse a private key from WIF or raw hex and derive its info.
    pub fn from_key_str(
        secp: &Secp256k1<All>,
        key_str: &str,
        network: Network,
    ) -> Result<Self, KeyError> {
        let sk = parse_private_key(key_str)?;
        Ok(KeyInfo::from_secret_key(secp, sk, network))
    }
}

/// Parse private key from WIF or raw hex
pub fn parse_private_key(key_str: &str) -> Result<SecretKey, KeyError> {
    let key_str = key_str.trim();

    // WIF format first (most common: starts with K, L, 5, c, 9)
    if key_str.len() == 51 || key_str.len() == 52 {
        if let Ok(wif) = bitcoin::PrivateKey::from_wif(key_str) {
            return Ok(wif.inner);
        }
    }

    // Raw hex (64 chars)
    if key_str.len() == 64 {
        if let Ok(bytes) = hex::decode(key_str) {
            return SecretKey::from_slice(&bytes)
                .map_err(|e| KeyError::InvalidSecret(e.to_string()));
        }
    }

    Err(KeyError::UnsupportedFormat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_key_round_trips() {
        let secp = Secp256k1::new();
        let hex_key = "0101010101010101010101010101010101010101010101010101010101010101";
        let info = KeyInfo::from_key_str(&secp, hex_key, Network::Regtest).unwrap();
        assert_eq!(info.output, info.address.script_pubkey());
        assert!(info.output.is_p2tr());
    }

    #[test]
    fn garbage_key_is_rejected() {
        let secp = Secp256k1::new();
        assert!(matches!(
            KeyInfo::from_key_str(&secp, "not-a-key", Network::Regtest),
            Err(KeyError::UnsupportedFormat)
        ));
        // Right length, invalid scalar (all zeroes).
        let zeroes = "0".repeat(64);
        assert!(matches!(
            KeyInfo::from_key_str(&secp, &zeroes, Network::Regtest),
            Err(KeyError::InvalidSecret(_))
        ));
    }
}
