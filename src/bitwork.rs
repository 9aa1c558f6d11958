//! Bitwork: hex-prefix proof-of-work targets on transaction ids.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Longest accepted prefix. Anything deeper is unreachable on commodity
/// hardware and almost certainly a typo.
pub const MAX_BITWORK_PREFIX_LEN: usize = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BitworkError {
    #[error("bitwork string is empty")]
    Empty,
    #[error("bitwork prefix '{0}' is not lowercase hex")]
    NotHex(String),
    #[error("bitwork prefix length {0} out of range 1..={MAX_BITWORK_PREFIX_LEN}")]
    PrefixLength(usize),
    #[error("bitwork fractional nibble '{0}' out of range 1..=15")]
    Fractional(String),
    #[error("bitwork string '{0}' has too many '.' separators")]
    Malformed(String),
}

/// A requested difficulty on a transaction id.
///
/// `Any` is a sentinel meaning "no constraint"; it is carried through
/// operation arguments verbatim and is never a minable target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bitwork {
    Any,
    Prefix {
        prefix: String,
        /// Half-byte threshold on the nibble following the prefix.
        ext: Option<u8>,
    },
}

impl Bitwork {
    /// Parse `"<hex>"`, `"<hex>.<n>"` or `"any"`.
    pub fn parse(s: &str) -> Result<Self, BitworkError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(BitworkError::Empty);
        }
        if s == "any" {
            return Ok(Bitwork::Any);
        }
        let mut parts = s.split('.');
        let prefix = parts.next().unwrap_or_default();
        let ext = parts.next();
        if parts.next().is_some() {
            return Err(BitworkError::Malformed(s.to_string()));
        }
        if prefix.is_empty() || prefix.len() > MAX_BITWORK_PREFIX_LEN {
            return Err(BitworkError::PrefixLength(prefix.len()));
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(BitworkError::NotHex(prefix.to_string()));
        }
        let ext = match ext {
            None => None,
            Some(raw) => {
                let n: u8 = raw
                    .parse()
                    .map_err(|_| BitworkError::Fractional(raw.to_string()))?;
                if !(1..=15).contains(&n) {
                    return Err(BitworkError::Fractional(raw.to_string()));
                }
                Some(n)
            }
        };
        Ok(Bitwork::Prefix {
            prefix: prefix.to_string(),
            ext,
        })
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Bitwork::Any)
    }

    /// Expected number of candidate ids per solution, for operator logging.
    pub fn difficulty(&self) -> f64 {
        match self {
            Bitwork::Any => 1.0,
            Bitwork::Prefix { prefix, ext } => {
                let base = 16f64.powi(prefix.len() as i32);
                match ext {
                    Some(n) => base * (16.0 / (16.0 - *n as f64)),
                    None => base,
                }
            }
        }
    }
}

impl fmt::Display for Bitwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bitwork::Any => write!(f, "any"),
            Bitwork::Prefix { prefix, ext: None } => write!(f, "{prefix}"),
            Bitwork::Prefix {
                prefix,
                ext: Some(n),
            } => write!(f, "{prefix}.{n}"),
        }
    }
}

impl FromStr for Bitwork {
    type Err = BitworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Bitwork::parse(s)
    }
}

/// True iff `txid_hex` satisfies the target: leading characters equal the
/// prefix and, when a fractional nibble is requested, the next nibble's
/// value is at least the threshold. Pure string comparison.
pub fn has_valid_bitwork(txid_hex: &str, bitwork: &Bitwork) -> bool {
    match bitwork {
        Bitwork::Any => true,
        Bitwork::Prefix { prefix, ext } => {
            if !txid_hex.starts_with(prefix.as_str()) {
                return false;
            }
            match ext {
                None => true,
                Some(threshold) => txid_hex[prefix.len()..]
                    .chars()
                    .next()
                    .and_then(|c| c.to_digit(16))
                    .map(|nibble| nibble >= *threshold as u32)
                    .unwrap_or(false),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_prefix() {
        assert_eq!(
            Bitwork::parse("abcd").unwrap(),
            Bitwork::Prefix {
                prefix: "abcd".into(),
                ext: None
            }
        );
    }

    #[test]
    fn parses_fractional_nibble() {
        assert_eq!(
            Bitwork::parse("00ff.8").unwrap(),
            Bitwork::Prefix {
                prefix: "00ff".into(),
                ext: Some(8)
            }
        );
    }

    #[test]
    fn parses_any_sentinel() {
        assert!(Bitwork::parse("any").unwrap().is_any());
    }

    #[test]
    fn rejects_malformed_strings() {
        assert_eq!(Bitwork::parse("").unwrap_err(), BitworkError::Empty);
        assert!(matches!(
            Bitwork::parse("xyz").unwrap_err(),
            BitworkError::NotHex(_)
        ));
        assert!(matches!(
            Bitwork::parse("AB").unwrap_err(),
            BitworkError::NotHex(_)
        ));
        assert!(matches!(
            Bitwork::parse("ab.0").unwrap_err(),
            BitworkError::Fractional(_)
        ));
        assert!(matches!(
            Bitwork::parse("ab.16").unwrap_err(),
            BitworkError::Fractional(_)
        ));
        assert!(matches!(
            Bitwork::parse("ab.1.2").unwrap_err(),
            BitworkError::Malformed(_)
        ));
        assert!(matches!(
            Bitwork::parse(&"a".repeat(21)).unwrap_err(),
            BitworkError::PrefixLength(21)
        ));
    }

    #[test]
    fn prefix_match_accepts_and_rejects() {
        let bw = Bitwork::parse("ab").unwrap();
        assert!(has_valid_bitwork(
            "ab1234000000000000000000000000000000000000000000000000000000dead",
            &bw
        ));
        assert!(!has_valid_bitwork(
            "ac0000000000000000000000000000000000000000000000000000000000dead",
            &bw
        ));
    }

    #[test]
    fn fractional_nibble_threshold() {
        let bw = Bitwork::parse("ab.8").unwrap();
        // Third nibble below 0x8 fails, at or above passes.
        assert!(!has_valid_bitwork("ab7f00", &bw));
        assert!(has_valid_bitwork("ab8000", &bw));
        assert!(has_valid_bitwork("abf000", &bw));
    }

    #[test]
    fn any_matches_everything() {
        assert!(has_valid_bitwork("deadbeef", &Bitwork::Any));
    }

    #[test]
    fn display_round_trips() {
        for s in ["any", "0123", "ffff.9"] {
            assert_eq!(Bitwork::parse(s).unwrap().to_string(), s);
        }
    }
}
