//! Algorithm-prefixed content digests (`sha256:<hex>`).

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

/// The only algorithm produced by this implementation.
pub const SHA256: &str = "sha256";

/// Errors parsing a digest string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestError {
    #[error("digest is empty")]
    Empty,

    #[error("digest '{0}' is not in algorithm:hex form")]
    Malformed(String),

    #[error("unsupported digest algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("digest hex '{0}' has invalid length or characters")]
    InvalidHex(String),
}

/// A content digest, e.g. `sha256:e3b0c442...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    /// Build a sha256 digest from its lowercase hex form.
    pub fn sha256_from_hex(hex: impl Into<String>) -> Result<Self, DigestError> {
        let hex = hex.into();
        validate_hex(&hex, 64)?;
        Ok(Self {
            algorithm: SHA256.to_string(),
            hex,
        })
    }

    /// Hash a byte slice.
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self {
            algorithm: SHA256.to_string(),
            hex: hex::encode(hasher.finalize()),
        }
    }

    /// Hash everything readable from `reader`, returning the digest and the byte count.
    pub fn of_reader<R: Read>(mut reader: R) -> io::Result<(Self, u64)> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        let digest = Self {
            algorithm: SHA256.to_string(),
            hex: hex::encode(hasher.finalize()),
        };
        Ok((digest, total))
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

fn validate_hex(hex: &str, expected_len: usize) -> Result<(), DigestError> {
    let ok = hex.len() == expected_len
        && hex
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if ok {
        Ok(())
    } else {
        Err(DigestError::InvalidHex(hex.to_string()))
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(DigestError::Empty);
        }
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| DigestError::Malformed(s.to_string()))?;
        if algorithm.is_empty() || hex.is_empty() {
            return Err(DigestError::Malformed(s.to_string()));
        }
        match algorithm {
            SHA256 => {
                validate_hex(hex, 64)?;
                Ok(Self {
                    algorithm: algorithm.to_string(),
                    hex: hex.to_string(),
                })
            }
            other => Err(DigestError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl TryFrom<String> for Digest {
    type Error = DigestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_of_bytes_empty() {
        let d = Digest::of_bytes(b"");
        assert_eq!(d.to_string(), format!("sha256:{}", EMPTY_SHA256));
    }

    #[test]
    fn test_of_reader_matches_of_bytes() {
        let data = vec![7u8; 200_000];
        let (d, n) = Digest::of_reader(&data[..]).unwrap();
        assert_eq!(n, 200_000);
        assert_eq!(d, Digest::of_bytes(&data));
    }

    #[test]
    fn test_parse_valid() {
        let d: Digest = format!("sha256:{}", EMPTY_SHA256).parse().unwrap();
        assert_eq!(d.algorithm(), "sha256");
        assert_eq!(d.hex(), EMPTY_SHA256);
    }

    #[test]
    fn test_parse_rejects_bad_forms() {
        assert_eq!("".parse::<Digest>().unwrap_err(), DigestError::Empty);
        assert!(matches!(
            EMPTY_SHA256.parse::<Digest>().unwrap_err(),
            DigestError::Malformed(_)
        ));
        assert!(matches!(
            "md5:abcd".parse::<Digest>().unwrap_err(),
            DigestError::UnsupportedAlgorithm(_)
        ));
        assert!(matches!(
            "sha256:XYZ".parse::<Digest>().unwrap_err(),
            DigestError::InvalidHex(_)
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let d = Digest::of_bytes(b"hello");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{}\"", d));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
