//! SHA-256 checksums with the `sha256:` prefix.
//!
//! Every self-describing JSON document (schema, manifest, segment meta) and
//! every segment file carries one of these. Equality is the integrity test.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, ScourError};

/// Prefix for SHA-256 checksums.
pub const CHECKSUM_PREFIX: &str = "sha256:";

/// Buffer size for streaming checksum computation.
const CHECKSUM_BUF_SIZE: usize = 32 * 1024;

/// A hex-encoded SHA-256 hash with the `sha256:` prefix.
///
/// The empty checksum is the cleared-field placeholder used while computing
/// a document's self-checksum; it never verifies against real data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// The cleared-field placeholder.
    pub fn empty() -> Self {
        Checksum(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse and validate a checksum string: `sha256:` followed by 64 hex chars.
    pub fn parse(s: &str) -> Result<Checksum> {
        let hex_part = s
            .strip_prefix(CHECKSUM_PREFIX)
            .ok_or_else(|| ScourError::InvalidChecksum(format!("missing prefix in {s:?}")))?;
        if hex_part.len() != 64 {
            return Err(ScourError::InvalidChecksum(format!(
                "expected 64 hex chars, got {}",
                hex_part.len()
            )));
        }
        if !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ScourError::InvalidChecksum(format!(
                "non-hex characters in {s:?}"
            )));
        }
        Ok(Checksum(s.to_string()))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the SHA-256 checksum of a byte slice.
pub fn compute_checksum(data: &[u8]) -> Checksum {
    let digest = Sha256::digest(data);
    Checksum(format!("{CHECKSUM_PREFIX}{}", hex::encode(digest)))
}

/// Compute the SHA-256 checksum of a file by streaming its contents.
pub fn compute_file_checksum(path: &Path) -> Result<Checksum> {
    let file = File::open(path).map_err(|e| ScourError::io(path, e))?;
    let mut reader = BufReader::with_capacity(CHECKSUM_BUF_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHECKSUM_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf).map_err(|e| ScourError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Checksum(format!(
        "{CHECKSUM_PREFIX}{}",
        hex::encode(hasher.finalize())
    )))
}

/// Verify that a file's SHA-256 matches the expected checksum.
pub fn verify_file_checksum(path: &Path, expected: &Checksum) -> Result<()> {
    let actual = compute_file_checksum(path)?;
    if actual != *expected {
        return Err(ScourError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_compute_checksum_known_value() {
        // SHA-256 of the empty string.
        let c = compute_checksum(b"");
        assert_eq!(
            c.as_str(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_checksum_differs_on_content() {
        assert_ne!(compute_checksum(b"hello"), compute_checksum(b"hellp"));
    }

    #[test]
    fn test_parse_valid() {
        let c = compute_checksum(b"abc");
        let parsed = Checksum::parse(c.as_str()).unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn test_parse_rejects_bad_format() {
        assert!(Checksum::parse("md5:deadbeef").is_err());
        assert!(Checksum::parse("sha256:tooshort").is_err());
        assert!(Checksum::parse(&format!("sha256:{}", "z".repeat(64))).is_err());
    }

    #[test]
    fn test_file_checksum_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, b"some file contents").unwrap();

        let expected = compute_checksum(b"some file contents");
        assert_eq!(compute_file_checksum(&path).unwrap(), expected);
        verify_file_checksum(&path, &expected).unwrap();
    }

    #[test]
    fn test_verify_detects_tamper() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, b"original").unwrap();
        let expected = compute_checksum(b"original");

        fs::write(&path, b"tampered").unwrap();
        let err = verify_file_checksum(&path, &expected).unwrap_err();
        assert!(matches!(err, ScourError::ChecksumMismatch { .. }));
    }
}
