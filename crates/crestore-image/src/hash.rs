//! SHA-256 content verification.
//!
//! A checkpoint archive must be byte-identical when it is consumed by a
//! restore path. Its digest is recorded right after export and checked again
//! before use.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crestore_common::error::{CrestoreError, Result};
use sha2::{Digest, Sha256};

/// Computes the hex SHA-256 digest of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn hash_file(path: &Path) -> Result<String> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let io_err = |e| CrestoreError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Validates that a file still matches the digest recorded earlier.
///
/// # Errors
///
/// Returns `CrestoreError::DigestMismatch` if the digests differ, or an I/O
/// error if the file is gone.
pub fn validate_hash(path: &Path, expected: &str) -> Result<()> {
    let actual = hash_file(path)?;
    if actual == expected {
        tracing::debug!(path = %path.display(), "digest verified");
        Ok(())
    } else {
        Err(CrestoreError::DigestMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        })
    }
}
