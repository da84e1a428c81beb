//! Content checksums
//!
//! Sequences are deduplicated by the SHA-256 of their normalized residue
//! string, so the checksum has to be stable across sources: UniProt returns
//! upper case one-letter codes, PDB chains are rebuilt from three-letter
//! residue names, and both must land on the same row.

use crate::error::{PisError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Normalize a residue string: strip whitespace, upper-case.
pub fn normalize_residues(residues: &str) -> String {
    residues
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// SHA-256 (hex) of the normalized residue string.
pub fn sequence_checksum(residues: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_residues(residues).as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 (hex) of any readable source
pub fn compute_checksum<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Verify the SHA-256 of a file, e.g. a bulk accession import
pub fn verify_file_checksum(path: impl AsRef<Path>, expected: &str) -> Result<()> {
    let mut file = std::fs::File::open(path)?;
    let actual = compute_checksum(&mut file)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(PisError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
