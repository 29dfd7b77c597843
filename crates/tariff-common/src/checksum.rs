//! Fingerprints for acquired batches
//!
//! Persisted documents carry a SHA-256 over the batch so unchanged
//! re-acquisitions can be recognised downstream.

use crate::error::Result;
use crate::types::TariffRecord;
use sha2::{Digest, Sha256};
use std::io::Read;

/// SHA-256 of any readable source, hex encoded
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

/// SHA-256 over the records in order, one JSON document per line
pub fn fingerprint_records(records: &[TariffRecord]) -> Result<String> {
    let mut hasher = Sha256::new();
    for record in records {
        hasher.update(serde_json::to_vec(record)?);
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}
