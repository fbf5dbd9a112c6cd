//! `bmcfw checksum`: checksum a file the way the engine does

use std::path::Path;

use anyhow::{Context, Result};
use bmcfw_checksum::{additive_checksum, crc8, crc16, crc32, crc32_ifx, sha256};
use serde::Serialize;
use tracing::debug;

use crate::commands::Algorithm;
use crate::output;

/// Computed checksum of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumReport {
    /// Algorithm name
    pub algorithm: &'static str,
    /// File the checksum covers
    pub file: String,
    /// Size in bytes
    pub size: usize,
    /// Formatted value
    pub value: String,
}

/// Checksum `bytes` with `algo`, formatted the way the engine logs it.
pub fn compute(algo: Algorithm, bytes: &[u8], seed: u8) -> String {
    match algo {
        Algorithm::Crc32 => format!("{:08X}", crc32(bytes)),
        Algorithm::Crc32Ifx => format!("{:08X}", crc32_ifx(bytes)),
        Algorithm::Crc16 => format!("{:04X}", crc16(bytes)),
        Algorithm::Crc8 => format!("{:02X}", crc8(bytes, seed)),
        Algorithm::Sum => format!("{:08X}", additive_checksum(bytes)),
        Algorithm::Sha256 => hex::encode(sha256(bytes)),
    }
}

/// Execute the checksum command.
pub fn execute(algo: Algorithm, file: &Path, seed: u8, json: bool) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    debug!(algorithm = algo.name(), size = bytes.len(), "computing checksum");

    let report = ChecksumReport {
        algorithm: algo.name(),
        file: file.display().to_string(),
        size: bytes.len(),
        value: compute(algo, &bytes, seed),
    };
    output::print_checksum(&report, json)
}
