//! SHA-256 and the BIOS block fingerprint.
//!
//! The bridge controller can report either a SHA-256 of a whole 64 KiB block
//! or, on older firmware, two additive sums over its 32 KiB halves. A
//! [`BlockFingerprint`] holds whichever form was negotiated so the programmer
//! can compare the host-side value with the device-side one.

use core::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::sum::additive_checksum;

/// Half-block span covered by one simple sum.
pub const SIMPLE_HALF_BLOCK: usize = 32 * 1024;

/// Length of a strong digest in bytes.
pub const STRONG_DIGEST_LEN: usize = 32;

/// Length of one simple sum in bytes.
pub const SIMPLE_DIGEST_LEN: usize = 4;

/// SHA-256 of `bytes`.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Which fingerprint the device supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FingerprintKind {
    /// SHA-256 over the full block
    Strong,
    /// Additive sum over each half-block
    Simple,
}

impl FingerprintKind {
    /// Number of bytes the device returns for one block.
    pub const fn device_len(self) -> usize {
        match self {
            FingerprintKind::Strong => STRONG_DIGEST_LEN,
            FingerprintKind::Simple => 2 * SIMPLE_DIGEST_LEN,
        }
    }
}

/// Checksum of one BIOS block in the form the device reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockFingerprint {
    /// SHA-256 digest
    Strong([u8; 32]),
    /// Additive sums of the two halves
    Simple([u32; 2]),
}

impl BlockFingerprint {
    /// Fingerprint a host-side block.
    ///
    /// For [`FingerprintKind::Simple`] the halves are `block[..32K]` and
    /// `block[32K..64K]`; a short block sums whatever is present.
    pub fn compute(kind: FingerprintKind, block: &[u8]) -> Self {
        match kind {
            FingerprintKind::Strong => BlockFingerprint::Strong(sha256(block)),
            FingerprintKind::Simple => {
                let split = block.len().min(SIMPLE_HALF_BLOCK);
                let (lo, rest) = block.split_at(split);
                let hi = rest.get(..rest.len().min(SIMPLE_HALF_BLOCK)).unwrap_or(rest);
                BlockFingerprint::Simple([additive_checksum(lo), additive_checksum(hi)])
            }
        }
    }

    /// Decode the bytes a device returned for one block.
    ///
    /// Returns `None` when `raw` is shorter than [`FingerprintKind::device_len`].
    pub fn from_device_bytes(kind: FingerprintKind, raw: &[u8]) -> Option<Self> {
        match kind {
            FingerprintKind::Strong => {
                let digest: [u8; 32] = raw.get(..STRONG_DIGEST_LEN)?.try_into().ok()?;
                Some(BlockFingerprint::Strong(digest))
            }
            FingerprintKind::Simple => {
                let lo: [u8; 4] = raw.get(..4)?.try_into().ok()?;
                let hi: [u8; 4] = raw.get(4..8)?.try_into().ok()?;
                Some(BlockFingerprint::Simple([
                    u32::from_le_bytes(lo),
                    u32::from_le_bytes(hi),
                ]))
            }
        }
    }

    /// Kind of this fingerprint.
    pub fn kind(&self) -> FingerprintKind {
        match self {
            BlockFingerprint::Strong(_) => FingerprintKind::Strong,
            BlockFingerprint::Simple(_) => FingerprintKind::Simple,
        }
    }

    /// Wire form, as the device would return it.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            BlockFingerprint::Strong(d) => d.to_vec(),
            BlockFingerprint::Simple([lo, hi]) => {
                let mut out = lo.to_le_bytes().to_vec();
                out.extend_from_slice(&hi.to_le_bytes());
                out
            }
        }
    }
}

impl fmt::Display for BlockFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockFingerprint::Strong(d) => write!(f, "sha256:{}", hex::encode(d)),
            BlockFingerprint::Simple([lo, hi]) => write!(f, "sum:{lo:08x}:{hi:08x}"),
        }
    }
}
