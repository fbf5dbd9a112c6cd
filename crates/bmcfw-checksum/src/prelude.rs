//! Convenience re-exports for the checksum functions

pub use crate::crc8::crc8;
pub use crate::crc16::{crc16, crc16_table};
pub use crate::crc32::{crc32, crc32_ifx, crc32_ifx_words};
pub use crate::digest::{BlockFingerprint, FingerprintKind, sha256};
pub use crate::sum::{additive_checksum, jedec_fuse_checksum};
