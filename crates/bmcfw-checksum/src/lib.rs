//! Checksum engine for BMC firmware images
//!
//! Every function here is pure and deterministic. The variants reproduce the
//! vendor tools bit for bit, including their quirks, because the expected
//! values are embedded in the images and read back from the devices.
//!
//! # Architecture
//!
//! - [`crc32`]: MSB-first CRC-32 used by ISL/PXE voltage regulator images, and
//!   the reflected variant used by Infineon configuration sections
//! - [`crc16`]: CRC-16/0x8005 in the bit-serial and table-driven forms
//! - [`crc8`]: Table-driven CRC-8/0x07 for per-record integrity
//! - [`sum`]: Additive checksums and the Lattice JEDEC fuse checksum
//! - [`digest`]: SHA-256 and the BIOS block fingerprint
//!
//! # Example
//!
//! ```
//! use bmcfw_checksum::prelude::*;
//!
//! assert_eq!(crc16(b"123456789"), 0xFEE8);
//! assert_eq!(crc16_table(b"123456789"), 0xFEE8);
//! assert_eq!(crc8(b"123456789", 0), 0xF4);
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod crc16;
pub mod crc32;
pub mod crc8;
pub mod digest;
pub mod prelude;
pub mod sum;

pub use crc16::{CRC16_TABLE, crc16, crc16_table};
pub use crc32::{crc32, crc32_ifx, crc32_ifx_words};
pub use crc8::{CRC8_TABLE, crc8};
pub use digest::{
    BlockFingerprint, FingerprintKind, SIMPLE_DIGEST_LEN, SIMPLE_HALF_BLOCK, STRONG_DIGEST_LEN,
    sha256,
};
pub use sum::{additive_checksum, jedec_fuse_checksum};
