//! CRC-32 variants used by voltage regulator images.
//!
//! [`crc32`] is the checksum the ISL/PXE tools embed in `//E1110C` comment
//! lines. It is not the common CRC-32: every input byte is XORed into the low
//! byte of the register and followed by a full 32 shift rounds, MSB first,
//! with no final inversion.
//!
//! [`crc32_ifx`] is the Infineon section CRC. Their tool XORs one 32-bit word
//! at a time and runs 32 reflected rounds with a final inversion, which by
//! linearity equals the standard reflected CRC-32 over the little-endian bytes
//! of each word.

const POLY_MSB: u32 = 0x04C1_1DB7;

/// Compute the ISL/PXE CRC-32 over `bytes`.
///
/// Seed `0xFFFF_FFFF`, polynomial `0x04C1_1DB7`, MSB-first, no final XOR.
pub fn crc32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0xFFFF_FFFF_u32, |mut crc, &byte| {
        crc ^= u32::from(byte);
        for _ in 0..32 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ POLY_MSB
            } else {
                crc << 1
            };
        }
        crc
    })
}

/// Compute the Infineon CRC-32 over a byte stream of little-endian words.
pub fn crc32_ifx(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Compute the Infineon CRC-32 over 32-bit configuration words.
pub fn crc32_ifx_words(words: &[u32]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for word in words {
        hasher.update(&word.to_le_bytes());
    }
    hasher.finalize()
}
