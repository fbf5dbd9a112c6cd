//! Additive checksums.

/// Wrapping 32-bit sum of every byte.
///
/// Used by the BIOS block fingerprint and by PXE/TI images that carry a plain
/// byte sum instead of a CRC.
pub fn additive_checksum(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)))
}

/// Lattice JEDEC fuse checksum over configuration-flash words.
///
/// Each word holds 32 fuses packed MSB first. The JEDEC checksum counts fuses
/// in file order, so every byte is bit-reversed before it is summed, and the
/// result is truncated to 16 bits.
pub fn jedec_fuse_checksum(words: &[u32]) -> u16 {
    let sum = words
        .iter()
        .flat_map(|w| w.to_be_bytes())
        .fold(0u32, |acc, b| acc.wrapping_add(u32::from(b.reverse_bits())));
    let [lo, hi, ..] = sum.to_le_bytes();
    u16::from_le_bytes([lo, hi])
}
