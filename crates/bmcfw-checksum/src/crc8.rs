//! Table-driven CRC-8 with polynomial `0x07`, used on every record line of
//! ISL hex exports.

const POLY: u8 = 0x07;

#[expect(
    clippy::indexing_slicing,
    clippy::cast_possible_truncation,
    reason = "loop index stays below the table length"
)]
const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Lookup table for [`crc8`].
pub const CRC8_TABLE: [u8; 256] = build_table();

/// Compute the CRC-8 of `bytes` starting from `seed`.
pub fn crc8(bytes: &[u8], seed: u8) -> u8 {
    bytes.iter().fold(seed, |crc, &byte| {
        CRC8_TABLE
            .get(usize::from(crc ^ byte))
            .copied()
            .unwrap_or_default()
    })
}
