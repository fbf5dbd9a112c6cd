//! CRC-16 with polynomial `0x8005`, seed zero.
//!
//! The bit-serial form mirrors the vendor reference loop, which tests the
//! register MSB against each data bit shifted into bit 7. The table-driven
//! form is what TI publishes for its configuration blocks; both must agree.

const POLY: u16 = 0x8005;

#[expect(
    clippy::indexing_slicing,
    clippy::cast_possible_truncation,
    reason = "loop index stays below the table length"
)]
const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
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

/// Lookup table for [`crc16_table`].
pub const CRC16_TABLE: [u16; 256] = build_table();

/// Compute the CRC-16 bit by bit.
pub fn crc16(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |mut crc, &byte| {
        for bit in 0..8 {
            let feedback = ((crc & 0x8000) >> 8) ^ (u16::from(byte << bit) & 0x80);
            crc = if feedback != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
        crc
    })
}

/// Compute the CRC-16 with [`CRC16_TABLE`].
pub fn crc16_table(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |acc, &byte| {
        let [hi, _] = acc.to_be_bytes();
        let idx = usize::from(hi ^ byte);
        let entry = CRC16_TABLE.get(idx).copied().unwrap_or_default();
        (acc << 8) ^ entry
    })
}
