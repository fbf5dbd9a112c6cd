//! Golden image builders.
//!
//! Each builder produces the exact file bytes a vendor tool would export,
//! with every embedded checksum computed, so tests can feed them straight
//! to the parsers and then check what a programmer writes to the device.

use std::fmt::Write as _;

use bmcfw_checksum::{crc8, crc16_table, crc32, crc32_ifx_words, jedec_fuse_checksum};

/// Offset of the PCIe sub-image type byte.
pub const PCIE_TYPE_OFFSET: usize = 0x1C;
/// Size of a PCIe switch flash blob.
pub const PCIE_BLOB_SIZE: usize = 8 * 1024 * 1024;
/// Size of an unsigned MAX10 CFM image.
pub const ALTERA_RPD_SIZE: usize = 0x5C000;

/// ISL hex export for one regulator.
#[derive(Debug, Clone)]
pub struct IslHex {
    /// 8-bit slave address
    pub address: u8,
    /// Device id as the device reports it
    pub device_id: [u8; 4],
    /// Raw silicon revision byte
    pub revision: Option<u8>,
    /// `(command, payload)` records
    pub records: Vec<(u8, Vec<u8>)>,
}

impl IslHex {
    /// Export with two records and a RevF revision line.
    pub fn new(address: u8) -> Self {
        Self {
            address,
            device_id: [0x11, 0x22, 0x33, 0x44],
            revision: Some(0x06),
            records: vec![(0xE7, vec![0x01, 0x02]), (0xC7, vec![0x10])],
        }
    }

    /// Set the device id.
    pub fn with_device_id(mut self, id: [u8; 4]) -> Self {
        self.device_id = id;
        self
    }

    /// Set the raw revision byte, or drop the revision line.
    pub fn with_revision(mut self, revision: Option<u8>) -> Self {
        self.revision = revision;
        self
    }

    /// Append a record.
    pub fn with_record(mut self, command: u8, payload: &[u8]) -> Self {
        self.records.push((command, payload.to_vec()));
        self
    }

    /// Render the hex text.
    pub fn to_text(&self) -> String {
        let a = self.address;
        let [d0, d1, d2, d3] = self.device_id;
        let mut out = format!("49{a:02X}{a:02X}AD{d3:02X}{d2:02X}{d1:02X}{d0:02X}\n");
        if let Some(rev) = self.revision {
            let _ = writeln!(out, "49{a:02X}{a:02X}AE{rev:02X}");
        }
        for (command, payload) in &self.records {
            let mut data = vec![a, *command];
            data.extend_from_slice(payload);
            let count = u8::try_from(payload.len() + 3).unwrap_or(u8::MAX);
            let _ = write!(out, "00{count:02X}");
            for b in &data {
                let _ = write!(out, "{b:02X}");
            }
            let _ = writeln!(out, "{:02X}", crc8(&data, 0));
        }
        out
    }
}

/// PXE `E1110C` register dump.
#[derive(Debug, Clone)]
pub struct PxeDump {
    /// 7-bit address as written in the header
    pub header_address: u8,
    /// `(command word, data word)` pairs
    pub words: Vec<(u16, u16)>,
    /// Declared CRC, when it should disagree with the data
    pub crc_override: Option<u32>,
}

impl PxeDump {
    /// Complete 510-record dump for `header_address`.
    pub fn new(header_address: u8) -> Self {
        let words = (0..510u16)
            .map(|i| (0x2000 | (i % 0x100), i.wrapping_mul(7)))
            .collect();
        Self {
            header_address,
            words,
            crc_override: None,
        }
    }

    /// Declare a wrong CRC.
    pub fn with_crc(mut self, crc: u32) -> Self {
        self.crc_override = Some(crc);
        self
    }

    /// Raw 4-byte-per-record stream.
    pub fn stream(&self) -> Vec<u8> {
        self.words
            .iter()
            .flat_map(|(c, d)| c.to_le_bytes().into_iter().chain(d.to_le_bytes()))
            .collect()
    }

    /// CRC-32 the device reports after programming.
    pub fn crc(&self) -> u32 {
        let region: Vec<u8> = self
            .stream()
            .chunks_exact(4)
            .flat_map(|rec| rec.get(2..4).unwrap_or_default().to_vec())
            .collect();
        crc32(&region)
    }

    /// Render the dump text.
    pub fn to_text(&self) -> String {
        let crc = self.crc_override.unwrap_or_else(|| self.crc());
        let mut out = format!("//E1110C 0x{:02X} - 0x{crc:08X}\n", self.header_address);
        for (command, data) in &self.words {
            let _ = writeln!(out, "0x{command:04X} {data:016b} //ReadWriteWord");
        }
        out
    }
}

/// TI TPS CSV export.
#[derive(Debug, Clone)]
pub struct TiCsv {
    /// 7-bit address
    pub address7: u8,
    /// 6-byte device id
    pub device_id: [u8; 6],
    /// 288 data bytes; the CRC field at 9..11 is filled on render
    pub data: Vec<u8>,
}

impl TiCsv {
    /// Export for the regulator at 7-bit `address7`.
    pub fn new(address7: u8) -> Self {
        let data = (0..288usize).map(|i| u8::try_from(i * 13 % 251).unwrap_or(0)).collect();
        Self {
            address7,
            device_id: [0x54, 0x49, 0x53, 0x68, 0x38, 0x00],
            data,
        }
    }

    /// Set the device id.
    pub fn with_device_id(mut self, id: [u8; 6]) -> Self {
        self.device_id = id;
        self
    }

    fn sealed(&self) -> Vec<u8> {
        let mut data = self.data.clone();
        let crc = crc16_table(data.get(11..265).unwrap_or_default());
        if let Some(field) = data.get_mut(9..11) {
            field.copy_from_slice(&crc.to_le_bytes());
        }
        data
    }

    /// CRC-16 the device reports after programming.
    pub fn crc(&self) -> u16 {
        crc16_table(self.data.get(11..265).unwrap_or_default())
    }

    /// Render the CSV text.
    pub fn to_text(&self) -> String {
        let mut out = String::from("Comment,IC_DEVICE_ID,0x");
        for b in &self.device_id {
            let _ = write!(out, "{b:02X}");
        }
        out.push('\n');
        for block in self.sealed().chunks(32) {
            let _ = write!(out, "BlockWrite,0x{:02X},0xF6,0x20", self.address7);
            for b in block {
                let _ = write!(out, "{b:02X}");
            }
            out.push('\n');
        }
        out
    }
}

/// Infineon `.mic` configuration file.
#[derive(Debug, Clone)]
pub struct MicFile {
    /// 7-bit PMBus address
    pub address7: u8,
    /// `(section type, data dwords)`
    pub sections: Vec<(u8, Vec<u32>)>,
}

impl MicFile {
    /// Two programmable sections and a TRIM section.
    pub fn new(address7: u8) -> Self {
        Self {
            address7,
            sections: vec![
                (0x05, vec![1, 2, 3, 4, 5]),
                (0x02, vec![9, 9, 9]),
                (0x0B, vec![0xAABB_CCDD]),
            ],
        }
    }

    fn dwords(kind: u8, data: &[u32]) -> (Vec<u32>, u32) {
        let kind = u32::from(kind);
        let size = u32::try_from((data.len() + 4) * 4).unwrap_or(0);
        let hcrc = crc32_ifx_words(&[kind, size]);
        let dcrc = crc32_ifx_words(data);
        let mut dwords = vec![kind, size, hcrc];
        dwords.extend_from_slice(data);
        dwords.push(dcrc);
        (dwords, hcrc.wrapping_add(dcrc))
    }

    /// Declared checksum: the sum of every non-TRIM section CRC.
    pub fn checksum(&self) -> u32 {
        self.sections
            .iter()
            .filter(|(kind, _)| *kind != 0x02)
            .fold(0u32, |acc, (kind, data)| acc.wrapping_add(Self::dwords(*kind, data).1))
    }

    /// Number of sections that get programmed.
    pub fn programmed_sections(&self) -> usize {
        self.sections.iter().filter(|(kind, _)| *kind != 0x02).count()
    }

    /// Render the `.mic` text.
    pub fn to_text(&self) -> String {
        let mut out = format!(
            "//XV0 fixture\nPMBus Address : 0x{:02X}\nChecksum : 0x{:08X}\n[Configuration Data]\n",
            self.address7,
            self.checksum()
        );
        for (kind, data) in &self.sections {
            let (dwords, _) = Self::dwords(*kind, data);
            for (n, chunk) in dwords.chunks(4).enumerate() {
                let _ = write!(out, "{:03X}", n * 16);
                for d in chunk {
                    let _ = write!(out, " {d:08X}");
                }
                out.push('\n');
            }
        }
        out.push_str("[End Configuration Data]\n");
        out
    }
}

/// Lattice JEDEC file.
#[derive(Debug, Clone)]
pub struct JedFile {
    /// Configuration rows, four words each
    pub rows: Vec<[u32; 4]>,
    /// User code
    pub usercode: u32,
    /// Declared checksum, when it should disagree with the rows
    pub checksum_override: Option<u16>,
}

impl JedFile {
    /// File with `rows`.
    pub fn new(rows: Vec<[u32; 4]>) -> Self {
        Self {
            rows,
            usercode: 0x00C0_FFEE,
            checksum_override: None,
        }
    }

    /// Declare a wrong checksum.
    pub fn with_checksum(mut self, checksum: u16) -> Self {
        self.checksum_override = Some(checksum);
        self
    }

    /// Fuse checksum of the rows.
    pub fn checksum(&self) -> u16 {
        let words: Vec<u32> = self.rows.iter().flatten().copied().collect();
        jedec_fuse_checksum(&words)
    }

    /// Render the JEDEC text.
    pub fn to_text(&self) -> String {
        let row = |words: &[u32; 4]| words.iter().map(|w| format!("{w:032b}")).collect::<String>();
        let sum = self.checksum_override.unwrap_or_else(|| self.checksum());
        let mut out = format!("\x02\nQF{}*\nG0*\nF0*\nL000000\n", self.rows.len() * 128);
        for r in &self.rows {
            out.push_str(&row(r));
            out.push('\n');
        }
        out.push_str("*\nNOTE END CONFIG DATA*\n");
        out.push_str("NOTE FEATURE_ROW*\nE");
        out.push_str(&"0".repeat(57));
        out.push_str("1000000\n0000010001100000*\n");
        let _ = writeln!(out, "NOTE User Electronic Signature Data*\nUH{:08X}*", self.usercode);
        let _ = writeln!(out, "C{sum:04X}*\n\x030000");
        out
    }
}

/// MAX10 CFM image filled with a repeating pattern, optionally signed.
pub fn altera_rpd(signature: Option<u8>) -> Vec<u8> {
    let mut bytes: Vec<u8> = (0..ALTERA_RPD_SIZE).map(|i| (i % 7) as u8).collect();
    if let Some(sig) = signature {
        bytes.push(sig);
    }
    bytes
}

/// PCIe switch sub-image file of `len` bytes with type byte `raw_type`.
pub fn pcie_sub_image(raw_type: u8, len: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
    if let Some(b) = bytes.get_mut(PCIE_TYPE_OFFSET) {
        *b = raw_type;
    }
    bytes
}

/// 8 MiB PCIe blob; `entries` are `(offset, raw_type, header_len, data_len)`.
pub fn pcie_blob(entries: &[(usize, u8, u32, u32)]) -> Vec<u8> {
    let mut bytes = vec![0xFF; PCIE_BLOB_SIZE];
    for &(offset, raw_type, header_len, data_len) in entries {
        let mut put = |at: usize, src: &[u8]| {
            if let Some(dst) = bytes.get_mut(offset + at..offset + at + src.len()) {
                dst.copy_from_slice(src);
            }
        };
        put(0, b"PSWFWIMG");
        put(PCIE_TYPE_OFFSET, &[raw_type]);
        put(0x20, &header_len.to_be_bytes());
        put(0x24, &data_len.to_be_bytes());
    }
    bytes
}

/// BIOS image of `len` bytes; every 64 KiB block differs.
pub fn bios_image(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| ((i / 0x10000) as u8).wrapping_mul(31).wrapping_add((i % 251) as u8))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isl_hex_layout() {
        let text = IslHex::new(0xC0).to_text();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("49C0C0AD44332211"));
        assert_eq!(lines.next(), Some("49C0C0AE06"));
        assert!(lines.next().is_some_and(|l| l.starts_with("0005C0E70102")));
    }

    #[test]
    fn test_pxe_dump_has_every_record() {
        let dump = PxeDump::new(0x61);
        assert_eq!(dump.stream().len(), 2040);
        assert_eq!(dump.to_text().lines().count(), 511);
    }

    #[test]
    fn test_ti_csv_seals_crc() {
        let csv = TiCsv::new(0x5A);
        let sealed = csv.sealed();
        assert_eq!(sealed[9..11], csv.crc().to_le_bytes());
    }

    #[test]
    fn test_mic_skips_trim_in_checksum() {
        let mic = MicFile::new(0x76);
        assert_eq!(mic.programmed_sections(), 2);
        assert!(mic.to_text().contains(&format!("0x{:08X}", mic.checksum())));
    }

    #[test]
    fn test_blob_regions_written() {
        let blob = pcie_blob(&[(0x20000, 2, 0x40, 0x400)]);
        assert_eq!(&blob[0x20000..0x20008], b"PSWFWIMG");
        assert_eq!(blob[0x20000 + PCIE_TYPE_OFFSET], 2);
        assert_eq!(blob[0], 0xFF);
    }
}
