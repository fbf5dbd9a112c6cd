//! Infineon XDPE configuration file (`.mic`).
//!
//! ```text
//! PMBus Address : 0x76
//! Checksum : 0x1A2B3C4D
//! [Configuration Data]
//! 000 00000005 00000010 5B1C8C6E 00000001
//! 010 2F8E1C4A
//! [End Configuration Data]
//! ```
//!
//! Data lines carry a byte offset and up to four DWORDs. Offset 0 opens a
//! section whose header is `[type, size, header_crc]`; the last DWORD of the
//! section is the CRC of the data in between. The declared checksum is the
//! sum of every header and data CRC. TRIM sections are skipped.

use bmcfw_checksum::crc32_ifx_words;
use bmcfw_errors::{ImageError, ImageResult};
use tracing::debug;

use crate::cursor::parse_hex_u32;
use crate::image::{ExpectedChecksum, FirmwareImage, ProgramRecord, Vendor};
use crate::parser::{ImageFormat, ImageParser, text_lines};

const ADDRESS_FIELD: &str = "PMBus Address :";
const CHECKSUM_FIELD: &str = "Checksum :";
const DATA_START_TAG: &str = "[Configuration Data]";
const DATA_END_TAG: &str = "[End Configuration Data]";
const COMMENT: &str = "//";

/// Section type that is never programmed.
pub const SECTION_TRIM: u8 = 0x02;
/// Device id reported by XDPE parts (`0x8A03`, little-endian).
pub const DEVICE_ID: [u8; 2] = [0x03, 0x8A];
const MAX_SECTIONS: usize = 16;
const MAX_SECTION_DWORDS: usize = 1024;

/// Parser for Infineon `.mic` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct IfxParser;

#[derive(Debug)]
struct Section {
    kind: u8,
    line: usize,
    dwords: Vec<u32>,
}

impl Section {
    /// Validate both CRCs and return their sum.
    fn check(&self) -> ImageResult<u32> {
        let (header, rest) = self.dwords.split_at_checked(3).ok_or_else(|| {
            ImageError::syntax(self.line, format!("section {:#04x} header truncated", self.kind))
        })?;
        let (data_crc, data) = rest.split_last().ok_or_else(|| {
            ImageError::syntax(self.line, format!("section {:#04x} has no data CRC", self.kind))
        })?;

        let mut sum = 0u32;
        for (declared, covered) in [
            (header.get(2).copied().unwrap_or_default(), header.get(..2).unwrap_or_default()),
            (*data_crc, data),
        ] {
            let computed = crc32_ifx_words(covered);
            if computed != declared {
                return Err(ImageError::ChecksumMismatch {
                    expected: declared,
                    actual: computed,
                });
            }
            sum = sum.wrapping_add(computed);
        }
        Ok(sum)
    }

    fn into_record(self, index: usize) -> ProgramRecord {
        let payload = self.dwords.iter().flat_map(|d| d.to_le_bytes()).collect();
        ProgramRecord::new(index, self.kind, payload)
    }
}

fn field_value(line: &str, field: &str, line_no: usize) -> ImageResult<Option<u32>> {
    let Some(pos) = line.find(field) else {
        return Ok(None);
    };
    let tail = line.get(pos + field.len()..).unwrap_or_default();
    match tail.find("0x") {
        Some(p) => parse_hex_u32(tail.get(p..).unwrap_or_default(), line_no).map(Some),
        None => Ok(None),
    }
}

impl ImageParser for IfxParser {
    fn format(&self) -> ImageFormat {
        ImageFormat::Ifx
    }

    fn parse(&self, bytes: &[u8]) -> ImageResult<FirmwareImage> {
        let mut address = 0u8;
        let mut declared = None;
        let mut in_data = false;
        let mut skipping_trim = false;
        let mut sections: Vec<Section> = Vec::new();

        for (line_no, line) in text_lines(bytes)? {
            if line.starts_with(COMMENT) {
                continue;
            }
            if line.starts_with(DATA_END_TAG) {
                break;
            }
            if !in_data {
                if let Some(addr) = field_value(line, ADDRESS_FIELD, line_no)? {
                    address = u8::try_from(addr)
                        .ok()
                        .filter(|a| *a < 0x80)
                        .map(|a| a << 1)
                        .ok_or_else(|| {
                            ImageError::syntax(line_no, format!("address {addr:#x} out of range"))
                        })?;
                } else if let Some(sum) = field_value(line, CHECKSUM_FIELD, line_no)? {
                    declared = Some(sum);
                } else if line.starts_with(DATA_START_TAG) {
                    in_data = true;
                }
                continue;
            }

            let mut tokens = line.split_whitespace();
            let Some(offset) = tokens.next() else {
                continue;
            };
            let offset = parse_hex_u32(offset, line_no)?;
            if offset != 0 && skipping_trim {
                continue;
            }

            for (i, token) in tokens.take(4).enumerate() {
                let dword = parse_hex_u32(token, line_no)?;
                if offset == 0 && i == 0 {
                    let kind = u8::try_from(dword & 0xFF).unwrap_or_default();
                    skipping_trim = kind == SECTION_TRIM;
                    if skipping_trim {
                        debug!(line = line_no, "skipping TRIM section");
                        break;
                    }
                    if sections.len() >= MAX_SECTIONS {
                        return Err(ImageError::TooLarge {
                            limit: MAX_SECTIONS,
                            actual: sections.len() + 1,
                        });
                    }
                    sections.push(Section {
                        kind,
                        line: line_no,
                        dwords: Vec::new(),
                    });
                }
                let section = sections
                    .last_mut()
                    .ok_or_else(|| {
                        ImageError::syntax(line_no, "data before first section header")
                    })?;
                if section.dwords.len() >= MAX_SECTION_DWORDS {
                    return Err(ImageError::TooLarge {
                        limit: MAX_SECTION_DWORDS,
                        actual: section.dwords.len() + 1,
                    });
                }
                section.dwords.push(dword);
            }
        }

        let declared = declared.ok_or(ImageError::MissingField("Checksum"))?;
        if sections.is_empty() {
            return Err(ImageError::MissingField("Configuration Data"));
        }

        let mut sum = 0u32;
        for section in &sections {
            sum = sum.wrapping_add(section.check()?);
        }
        if sum != declared {
            return Err(ImageError::ChecksumMismatch {
                expected: declared,
                actual: sum,
            });
        }

        let records = sections
            .into_iter()
            .enumerate()
            .map(|(i, s)| s.into_record(i))
            .collect();

        Ok(FirmwareImage::builder(Vendor::Infineon, bytes)
            .address(address)
            .device_id(DEVICE_ID.to_vec())
            .records(records)
            .expected(ExpectedChecksum::Crc32(declared))
            .build())
    }
}
