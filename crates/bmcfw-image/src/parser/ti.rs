//! TI TPS CSV export.
//!
//! ```text
//! Comment,IC_DEVICE_ID,0x544953683800
//! BlockWrite,0x5A,0xF6,0x20FFFF...   <- 32 data bytes
//! ```
//!
//! Nine 32-byte blocks are written with `F6`. Bytes 9 and 10 of the first
//! block hold the CRC-16 (little-endian) of the 254 bytes that follow it.

use bmcfw_checksum::crc16_table;
use bmcfw_errors::{ImageError, ImageResult};

use crate::cursor::{decode_hex, parse_hex_u32};
use crate::image::{ExpectedChecksum, FirmwareImage, ProgramRecord, Vendor};
use crate::parser::{ImageFormat, ImageParser, text_lines};

const DEVICE_ID_TAG: &str = "IC_DEVICE_ID";
const BLOCK_WRITE_TAG: &str = "BlockWrite";
const BLOCK_READ_TAG: &str = "BlockRead";

/// Data bytes per block.
pub const BLOCK_LEN: usize = 32;
/// Number of blocks in a complete export.
pub const BLOCK_COUNT: usize = 9;
/// Length of the device id.
pub const DEVICE_ID_LEN: usize = 6;
const CRC_OFFSET: usize = 9;
const CRC_REGION_LEN: usize = 254;

/// Bytes covered by the CRC: everything after the CRC field up to 254 bytes.
///
/// `blocks` are the data bytes of each block without the length prefix.
pub fn crc_region(blocks: &[&[u8]]) -> Vec<u8> {
    blocks
        .iter()
        .flat_map(|b| b.iter().copied())
        .skip(CRC_OFFSET + 2)
        .take(CRC_REGION_LEN)
        .collect()
}

/// Parser for TI CSV exports.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiParser;

fn field(line: &str, idx: usize, line_no: usize) -> ImageResult<&str> {
    line.split(',')
        .nth(idx)
        .map(str::trim)
        .ok_or_else(|| ImageError::syntax(line_no, format!("missing field {idx}")))
}

fn parse_address(token: &str, line_no: usize) -> ImageResult<u8> {
    let addr = parse_hex_u32(token, line_no)?;
    u8::try_from(addr)
        .ok()
        .and_then(|a| a.checked_shl(1))
        .filter(|_| addr < 0x80)
        .ok_or_else(|| ImageError::syntax(line_no, format!("7-bit address {addr:#x} out of range")))
}

impl ImageParser for TiParser {
    fn format(&self) -> ImageFormat {
        ImageFormat::Ti
    }

    fn parse(&self, bytes: &[u8]) -> ImageResult<FirmwareImage> {
        let mut device_id = None;
        let mut address = 0u8;
        let mut records = Vec::with_capacity(BLOCK_COUNT);

        for (line_no, line) in text_lines(bytes)? {
            if let Some(pos) = line.find(DEVICE_ID_TAG) {
                let tail = line.get(pos..).unwrap_or_default();
                let digits = tail
                    .find("0x")
                    .and_then(|p| tail.get(p + 2..p + 2 + DEVICE_ID_LEN * 2))
                    .ok_or_else(|| ImageError::syntax(line_no, "device id needs 12 hex digits"))?;
                device_id = Some(decode_hex(digits, line_no)?);
            } else if line.contains(BLOCK_READ_TAG) {
                if address == 0 {
                    address = parse_address(field(line, 1, line_no)?, line_no)?;
                }
            } else if line.contains(BLOCK_WRITE_TAG) {
                if address == 0 {
                    address = parse_address(field(line, 1, line_no)?, line_no)?;
                }
                let command = parse_hex_u32(field(line, 2, line_no)?, line_no)?;
                let command = u8::try_from(command)
                    .map_err(|_| {
                        ImageError::syntax(line_no, format!("command {command:#x} out of range"))
                    })?;
                let data = field(line, 3, line_no)?;
                let data = decode_hex(data.trim_start_matches("0x"), line_no)?;
                let len = data.first().copied().map(usize::from).unwrap_or_default();
                if len != BLOCK_LEN || data.len() != BLOCK_LEN + 1 {
                    return Err(ImageError::syntax(
                        line_no,
                        format!(
                            "block write carries {} bytes, expected {BLOCK_LEN}",
                            data.len().saturating_sub(1)
                        ),
                    ));
                }
                records.push(ProgramRecord::new(records.len(), command, data));
            }
        }

        let device_id = device_id.ok_or(ImageError::MissingField(DEVICE_ID_TAG))?;
        if records.len() != BLOCK_COUNT {
            return Err(ImageError::invalid_size(
                records.len(),
                format!("{BLOCK_COUNT} BlockWrite lines"),
            ));
        }

        let blocks: Vec<&[u8]> = records
            .iter()
            .map(|r| r.payload().get(1..).unwrap_or_default())
            .collect();
        let declared = blocks
            .first()
            .and_then(|b| b.get(CRC_OFFSET..CRC_OFFSET + 2))
            .map(|b| b.iter().rev().fold(0u16, |acc, &x| (acc << 8) | u16::from(x)))
            .ok_or(ImageError::MissingField("CRC16"))?;
        let computed = crc16_table(&crc_region(&blocks));
        if computed != declared {
            return Err(ImageError::ChecksumMismatch {
                expected: u32::from(declared),
                actual: u32::from(computed),
            });
        }

        Ok(FirmwareImage::builder(Vendor::Ti, bytes)
            .address(address)
            .device_id(device_id)
            .records(records)
            .expected(ExpectedChecksum::Crc16(declared))
            .build())
    }
}
