//! PXE register dump (`E1110C` export).
//!
//! ```text
//! //E1110C 0x60 - 0x1A2B3C4D
//! 0x2011 0100000000000010 //ReadWriteWord
//! ...
//! ```
//!
//! Each `ReadWriteWord` line holds a hex command word and a binary data word,
//! stored little-endian as four bytes: `[register, page_select, data_lo,
//! data_hi]`. The dump always covers 510 registers. The declared CRC-32 is
//! taken over bytes 2 and 3 of every 4-byte record.

use bmcfw_checksum::crc32;
use bmcfw_errors::{ImageError, ImageResult};

use crate::cursor::parse_hex_u32;
use crate::image::{ExpectedChecksum, FirmwareImage, ProgramRecord, Vendor};
use crate::parser::{ImageFormat, ImageParser, text_lines};

/// Comment marker carrying the slave address and the image CRC.
pub const CRC_MARKER: &str = "//E1110C";
const RECORD_MARKER: &str = "//ReadWriteWord";

/// Number of register records in a complete dump.
pub const RECORD_COUNT: usize = 510;
/// Raw stream size, 4 bytes per record.
pub const STREAM_LEN: usize = RECORD_COUNT * 4;

/// Page selected by the second byte of a record.
pub fn record_page(page_select: u8) -> u8 {
    (page_select >> 1) & 0x3F
}

/// Bytes covered by the image CRC: 2 of every 4, starting at offset 2.
pub fn crc_region(stream: &[u8]) -> Vec<u8> {
    stream
        .chunks_exact(4)
        .flat_map(|rec| rec.get(2..4).unwrap_or_default().iter().copied())
        .collect()
}

/// Parser for PXE register dumps.
#[derive(Debug, Clone, Copy, Default)]
pub struct PxeParser;

fn parse_header(line: &str, line_no: usize) -> ImageResult<(u8, u32)> {
    let mut tokens = line
        .split([' ', '-'])
        .filter(|t| !t.is_empty())
        .skip(1);
    let addr = tokens
        .next()
        .ok_or_else(|| ImageError::syntax(line_no, "missing slave address"))
        .and_then(|t| parse_hex_u32(t, line_no))?;
    let crc = tokens
        .next()
        .ok_or_else(|| ImageError::syntax(line_no, "missing CRC"))
        .and_then(|t| parse_hex_u32(t, line_no))?;
    let addr = u8::try_from(addr & 0xFE)
        .map_err(|_| ImageError::syntax(line_no, format!("slave address {addr:#x} out of range")))?;
    Ok((addr, crc))
}

fn parse_word_line(line: &str, line_no: usize) -> ImageResult<[u8; 4]> {
    let mut tokens = line.split_whitespace();
    let command = tokens
        .next()
        .ok_or_else(|| ImageError::syntax(line_no, "missing command word"))
        .and_then(|t| parse_hex_u32(t, line_no))?;
    let command = u16::try_from(command)
        .map_err(|_| {
            ImageError::syntax(line_no, format!("command word {command:#x} exceeds 16 bits"))
        })?;
    let data = tokens
        .next()
        .ok_or_else(|| ImageError::syntax(line_no, "missing data word"))?;
    let data = u16::from_str_radix(data, 2)
        .map_err(|e| ImageError::syntax(line_no, format!("bad binary data word {data:?}: {e}")))?;
    let [c0, c1] = command.to_le_bytes();
    let [d0, d1] = data.to_le_bytes();
    Ok([c0, c1, d0, d1])
}

impl ImageParser for PxeParser {
    fn format(&self) -> ImageFormat {
        ImageFormat::Pxe
    }

    fn parse(&self, bytes: &[u8]) -> ImageResult<FirmwareImage> {
        let mut header = None;
        let mut stream = Vec::with_capacity(STREAM_LEN);

        for (line_no, line) in text_lines(bytes)? {
            if line.starts_with(CRC_MARKER) {
                header = Some(parse_header(line, line_no)?);
            } else if line.contains(RECORD_MARKER) {
                if stream.len() >= STREAM_LEN {
                    return Err(ImageError::TooLarge {
                        limit: RECORD_COUNT,
                        actual: stream.len() / 4 + 1,
                    });
                }
                stream.extend_from_slice(&parse_word_line(line, line_no)?);
            }
        }

        let (address, declared) = header.ok_or(ImageError::MissingField(CRC_MARKER))?;
        if stream.len() != STREAM_LEN {
            return Err(ImageError::invalid_size(
                stream.len(),
                format!("{STREAM_LEN} bytes ({RECORD_COUNT} ReadWriteWord records)"),
            ));
        }

        let computed = crc32(&crc_region(&stream));
        if computed != declared {
            return Err(ImageError::ChecksumMismatch {
                expected: declared,
                actual: computed,
            });
        }

        let records = stream
            .chunks_exact(4)
            .enumerate()
            .map(|(index, rec)| match rec {
                [register, rest @ ..] => ProgramRecord::new(index, *register, rest.to_vec()),
                [] => ProgramRecord::new(index, 0, Vec::new()),
            })
            .collect();

        Ok(FirmwareImage::builder(Vendor::Pxe, bytes)
            .address(address)
            .records(records)
            .payload(stream)
            .expected(ExpectedChecksum::Crc32(declared))
            .build())
    }
}
