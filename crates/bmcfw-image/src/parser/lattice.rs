//! Lattice JEDEC (`.jed`) files for MachXO2/XO3 CPLDs.
//!
//! Only the fields needed for in-system programming are decoded: the fuse
//! count, the configuration-fuse rows after `L000`, the UFM rows after
//! `NOTE TAG DATA`, the feature row, the user code and the fuse checksum.

use bmcfw_checksum::jedec_fuse_checksum;
use bmcfw_errors::{ImageError, ImageResult};
use tracing::debug;

use crate::cursor::parse_hex_u32;
use crate::image::{ExpectedChecksum, FirmwareImage, ImageMetadata, ProgramRecord, Vendor};
use crate::parser::{ImageFormat, ImageParser, text_lines};

/// Bits per fuse row.
pub const ROW_BITS: usize = 128;
/// Command that programs one configuration row.
pub const CMD_PROGRAM_PAGE: u8 = 0x70;

const TAG_QF: &str = "QF";
const TAG_CF_START: &str = "L000";
const TAG_UFM: &str = "NOTE TAG DATA";
const TAG_FEATURE: &str = "NOTE FEATURE";
const TAG_USERCODE: &str = "NOTE User Electronic";
const TAG_CHECKSUM: &str = "C";

/// Parser for Lattice JEDEC files.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatticeParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    None,
    Cf,
    Ufm,
    Feature,
    Usercode,
}

fn is_row(line: &str) -> bool {
    line.starts_with('0') || line.starts_with('1')
}

/// Unpack a 128-character row of `0`/`1` into four words, MSB first.
fn parse_row(line: &str, line_no: usize) -> ImageResult<[u32; 4]> {
    let bits = line.trim_end_matches('*');
    if bits.len() != ROW_BITS {
        return Err(ImageError::syntax(
            line_no,
            format!("fuse row has {} bits, expected {ROW_BITS}", bits.len()),
        ));
    }
    let mut words = [0u32; 4];
    for (word, chunk) in words.iter_mut().zip(bits.as_bytes().chunks(32)) {
        for &c in chunk {
            let bit = match c {
                b'0' => 0,
                b'1' => 1,
                other => {
                    return Err(ImageError::syntax(
                        line_no,
                        format!("invalid fuse character {:?}", char::from(other)),
                    ));
                }
            };
            *word = (*word << 1) | bit;
        }
    }
    Ok(words)
}

/// Text between `start` characters and the terminating `*`.
fn tagged_value(line: &str, skip: usize) -> &str {
    let body = line.get(skip..).unwrap_or_default();
    body.split('*').next().unwrap_or_default().trim()
}

fn parse_binary<T: TryFrom<u64>>(digits: &str, line_no: usize) -> ImageResult<T> {
    u64::from_str_radix(digits, 2)
        .ok()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| ImageError::syntax(line_no, format!("bad binary field {digits:?}")))
}

impl ImageParser for LatticeParser {
    fn format(&self) -> ImageFormat {
        ImageFormat::Lattice
    }

    fn parse(&self, bytes: &[u8]) -> ImageResult<FirmwareImage> {
        let mut block = Block::None;
        let mut fuse_count = 0u64;
        let mut cf: Vec<[u32; 4]> = Vec::new();
        let mut ufm_rows = 0usize;
        let mut feature_row = 0u64;
        let mut fear = 0u32;
        let mut usercode = 0u32;
        let mut declared = None;

        for (line_no, line) in text_lines(bytes)? {
            if line.is_empty() {
                continue;
            }
            if line.starts_with(TAG_QF) {
                fuse_count = tagged_value(line, TAG_QF.len())
                    .parse()
                    .map_err(|e| ImageError::syntax(line_no, format!("bad fuse count: {e}")))?;
                continue;
            } else if line.starts_with(TAG_CF_START) && cf.is_empty() {
                block = Block::Cf;
                continue;
            } else if line.starts_with(TAG_UFM) {
                block = Block::Ufm;
                continue;
            } else if line.starts_with(TAG_FEATURE) {
                block = Block::Feature;
                continue;
            } else if line.starts_with(TAG_USERCODE) {
                block = Block::Usercode;
                continue;
            } else if line.starts_with(TAG_CHECKSUM) && block != Block::Cf {
                let value = parse_hex_u32(tagged_value(line, TAG_CHECKSUM.len()), line_no)?;
                declared = Some(value);
                continue;
            }

            match block {
                Block::Cf if is_row(line) => cf.push(parse_row(line, line_no)?),
                Block::Cf => {
                    debug!(rows = cf.len(), "end of CF data");
                    block = Block::None;
                }
                Block::Ufm if line.starts_with('L') => {}
                Block::Ufm if is_row(line) => {
                    parse_row(line, line_no)?;
                    ufm_rows += 1;
                }
                Block::Ufm => block = Block::None,
                Block::Feature if line.starts_with('E') => {
                    feature_row = parse_binary(tagged_value(line, 1), line_no)?;
                }
                Block::Feature => {
                    fear = parse_binary(tagged_value(line, 0), line_no)?;
                    block = Block::None;
                }
                Block::Usercode => {
                    if line.starts_with("UH") {
                        usercode = parse_hex_u32(tagged_value(line, 2), line_no)?;
                    }
                    block = Block::None;
                }
                Block::None => {}
            }
        }

        if cf.is_empty() {
            return Err(ImageError::MissingField("L000 configuration rows"));
        }
        let declared = declared.ok_or(ImageError::MissingField("C checksum"))?;
        let words: Vec<u32> = cf.iter().flatten().copied().collect();
        let computed = jedec_fuse_checksum(&words);
        if declared == 0 || declared != u32::from(computed) {
            return Err(ImageError::ChecksumMismatch {
                expected: declared,
                actual: u32::from(computed),
            });
        }

        let records = cf
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let payload = row.iter().flat_map(|w| w.to_be_bytes()).collect();
                ProgramRecord::new(i, CMD_PROGRAM_PAGE, payload)
            })
            .collect();

        Ok(FirmwareImage::builder(Vendor::Lattice, bytes)
            .records(records)
            .expected(ExpectedChecksum::Jedec(computed))
            .metadata(ImageMetadata::Lattice {
                fuse_count,
                usercode,
                feature_row,
                fear,
                ufm_rows,
            })
            .build())
    }
}
