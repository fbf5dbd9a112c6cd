//! ISL hex export.
//!
//! Every line is a string of hex byte pairs. Two line kinds matter:
//!
//! ```text
//! 49 .. AA AD D3 D2 D1 D0 ..   device id block: slave AA, id bytes reversed
//! 49 .. AA AE RR ..            silicon revision RR
//! 00 CC AA KK PP PP .. C8      record: count CC, slave AA, command KK,
//!                              CC-3 payload bytes, CRC-8 over AA..PP
//! ```
//!
//! One file may describe several regulators; a new `AD` line starts the next.

use bmcfw_checksum::crc8;
use bmcfw_errors::{ImageError, ImageResult};
use tracing::debug;

use crate::cursor::hex_byte_at;
use crate::image::{FirmwareImage, ImageMetadata, IslRevision, ProgramRecord, Vendor};
use crate::parser::{ImageFormat, ImageParser, text_lines};

const SUBCMD_DEVICE_ID: u8 = 0xAD;
const SUBCMD_REVISION: u8 = 0xAE;

/// Parser for ISL hex exports.
#[derive(Debug, Clone, Copy, Default)]
pub struct IslParser;

#[derive(Debug, Default)]
struct Pending {
    address: u8,
    device_id: Option<Vec<u8>>,
    revision: Option<IslRevision>,
    records: Vec<ProgramRecord>,
}

impl Pending {
    fn finish(self, raw: &[u8]) -> ImageResult<FirmwareImage> {
        if self.address == 0 {
            return Err(ImageError::MissingField("slave address"));
        }
        let device_id = self.device_id.ok_or(ImageError::MissingField("device id"))?;
        if self.records.is_empty() {
            return Err(ImageError::MissingField("program records"));
        }
        Ok(FirmwareImage::builder(Vendor::Isl, raw)
            .address(self.address)
            .device_id(device_id)
            .records(self.records)
            .metadata(ImageMetadata::Isl {
                revision: self.revision,
            })
            .build())
    }
}

fn parse_record(
    line: &str,
    line_no: usize,
    index: usize,
    expected_addr: u8,
) -> ImageResult<ProgramRecord> {
    let count = hex_byte_at(line, 2, line_no)?;
    let addr = hex_byte_at(line, 4, line_no)?;
    if addr != expected_addr {
        return Err(ImageError::syntax(
            line_no,
            format!("record address {addr:#04x} does not match device {expected_addr:#04x}"),
        ));
    }
    if count < 3 {
        return Err(ImageError::syntax(line_no, format!("record count {count} too small")));
    }

    // address, command, payload
    let mut data = Vec::with_capacity(usize::from(count));
    data.push(addr);
    let data_end = usize::from(count) * 2;
    for pos in (6..=data_end).step_by(2) {
        data.push(hex_byte_at(line, pos, line_no)?);
    }
    let declared = hex_byte_at(line, data_end + 2, line_no)?;
    let computed = crc8(&data, 0);
    if declared != computed {
        return Err(ImageError::RecordChecksum {
            line: line_no,
            expected: declared,
            actual: computed,
        });
    }

    match data.as_slice() {
        [_, command, payload @ ..] => Ok(ProgramRecord::new(index, *command, payload.to_vec())),
        _ => Err(ImageError::syntax(line_no, "record without command byte")),
    }
}

impl IslParser {
    fn parse_devices(bytes: &[u8]) -> ImageResult<Vec<FirmwareImage>> {
        let mut done = Vec::new();
        let mut current = Pending::default();

        for (line_no, line) in text_lines(bytes)? {
            if line.starts_with("49") {
                match hex_byte_at(line, 6, line_no)? {
                    SUBCMD_DEVICE_ID => {
                        if current.address != 0 {
                            done.push(core::mem::take(&mut current).finish(bytes)?);
                        }
                        current.address = hex_byte_at(line, 4, line_no)?;
                        current.device_id = Some(
                            [14, 12, 10, 8]
                                .into_iter()
                                .map(|pos| hex_byte_at(line, pos, line_no))
                                .collect::<ImageResult<Vec<u8>>>()?,
                        );
                        debug!(line = line_no, addr = current.address, "ISL device block");
                    }
                    SUBCMD_REVISION => {
                        let raw = hex_byte_at(line, 8, line_no)?;
                        current.revision = Some(IslRevision::from_raw(raw));
                    }
                    _ => {}
                }
            } else if line.starts_with("00") {
                let index = current.records.len();
                let record = parse_record(line, line_no, index, current.address)?;
                current.records.push(record);
            }
        }

        done.push(current.finish(bytes)?);
        Ok(done)
    }
}

impl ImageParser for IslParser {
    fn format(&self) -> ImageFormat {
        ImageFormat::Isl
    }

    fn parse(&self, bytes: &[u8]) -> ImageResult<FirmwareImage> {
        let mut images = Self::parse_devices(bytes)?;
        if images.len() != 1 {
            return Err(ImageError::unsupported(format!(
                "file describes {} regulators, expected one",
                images.len()
            )));
        }
        images
            .pop()
            .ok_or(ImageError::MissingField("device id"))
    }

    fn parse_all(&self, bytes: &[u8]) -> ImageResult<Vec<FirmwareImage>> {
        Self::parse_devices(bytes)
    }
}
