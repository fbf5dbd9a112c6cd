//! Altera MAX10 raw programming data (`.rpd`).
//!
//! The CFM image is exactly [`RPD_SIZE`] bytes. Signed images carry one extra
//! trailing byte: high nibble component id, low nibble hardware revision.

use bmcfw_checksum::additive_checksum;
use bmcfw_errors::{ImageError, ImageResult};
use serde::Serialize;

use crate::image::{ExpectedChecksum, FirmwareImage, ImageMetadata, Vendor};
use crate::parser::{ImageFormat, ImageParser};

/// Size of an unsigned CFM image.
pub const RPD_SIZE: usize = 0x5C000;
/// Component id of the baseboard CPLD.
pub const COMPONENT_BASEBOARD: u8 = 0x8;
/// Firmware revision built for POC boards.
pub const FW_REV_POC: u8 = 0;
/// First firmware revision built for EVT and later boards.
pub const FW_REV_EVT: u8 = 1;

/// Trailing signature byte of a signed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AlteraSignature {
    /// Component the image was built for
    pub component: u8,
    /// Hardware revision class the image was built for
    pub revision: u8,
}

impl AlteraSignature {
    /// Split a raw signature byte.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            component: byte >> 4,
            revision: byte & 0x0F,
        }
    }

    /// Check that the image may be applied to a board of `class`.
    ///
    /// POC boards only take POC images; anything newer needs EVT or later.
    pub fn is_compatible(&self, class: BoardClass) -> bool {
        match class {
            BoardClass::Poc => self.revision == FW_REV_POC,
            BoardClass::Production => self.revision >= FW_REV_EVT,
        }
    }
}

/// Board revision class reported by the baseboard CPLD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BoardClass {
    /// POC and POC2 boards
    Poc,
    /// EVT and later
    Production,
}

impl BoardClass {
    /// Classify the raw board revision register.
    ///
    /// The register is one-based; 0 and 1 (POC) and 2 (POC2) are all POC.
    pub fn from_register(raw: u8) -> Self {
        if raw.saturating_sub(1) <= 1 {
            BoardClass::Poc
        } else {
            BoardClass::Production
        }
    }
}

/// Parser for MAX10 `.rpd` images.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlteraParser;

impl ImageParser for AlteraParser {
    fn format(&self) -> ImageFormat {
        ImageFormat::Altera
    }

    fn parse(&self, bytes: &[u8]) -> ImageResult<FirmwareImage> {
        let (payload, signature) = match bytes.split_at_checked(RPD_SIZE) {
            Some((payload, [])) => (payload, None),
            Some((payload, [sig])) => (payload, Some(AlteraSignature::from_byte(*sig))),
            _ => {
                return Err(ImageError::invalid_size(
                    bytes.len(),
                    format!("{RPD_SIZE:#x} or {:#x} bytes", RPD_SIZE + 1),
                ));
            }
        };

        Ok(FirmwareImage::builder(Vendor::Altera, bytes)
            .payload(payload.to_vec())
            .expected(ExpectedChecksum::Sum32(additive_checksum(payload)))
            .metadata(ImageMetadata::Altera { signature })
            .build())
    }
}
