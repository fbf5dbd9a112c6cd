//! Host BIOS SPI image. The file is the flash content, written verbatim.

use bmcfw_checksum::sha256;
use bmcfw_errors::{ImageError, ImageResult};

use crate::image::{ExpectedChecksum, FirmwareImage, Vendor};
use crate::parser::{ImageFormat, ImageParser};

/// Largest SPI part supported.
pub const MAX_SIZE: usize = 64 * 1024 * 1024;

/// Parser for BIOS images.
#[derive(Debug, Clone, Copy, Default)]
pub struct BiosParser;

impl ImageParser for BiosParser {
    fn format(&self) -> ImageFormat {
        ImageFormat::Bios
    }

    fn parse(&self, bytes: &[u8]) -> ImageResult<FirmwareImage> {
        if bytes.is_empty() || bytes.len() > MAX_SIZE {
            return Err(ImageError::invalid_size(
                bytes.len(),
                format!("1 to {MAX_SIZE} bytes"),
            ));
        }
        Ok(FirmwareImage::builder(Vendor::Bios, bytes)
            .payload(bytes.to_vec())
            .expected(ExpectedChecksum::Sha256(sha256(bytes)))
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_digest() -> ImageResult<()> {
        let image = BiosParser.parse(b"abc")?;
        assert_eq!(image.payload(), b"abc");
        assert_eq!(
            image.expected_checksum().to_string(),
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        Ok(())
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(
            BiosParser.parse(&[]),
            Err(ImageError::InvalidSize { actual: 0, .. })
        ));
    }
}
