//! Vendor image parsers.
//!
//! Each parser consumes the complete file and either returns fully validated
//! images or an [`ImageError`]. There are no partial results.

pub mod altera;
pub mod bios;
pub mod ifx;
pub mod isl;
pub mod lattice;
pub mod pcie;
pub mod pxe;
pub mod ti;

use core::fmt;
use core::str::FromStr;
use std::path::Path;

use bmcfw_errors::{ImageError, ImageResult};
use serde::{Deserialize, Serialize};

use crate::image::FirmwareImage;

pub use altera::AlteraParser;
pub use bios::BiosParser;
pub use ifx::IfxParser;
pub use isl::IslParser;
pub use lattice::LatticeParser;
pub use pcie::PcieParser;
pub use pxe::PxeParser;
pub use ti::TiParser;

/// Parser for one image format.
pub trait ImageParser {
    /// Format handled by this parser.
    fn format(&self) -> ImageFormat;

    /// Parse a file holding exactly one image.
    ///
    /// # Errors
    ///
    /// Any [`ImageError`] raised while decoding or validating the image.
    fn parse(&self, bytes: &[u8]) -> ImageResult<FirmwareImage>;

    /// Parse a file that may hold several images.
    ///
    /// # Errors
    ///
    /// As [`ImageParser::parse`].
    fn parse_all(&self, bytes: &[u8]) -> ImageResult<Vec<FirmwareImage>> {
        self.parse(bytes).map(|image| vec![image])
    }

    /// Read and parse `path`.
    ///
    /// # Errors
    ///
    /// [`ImageError::Io`] if the file cannot be read, otherwise as
    /// [`ImageParser::parse_all`].
    fn parse_file(&self, path: &Path) -> ImageResult<Vec<FirmwareImage>> {
        let bytes = std::fs::read(path)?;
        self.parse_all(&bytes)
    }
}

/// Supported image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// ISL hex export
    Isl,
    /// PXE E1110C register dump
    Pxe,
    /// TI CSV export
    Ti,
    /// Infineon `.mic`
    Ifx,
    /// Lattice JEDEC `.jed`
    Lattice,
    /// Altera raw `.rpd`
    Altera,
    /// PCIe switch blob or sub-image
    Pcie,
    /// BIOS SPI image
    Bios,
}

impl ImageFormat {
    /// All formats, in display order.
    pub const ALL: [ImageFormat; 8] = [
        ImageFormat::Isl,
        ImageFormat::Pxe,
        ImageFormat::Ti,
        ImageFormat::Ifx,
        ImageFormat::Lattice,
        ImageFormat::Altera,
        ImageFormat::Pcie,
        ImageFormat::Bios,
    ];

    /// Parse one image in this format.
    ///
    /// # Errors
    ///
    /// As [`ImageParser::parse`].
    pub fn parse(self, bytes: &[u8]) -> ImageResult<FirmwareImage> {
        match self {
            ImageFormat::Isl => IslParser.parse(bytes),
            ImageFormat::Pxe => PxeParser.parse(bytes),
            ImageFormat::Ti => TiParser.parse(bytes),
            ImageFormat::Ifx => IfxParser.parse(bytes),
            ImageFormat::Lattice => LatticeParser.parse(bytes),
            ImageFormat::Altera => AlteraParser.parse(bytes),
            ImageFormat::Pcie => PcieParser.parse(bytes),
            ImageFormat::Bios => BiosParser.parse(bytes),
        }
    }

    /// Parse every image in this format.
    ///
    /// # Errors
    ///
    /// As [`ImageParser::parse_all`].
    pub fn parse_all(self, bytes: &[u8]) -> ImageResult<Vec<FirmwareImage>> {
        match self {
            ImageFormat::Isl => IslParser.parse_all(bytes),
            ImageFormat::Pxe => PxeParser.parse_all(bytes),
            ImageFormat::Ti => TiParser.parse_all(bytes),
            ImageFormat::Ifx => IfxParser.parse_all(bytes),
            ImageFormat::Lattice => LatticeParser.parse_all(bytes),
            ImageFormat::Altera => AlteraParser.parse_all(bytes),
            ImageFormat::Pcie => PcieParser.parse_all(bytes),
            ImageFormat::Bios => BiosParser.parse_all(bytes),
        }
    }

    /// Guess the format from a file name and its contents.
    pub fn guess(name: &str, bytes: &[u8]) -> Option<ImageFormat> {
        let lower = name.to_ascii_lowercase();
        let ext = Path::new(&lower)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        match ext {
            "jed" => return Some(ImageFormat::Lattice),
            "rpd" => return Some(ImageFormat::Altera),
            "mic" => return Some(ImageFormat::Ifx),
            "csv" => return Some(ImageFormat::Ti),
            _ => {}
        }
        let head = bytes.get(..bytes.len().min(4096)).unwrap_or_default();
        let text = String::from_utf8_lossy(head);
        if text.contains(pxe::CRC_MARKER) {
            Some(ImageFormat::Pxe)
        } else if ext == "hex" || text.starts_with("49") {
            Some(ImageFormat::Isl)
        } else if bytes.len() == pcie::BLOB_SIZE {
            Some(ImageFormat::Pcie)
        } else {
            None
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageFormat::Isl => "isl",
            ImageFormat::Pxe => "pxe",
            ImageFormat::Ti => "ti",
            ImageFormat::Ifx => "ifx",
            ImageFormat::Lattice => "lattice",
            ImageFormat::Altera => "altera",
            ImageFormat::Pcie => "pcie",
            ImageFormat::Bios => "bios",
        };
        f.write_str(name)
    }
}

impl FromStr for ImageFormat {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageFormat::ALL
            .into_iter()
            .find(|f| f.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ImageError::unsupported(format!("unknown image format {s:?}")))
    }
}

/// Lines of a text image with 1-based line numbers and line endings trimmed.
pub(crate) fn text_lines(bytes: &[u8]) -> ImageResult<impl Iterator<Item = (usize, &str)>> {
    let text = core::str::from_utf8(bytes)
        .map_err(|e| ImageError::syntax(0, format!("image is not text: {e}")))?;
    Ok(text
        .lines()
        .enumerate()
        .map(|(i, line)| (i.saturating_add(1), line.trim_end())))
}
