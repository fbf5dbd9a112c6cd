//! Firmware image parsing for BMC-managed components
//!
//! Every supported vendor format is parsed into the same immutable
//! [`FirmwareImage`]: ordered [`ProgramRecord`]s or a byte payload, the
//! checksum the device must report after programming, and the device
//! identity and slave address the image was built for. Parsers validate the
//! embedded checksums before returning, so an image that parses is safe to
//! hand to a programmer.
//!
//! # Architecture
//!
//! - [`cursor`]: Bounds-checked byte cursor and hex token helpers
//! - [`image`]: [`FirmwareImage`], [`ProgramRecord`], [`Vendor`], [`ExpectedChecksum`]
//! - [`parser`]: One [`ImageParser`] per format, selected through [`ImageFormat`]
//! - [`chunk`]: [`Chunker`] for the wire block sizes
//!
//! # Example
//!
//! ```
//! use bmcfw_image::prelude::*;
//!
//! let image = ImageFormat::Bios.parse(&[0xAA; 100])?;
//! assert_eq!(image.vendor(), Vendor::Bios);
//!
//! let chunks: Vec<_> = Chunker::BIOS.chunks(image.payload()).collect();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].wire_bytes().len(), 64 * 1024);
//! # Ok::<(), bmcfw_errors::ImageError>(())
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod chunk;
pub mod cursor;
pub mod image;
pub mod parser;
pub mod prelude;

pub use bmcfw_errors::{ImageError, ImageResult};
pub use chunk::{Chunk, Chunker};
pub use cursor::ByteCursor;
pub use image::{
    ExpectedChecksum, FirmwareImage, ImageMetadata, ImageSummary, IslRevision, ProgramRecord,
    Vendor,
};
pub use parser::altera::{AlteraSignature, BoardClass};
pub use parser::pcie::{PcieBundle, SubImageKind};
pub use parser::{ImageFormat, ImageParser};
