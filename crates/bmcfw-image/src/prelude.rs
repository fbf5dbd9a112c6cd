//! Convenience re-exports for image consumers

pub use crate::chunk::{Chunk, Chunker};
pub use crate::image::{ExpectedChecksum, FirmwareImage, ImageMetadata, ProgramRecord, Vendor};
pub use crate::parser::altera::{AlteraSignature, BoardClass};
pub use crate::parser::pcie::{PcieBundle, SubImageKind};
pub use crate::parser::{ImageFormat, ImageParser};
pub use bmcfw_errors::{ImageError, ImageResult};
