//! Convenience re-exports for common test utilities.
//!
//! ```rust,ignore
//! use bmcfw_test_helpers::prelude::*;
//! ```

pub use crate::must::{must, must_err, must_some, must_with};

#[cfg(feature = "fixtures")]
pub use crate::fixtures::{
    IslHex, JedFile, MicFile, PxeDump, TiCsv, altera_rpd, bios_image, pcie_blob, pcie_sub_image,
};

#[cfg(feature = "mock")]
pub use crate::mock::{I2cRequest, ManualClock, MockTransport, Reply, Request};

/// Result type for tests that use `?`.
pub type TestResult = Result<(), Box<dyn std::error::Error>>;
