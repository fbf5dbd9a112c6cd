//! Prelude module for convenient error handling imports.
//!
//! # Example
//!
//! ```
//! use bmcfw_errors::prelude::*;
//!
//! fn parse_addr(line: usize, text: &str) -> ImageResult<u8> {
//!     u8::from_str_radix(text, 16).map_err(|_| ImageError::syntax(line, "bad address"))
//! }
//!
//! assert!(parse_addr(3, "zz").is_err());
//! ```

pub use crate::{
    ImageResult, Result,
    common::{ErrorCategory, ErrorSeverity, UpdateError},
    image::ImageError,
    transport::TransportError,
};
