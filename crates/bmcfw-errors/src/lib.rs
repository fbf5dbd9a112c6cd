//! Error taxonomy for the BMC firmware update engine
//!
//! Every failure an update can hit is classified here so the coordinator can
//! decide, in one place, whether an operation may be retried or must abort the
//! session immediately.
//!
//! # Architecture
//!
//! - [`common`]: Top-level [`UpdateError`] plus category and severity classification
//! - [`transport`]: Bus and relay failures, the only retryable kind
//! - [`image`]: Structured parse and validation failures for firmware images
//!
//! # Retry policy
//!
//! Only [`TransportError`]s for which [`TransportError::is_retryable`] returns
//! `true` are retried. Checksum mismatches, wear exhaustion, lease conflicts and
//! recovery timeouts always abort.
//!
//! # Example
//!
//! ```
//! use bmcfw_errors::prelude::*;
//!
//! fn check_remaining(device: &str, remaining: u32) -> Result<()> {
//!     if remaining == 0 {
//!         return Err(UpdateError::remaining_writes_exhausted(device));
//!     }
//!     Ok(())
//! }
//!
//! let err = check_remaining("vr@0xc0", 0).unwrap_err();
//! assert!(!err.is_retryable());
//! assert_eq!(err.category(), ErrorCategory::Wear);
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod common;
pub mod image;
pub mod prelude;
pub mod transport;

pub use common::{ErrorCategory, ErrorSeverity, UpdateError};
pub use image::ImageError;
pub use transport::TransportError;

/// A specialized `Result` type for firmware update operations.
pub type Result<T> = std::result::Result<T, UpdateError>;

/// A specialized `Result` type for image parsing.
pub type ImageResult<T> = std::result::Result<T, ImageError>;
