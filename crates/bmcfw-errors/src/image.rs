//! Firmware image parse and validation errors.
//!
//! Parsers never return partial images: any of these aborts the parse and
//! nothing is sent to hardware.

use crate::common::ErrorSeverity;

/// Image parsing and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// Reading the image source failed
    #[error("I/O error reading image: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed line in a text format
    #[error("Syntax error on line {line}: {message}")]
    Syntax {
        /// 1-based line number
        line: usize,
        /// What was wrong
        message: String,
    },

    /// A read ran past the end of the buffer
    #[error("Truncated image at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        /// Offset of the failed read
        offset: usize,
        /// Bytes requested
        needed: usize,
        /// Bytes left
        available: usize,
    },

    /// Whole-image checksum recomputed from the content disagrees with the declared one
    #[error("Image checksum mismatch: declared {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch {
        /// Declared checksum
        expected: u32,
        /// Recomputed checksum
        actual: u32,
    },

    /// Per-record CRC disagrees with the trailing byte
    #[error("Record checksum mismatch on line {line}: declared {expected:#04x}, computed {actual:#04x}")]
    RecordChecksum {
        /// 1-based line number
        line: usize,
        /// Declared CRC8
        expected: u8,
        /// Recomputed CRC8
        actual: u8,
    },

    /// Magic signature missing where a sub-image should start
    #[error("Bad magic signature at offset {offset:#x}")]
    BadMagic {
        /// Offset of the expected signature
        offset: usize,
    },

    /// File size does not match any size the format allows
    #[error("Invalid image size {actual}: expected {expected}")]
    InvalidSize {
        /// Actual size in bytes
        actual: usize,
        /// Human-readable description of the allowed sizes
        expected: String,
    },

    /// A required header field never appeared
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// More content than the format or device can hold
    #[error("Image content too large: {actual} exceeds limit {limit}")]
    TooLarge {
        /// Limit
        limit: usize,
        /// Actual count
        actual: usize,
    },

    /// Format or variant not handled
    #[error("Unsupported image: {0}")]
    Unsupported(String),
}

impl ImageError {
    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ImageError::ChecksumMismatch { .. } | ImageError::RecordChecksum { .. } => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::Error,
        }
    }

    /// Check if this error came from integrity validation rather than syntax.
    pub fn is_checksum_failure(&self) -> bool {
        matches!(
            self,
            ImageError::ChecksumMismatch { .. } | ImageError::RecordChecksum { .. }
        )
    }

    /// Create a syntax error.
    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        ImageError::Syntax {
            line,
            message: message.into(),
        }
    }

    /// Create an unsupported image error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        ImageError::Unsupported(message.into())
    }

    /// Create an invalid size error.
    pub fn invalid_size(actual: usize, expected: impl Into<String>) -> Self {
        ImageError::InvalidSize {
            actual,
            expected: expected.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_failures_are_critical() {
        let err = ImageError::ChecksumMismatch {
            expected: 1,
            actual: 2,
        };
        assert!(err.is_checksum_failure());
        assert_eq!(err.severity(), ErrorSeverity::Critical);

        let err = ImageError::RecordChecksum {
            line: 4,
            expected: 0x10,
            actual: 0x11,
        };
        assert!(err.is_checksum_failure());
    }

    #[test]
    fn test_syntax_is_not_checksum_failure() {
        let err = ImageError::syntax(12, "odd number of hex digits");
        assert!(!err.is_checksum_failure());
        assert_eq!(err.severity(), ErrorSeverity::Error);
        assert!(err.to_string().contains("line 12"));
    }
}
