//! Top-level update error and its classification.
//!
//! [`UpdateError`] wraps the transport and image errors and adds the kinds that
//! only the programmers and the coordinator can detect: post-write checksum
//! mismatches, wear exhaustion, lease conflicts and recovery timeouts.

use core::fmt;

use crate::{ImageError, TransportError};

/// Error returned by a firmware update session.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Bus or relay failure that survived the retry policy
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Image could not be parsed or failed its internal checksum
    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    /// Value read back from hardware after writing disagrees with the image
    #[error("Checksum mismatch on {target}: expected {expected}, device reports {actual}")]
    ChecksumMismatch {
        /// Device or block that was checked
        target: String,
        /// Expected value, hex formatted
        expected: String,
        /// Value read from the device, hex formatted
        actual: String,
    },

    /// Target device did not answer or is not present
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Image does not apply to this component
    #[error("Unsupported image: {0}")]
    UnsupportedImage(String),

    /// Device identity or revision disagrees with the image
    #[error("Device mismatch on {device}: image targets {expected}, device reports {actual}")]
    DeviceMismatch {
        /// Device description
        device: String,
        /// Identity declared by the image
        expected: String,
        /// Identity reported by the device
        actual: String,
    },

    /// Wear counter reports zero remaining NVM writes
    #[error("No remaining writes on {device}")]
    RemainingWritesExhausted {
        /// Device description
        device: String,
    },

    /// Wear counter at or below the warning threshold and the update was not forced
    #[error("Only {remaining} remaining writes on {device} (threshold {threshold}), use force to proceed")]
    InsufficientRemainingWrites {
        /// Device description
        device: String,
        /// Writes left
        remaining: u32,
        /// Warning threshold
        threshold: u32,
    },

    /// Device already runs the image and the update was not forced
    #[error("Device {device} already reports checksum {checksum}, use force to reprogram")]
    RedundantUpdate {
        /// Device description
        device: String,
        /// Checksum shared by device and image
        checksum: String,
    },

    /// Device status register reports a programming fault
    #[error("Device {device} reported fault: {status}")]
    DeviceFault {
        /// Device description
        device: String,
        /// Decoded status
        status: String,
    },

    /// A bounded status poll never reached the expected state
    #[error("{operation} did not complete after {attempts} polls")]
    PollTimeout {
        /// Operation being waited on
        operation: String,
        /// Number of polls performed
        attempts: u32,
    },

    /// The PCIe switch never confirmed recovery mode
    #[error("Recovery mode not reached during {phase}")]
    RecoveryModeTimeout {
        /// Recovery phase that timed out
        phase: String,
    },

    /// Another BMC holds the update lease
    #[error("Concurrent update in progress: lease {key} is held")]
    ConcurrentUpdateConflict {
        /// Lease key
        key: String,
    },

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local I/O failure (image source, key-value store)
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl UpdateError {
    /// Get the error category for classification.
    pub fn category(&self) -> ErrorCategory {
        match self {
            UpdateError::Transport(_) => ErrorCategory::Transport,
            UpdateError::Image(e) if e.is_checksum_failure() => ErrorCategory::Checksum,
            UpdateError::Image(_) | UpdateError::UnsupportedImage(_) => ErrorCategory::Image,
            UpdateError::ChecksumMismatch { .. } => ErrorCategory::Checksum,
            UpdateError::DeviceNotFound(_)
            | UpdateError::DeviceMismatch { .. }
            | UpdateError::RedundantUpdate { .. }
            | UpdateError::DeviceFault { .. }
            | UpdateError::PollTimeout { .. } => ErrorCategory::Device,
            UpdateError::RemainingWritesExhausted { .. }
            | UpdateError::InsufficientRemainingWrites { .. } => ErrorCategory::Wear,
            UpdateError::RecoveryModeTimeout { .. } => ErrorCategory::Recovery,
            UpdateError::ConcurrentUpdateConflict { .. } => ErrorCategory::Lease,
            UpdateError::Config(_) => ErrorCategory::Config,
            UpdateError::Io(_) => ErrorCategory::IO,
        }
    }

    /// Get the error severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            UpdateError::Transport(e) => e.severity(),
            UpdateError::Image(e) => e.severity(),
            UpdateError::ChecksumMismatch { .. }
            | UpdateError::RemainingWritesExhausted { .. }
            | UpdateError::RecoveryModeTimeout { .. } => ErrorSeverity::Critical,
            UpdateError::InsufficientRemainingWrites { .. }
            | UpdateError::RedundantUpdate { .. }
            | UpdateError::ConcurrentUpdateConflict { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    /// Check if the engine may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpdateError::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Check if repeating the request with `force` set could get past this error.
    pub fn is_force_overridable(&self) -> bool {
        matches!(
            self,
            UpdateError::DeviceMismatch { .. }
                | UpdateError::InsufficientRemainingWrites { .. }
                | UpdateError::RedundantUpdate { .. }
        )
    }

    /// Create a post-write checksum mismatch for 32-bit checksums.
    pub fn checksum_mismatch(target: impl Into<String>, expected: u32, actual: u32) -> Self {
        UpdateError::ChecksumMismatch {
            target: target.into(),
            expected: format!("{expected:08X}"),
            actual: format!("{actual:08X}"),
        }
    }

    /// Create a device not found error.
    pub fn device_not_found(device: impl Into<String>) -> Self {
        UpdateError::DeviceNotFound(device.into())
    }

    /// Create an unsupported image error.
    pub fn unsupported_image(message: impl Into<String>) -> Self {
        UpdateError::UnsupportedImage(message.into())
    }

    /// Create a remaining writes exhausted error.
    pub fn remaining_writes_exhausted(device: impl Into<String>) -> Self {
        UpdateError::RemainingWritesExhausted {
            device: device.into(),
        }
    }

    /// Create a device fault error.
    pub fn device_fault(device: impl Into<String>, status: impl Into<String>) -> Self {
        UpdateError::DeviceFault {
            device: device.into(),
            status: status.into(),
        }
    }

    /// Create a poll timeout error.
    pub fn poll_timeout(operation: impl Into<String>, attempts: u32) -> Self {
        UpdateError::PollTimeout {
            operation: operation.into(),
            attempts,
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        UpdateError::Config(msg.into())
    }
}

impl From<std::io::Error> for UpdateError {
    fn from(e: std::io::Error) -> Self {
        UpdateError::Io(e)
    }
}

/// Error category for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCategory {
    /// Bus, relay or USB exchange failures
    Transport = 0,
    /// Image or read-back checksum failures
    Checksum = 1,
    /// Image parse and applicability failures
    Image = 2,
    /// Device presence, identity and status failures
    Device = 3,
    /// NVM wear counter failures
    Wear = 4,
    /// PCIe switch recovery failures
    Recovery = 5,
    /// Cross-BMC lease failures
    Lease = 6,
    /// Configuration errors
    Config = 7,
    /// Local I/O errors
    IO = 8,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transport => write!(f, "Transport"),
            ErrorCategory::Checksum => write!(f, "Checksum"),
            ErrorCategory::Image => write!(f, "Image"),
            ErrorCategory::Device => write!(f, "Device"),
            ErrorCategory::Wear => write!(f, "Wear"),
            ErrorCategory::Recovery => write!(f, "Recovery"),
            ErrorCategory::Lease => write!(f, "Lease"),
            ErrorCategory::Config => write!(f, "Config"),
            ErrorCategory::IO => write!(f, "IO"),
        }
    }
}

/// Error severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ErrorSeverity {
    /// Informational, no action required
    Info = 0,
    /// Warning, may succeed on retry or with force
    Warning = 1,
    /// Error, operation failed
    Error = 2,
    /// Critical, hardware may need human intervention
    Critical = 3,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Info => write!(f, "INFO"),
            ErrorSeverity::Warning => write!(f, "WARN"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Transport.to_string(), "Transport");
        assert_eq!(ErrorCategory::Wear.to_string(), "Wear");
        assert_eq!(ErrorCategory::Lease.to_string(), "Lease");
    }

    #[test]
    fn test_error_severity_ordering() {
        assert!(ErrorSeverity::Critical > ErrorSeverity::Error);
        assert!(ErrorSeverity::Error > ErrorSeverity::Warning);
        assert!(ErrorSeverity::Warning > ErrorSeverity::Info);
    }

    #[test]
    fn test_only_transport_is_retryable() {
        let err: UpdateError = TransportError::timeout("slot1", 500).into();
        assert!(err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::Transport);

        let fatal = [
            UpdateError::checksum_mismatch("vr", 1, 2),
            UpdateError::device_not_found("slot3"),
            UpdateError::unsupported_image("not a jed file"),
            UpdateError::remaining_writes_exhausted("vr@0xc0"),
            UpdateError::RecoveryModeTimeout {
                phase: "EnteringRecovery".into(),
            },
            UpdateError::ConcurrentUpdateConflict {
                key: "fru1_fwupd".into(),
            },
        ];
        for err in &fatal {
            assert!(!err.is_retryable(), "{err} must not be retryable");
        }
    }

    #[test]
    fn test_image_checksum_categorized_as_checksum() {
        let err: UpdateError = ImageError::ChecksumMismatch {
            expected: 0xAABB,
            actual: 0xAABC,
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Checksum);
        assert_eq!(err.severity(), ErrorSeverity::Critical);

        let err: UpdateError = ImageError::MissingField("Checksum").into();
        assert_eq!(err.category(), ErrorCategory::Image);
    }

    #[test]
    fn test_force_overridable() {
        let err = UpdateError::InsufficientRemainingWrites {
            device: "vr".into(),
            remaining: 2,
            threshold: 3,
        };
        assert!(err.is_force_overridable());
        assert!(!UpdateError::remaining_writes_exhausted("vr").is_force_overridable());
    }

    #[test]
    fn test_checksum_mismatch_formats_hex() {
        let err = UpdateError::checksum_mismatch("vr@0x60", 0x1556_F485, 0xDEAD_BEEF);
        let msg = err.to_string();
        assert!(msg.contains("1556F485"));
        assert!(msg.contains("DEADBEEF"));
    }

    #[test]
    fn test_update_error_is_std_error() {
        let err = UpdateError::config("bad ttl");
        let _: &dyn std::error::Error = &err;
    }
}
