//! Bus, relay and USB transfer errors.
//!
//! A `TransportError` means a single request/response exchange did not
//! complete. It says nothing about the firmware image or the device state, so
//! it is the one error kind the engine retries on its own.

use crate::common::ErrorSeverity;

/// IPMI completion code: node busy.
pub const CC_NODE_BUSY: u8 = 0xC0;
/// IPMI completion code: timeout while processing command.
pub const CC_TIMEOUT: u8 = 0xC3;
/// IPMI completion code: command not supported in present state.
pub const CC_NOT_SUPP_IN_CURR_STATE: u8 = 0xD5;
/// IPMI completion code: unspecified error.
pub const CC_UNSPECIFIED: u8 = 0xFF;

/// Failure of one request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No response arrived in time
    #[error("Timeout talking to {target} after {timeout_ms}ms")]
    Timeout {
        /// Route or device description
        target: String,
        /// Elapsed time before giving up
        timeout_ms: u64,
    },

    /// The responder (or a relay hop) returned a nonzero completion code
    #[error("Completion code {code:#04x} for netfn {netfn:#04x} cmd {cmd:#04x}")]
    CompletionCode {
        /// Network function of the failed request
        netfn: u8,
        /// Command of the failed request
        cmd: u8,
        /// IPMI completion code
        code: u8,
    },

    /// Response shorter than the caller needs
    #[error("Short response: expected at least {expected} bytes, got {actual}")]
    ShortResponse {
        /// Minimum length required
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// Request exceeds what the link can carry
    #[error("Request of {len} bytes exceeds link limit of {max}")]
    RequestTooLong {
        /// Request length
        len: usize,
        /// Link maximum
        max: usize,
    },

    /// Low-level bus or device I/O failure
    #[error("Bus I/O error: {0}")]
    Io(String),

    /// The link cannot perform the requested kind of transfer
    #[error("Unsupported transfer: {0}")]
    Unsupported(String),
}

impl TransportError {
    /// Check if repeating the same exchange might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout { .. } | TransportError::Io(_) => true,
            TransportError::CompletionCode { code, .. } => {
                matches!(*code, CC_NODE_BUSY | CC_TIMEOUT | CC_UNSPECIFIED)
            }
            TransportError::ShortResponse { .. }
            | TransportError::RequestTooLong { .. }
            | TransportError::Unsupported(_) => false,
        }
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        if self.is_retryable() {
            ErrorSeverity::Warning
        } else {
            ErrorSeverity::Error
        }
    }

    /// Create a timeout error.
    pub fn timeout(target: impl Into<String>, timeout_ms: u64) -> Self {
        TransportError::Timeout {
            target: target.into(),
            timeout_ms,
        }
    }

    /// Create an I/O error.
    pub fn io(message: impl Into<String>) -> Self {
        TransportError::Io(message.into())
    }

    /// Create a short response error.
    pub fn short(expected: usize, actual: usize) -> Self {
        TransportError::ShortResponse { expected, actual }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}
