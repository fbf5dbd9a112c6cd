//! Property-based tests for error classification.

use bmcfw_errors::{
    common::{ErrorCategory, ErrorSeverity, UpdateError},
    transport::TransportError,
};
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_error_severity_ordering(a in 0u8..=3, b in 0u8..=3) {
        let sev = |v: u8| match v {
            0 => ErrorSeverity::Info,
            1 => ErrorSeverity::Warning,
            2 => ErrorSeverity::Error,
            _ => ErrorSeverity::Critical,
        };
        prop_assert_eq!(a.cmp(&b), sev(a).cmp(&sev(b)));
    }

    #[test]
    fn test_retryable_transport_stays_retryable_when_wrapped(
        netfn in any::<u8>(),
        cmd in any::<u8>(),
        code in any::<u8>(),
    ) {
        let inner = TransportError::CompletionCode { netfn, cmd, code };
        let expected = inner.is_retryable();
        let err: UpdateError = inner.into();
        prop_assert_eq!(err.is_retryable(), expected);
        prop_assert_eq!(err.category(), ErrorCategory::Transport);
    }

    #[test]
    fn test_checksum_mismatch_never_retryable(expected in any::<u32>(), actual in any::<u32>()) {
        let err = UpdateError::checksum_mismatch("vr", expected, actual);
        prop_assert!(!err.is_retryable());
        prop_assert_eq!(err.severity(), ErrorSeverity::Critical);
        let expected_hex = format!("{expected:08X}");
        prop_assert!(err.to_string().contains(&expected_hex));
    }

    #[test]
    fn test_lease_conflict_message_contains_key(slot in 1u8..=8) {
        let key = format!("fru{slot}_fwupd");
        let err = UpdateError::ConcurrentUpdateConflict { key: key.clone() };
        prop_assert!(err.to_string().contains(&key));
        prop_assert_eq!(err.category(), ErrorCategory::Lease);
    }
}
