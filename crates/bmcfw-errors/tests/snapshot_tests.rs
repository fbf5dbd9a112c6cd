//! Snapshot tests for error message formatting.
//!
//! These messages end up in the update log line operators read, so they
//! must stay stable.

use bmcfw_errors::{common::UpdateError, image::ImageError, transport::TransportError};
use insta::assert_snapshot;

mod transport_error_snapshots {
    use super::*;

    #[test]
    fn test_timeout() {
        assert_snapshot!(
            TransportError::timeout("slot1", 2000).to_string(),
            @"Timeout talking to slot1 after 2000ms"
        );
    }

    #[test]
    fn test_completion_code() {
        let err = TransportError::CompletionCode {
            netfn: 0x38,
            cmd: 0x02,
            code: 0xc0,
        };
        assert_snapshot!(err.to_string(), @"Completion code 0xc0 for netfn 0x38 cmd 0x02");
    }

    #[test]
    fn test_short_response() {
        assert_snapshot!(
            TransportError::short(7, 3).to_string(),
            @"Short response: expected at least 7 bytes, got 3"
        );
    }
}

mod image_error_snapshots {
    use super::*;

    #[test]
    fn test_checksum_mismatch() {
        let err = ImageError::ChecksumMismatch {
            expected: 0x1556_f485,
            actual: 0x0000_0001,
        };
        assert_snapshot!(
            err.to_string(),
            @"Image checksum mismatch: declared 0x1556f485, computed 0x00000001"
        );
    }

    #[test]
    fn test_record_checksum() {
        let err = ImageError::RecordChecksum {
            line: 9,
            expected: 0x5a,
            actual: 0xf4,
        };
        assert_snapshot!(
            err.to_string(),
            @"Record checksum mismatch on line 9: declared 0x5a, computed 0xf4"
        );
    }

    #[test]
    fn test_invalid_size() {
        let err = ImageError::invalid_size(12, "0x5c000 or 0x5c001 bytes");
        assert_snapshot!(err.to_string(), @"Invalid image size 12: expected 0x5c000 or 0x5c001 bytes");
    }
}

mod update_error_snapshots {
    use super::*;

    #[test]
    fn test_checksum_mismatch() {
        assert_snapshot!(
            UpdateError::checksum_mismatch("vr@0x60", 0x1556_f485, 0).to_string(),
            @"Checksum mismatch on vr@0x60: expected 1556F485, device reports 00000000"
        );
    }

    #[test]
    fn test_remaining_writes() {
        assert_snapshot!(
            UpdateError::remaining_writes_exhausted("vr@0xc0").to_string(),
            @"No remaining writes on vr@0xc0"
        );
    }

    #[test]
    fn test_lease_conflict() {
        let err = UpdateError::ConcurrentUpdateConflict {
            key: "fru2_fwupd".into(),
        };
        assert_snapshot!(err.to_string(), @"Concurrent update in progress: lease fru2_fwupd is held");
    }

    #[test]
    fn test_wrapped_transport() {
        let err: UpdateError = TransportError::io("arbitration lost").into();
        assert_snapshot!(err.to_string(), @"Transport error: Bus I/O error: arbitration lost");
    }
}
