//! End-to-end update sessions against a scripted bridge.

use std::io;
use std::time::Duration;

use bmcfw_firmware_update::prelude::*;
use bmcfw_firmware_update::programmer::vr::{REG_IC_DEVICE_ID, REG_IC_DEVICE_REV};
use bmcfw_firmware_update::programmer::{TI_NVM_WRITE_BUDGET, ti_remaining_writes_key};
use bmcfw_firmware_update::recovery::RECOVERY_LOADER_PHASE;
use bmcfw_test_helpers::prelude::*;
use bmcfw_transport::ipmi::{
    CMD_CHASSIS_CONTROL, CMD_OEM_1S_GET_DEVICE_LIST, CMD_OEM_1S_GET_PCIE_SWITCH_STATUS,
    CMD_OEM_1S_PCIE_SWITCH_CTRL, NETFN_CHASSIS, NETFN_OEM_1S,
};
use parking_lot::Mutex;
use tracing_test::traced_test;

/// ISL regulator that answers the probe, has `slots` NVM writes left and
/// reports programming done on the first poll.
fn isl_regulator(slots: u8) -> MockTransport {
    let mut window = [0u8; 2];
    MockTransport::with_handler(move |req: &Request| {
        let Some(i2c) = req.i2c() else {
            return Reply::empty_for(req);
        };
        match i2c.write {
            [REG_IC_DEVICE_ID] => Reply::Ok(vec![4, 0x11, 0x22, 0x33, 0x44, 0, 0]),
            [REG_IC_DEVICE_REV] => Reply::Ok(vec![0, 0, 0, 0x06]),
            [0xC7, lo, hi] => {
                window = [*lo, *hi];
                Reply::empty()
            }
            [0xC5] if window == [0x35, 0x00] => Reply::Ok(vec![slots, 0, 0, 0]),
            [0xC5] => Reply::Ok(vec![0x01, 0, 0, 0]),
            _ => Reply::empty(),
        }
    })
}

/// TI regulator that answers the probe with `csv`'s id and reports its CRC.
fn ti_regulator(csv: &TiCsv) -> MockTransport {
    let id = csv.device_id;
    let crc = csv.crc();
    MockTransport::with_handler(move |req: &Request| {
        let Some(i2c) = req.i2c() else {
            return Reply::empty_for(req);
        };
        match i2c.write {
            [REG_IC_DEVICE_ID] => {
                let mut resp = vec![6];
                resp.extend_from_slice(&id);
                Reply::Ok(resp)
            }
            [0xF0] => Reply::Ok(crc.to_le_bytes().to_vec()),
            _ => Reply::empty(),
        }
    })
}

fn ti_nvm_writes(mock: &MockTransport) -> usize {
    mock.requests()
        .iter()
        .filter_map(Request::i2c)
        .filter(|i2c| matches!(i2c.write.first(), Some(0xF5 | 0xF6)))
        .count()
}

fn stby1(csv: &TiCsv) -> UpdateRequest {
    UpdateRequest::new(
        Component::Vr(VrRail::ExpStby1),
        ImageSource::bytes("stby1.csv", csv.to_text()),
    )
}

fn record_writes(mock: &MockTransport) -> usize {
    mock.requests()
        .iter()
        .filter_map(Request::i2c)
        .filter(|i2c| i2c.read_len == 0 && !matches!(i2c.write, [0xC7, _, _]))
        .count()
}

fn vccin(hex: &IslHex) -> UpdateRequest {
    UpdateRequest::new(
        Component::Vr(VrRail::Vccin),
        ImageSource::bytes("vccin.hex", hex.to_text()),
    )
}

/// PCIe switch behind the expansion bridge that takes every block at once.
fn pcie_switch() -> MockTransport {
    MockTransport::with_handler(|req: &Request| {
        if req.is_oem(CMD_OEM_1S_GET_PCIE_SWITCH_STATUS) {
            Reply::oem(&[0x01, 0x02])
        } else if req.is_oem(CMD_OEM_1S_GET_DEVICE_LIST) {
            Reply::oem(&[0xB0])
        } else if req.is_oem(CMD_OEM_1S_PCIE_SWITCH_CTRL) {
            Reply::oem(&[RECOVERY_LOADER_PHASE])
        } else {
            Reply::empty_for(req)
        }
    })
}

/// Store that counts writes per key.
#[derive(Default)]
struct CountingStore {
    inner: InMemoryKvStore,
    sets: Mutex<Vec<String>>,
}

impl CountingStore {
    fn sets_of(&self, key: &str) -> usize {
        self.sets.lock().iter().filter(|k| *k == key).count()
    }
}

impl KvStore for CountingStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> io::Result<()> {
        self.sets.lock().push(key.to_string());
        self.inner.set(key, value, ttl)
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        self.inner.delete(key)
    }
}

mod regulator_sessions {
    use super::*;

    #[test]
    fn test_update_succeeds_and_clears_cache() -> Result<()> {
        let store = InMemoryKvStore::new();
        store.set(&vr_crc_key(0xC0), "12345678", None)?;
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let mut transport = isl_regulator(20);

        let session = manager.update(&mut transport, &vccin(&IslHex::new(0xC0)))?;

        assert!(session.succeeded());
        assert_eq!(session.attempts, 0);
        assert_eq!(session.states.first(), Some(&ProgramState::Idle));
        assert_eq!(session.states.last(), Some(&ProgramState::Success));
        assert!(session.phases.is_empty());
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn test_exhausted_part_is_never_written() {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let mock = isl_regulator(0);
        let mut transport = mock.clone();

        let request = vccin(&IslHex::new(0xC0)).with_force(true);
        let err = must_err(manager.update(&mut transport, &request));

        assert!(matches!(err, UpdateError::RemainingWritesExhausted { .. }));
        assert_eq!(record_writes(&mock), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_low_remaining_writes_need_force() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let mock = isl_regulator(2);

        let mut transport = mock.clone();
        let err = must_err(manager.update(&mut transport, &vccin(&IslHex::new(0xC0))));
        assert!(err.is_force_overridable());
        assert_eq!(record_writes(&mock), 0);

        let session = manager.update(&mut transport, &vccin(&IslHex::new(0xC0)).with_force(true))?;
        assert!(session.succeeded());
        Ok(())
    }

    #[test]
    fn test_ti_update_spends_bmc_write_counter() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let csv = TiCsv::new(0x58);
        let mock = ti_regulator(&csv);
        let mut transport = mock.clone();

        let session = manager.update(&mut transport, &stby1(&csv))?;

        assert!(session.succeeded());
        assert_eq!(ti_nvm_writes(&mock), 10);
        assert_eq!(
            store.get(&ti_remaining_writes_key(1, 0xB0))?,
            Some((TI_NVM_WRITE_BUDGET - 1).to_string())
        );
        Ok(())
    }

    #[test]
    fn test_exhausted_ti_part_is_never_written() -> Result<()> {
        let store = InMemoryKvStore::new();
        store.set(&ti_remaining_writes_key(1, 0xB0), "0", None)?;
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let csv = TiCsv::new(0x58);
        let mock = ti_regulator(&csv);
        let mut transport = mock.clone();

        let err = must_err(manager.update(&mut transport, &stby1(&csv).with_force(true)));

        assert!(matches!(err, UpdateError::RemainingWritesExhausted { .. }));
        assert_eq!(ti_nvm_writes(&mock), 0);
        assert_eq!(store.get(&ti_remaining_writes_key(1, 0xB0))?, Some("0".to_string()));
        Ok(())
    }

    #[test]
    fn test_unnamed_ti_file_is_parsed_by_content() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let csv = TiCsv::new(0x58);
        let mock = ti_regulator(&csv);
        let mut transport = mock.clone();

        let request = UpdateRequest::new(
            Component::Vr(VrRail::ExpStby1),
            ImageSource::bytes("stby1.txt", csv.to_text()),
        );
        let session = manager.update(&mut transport, &request)?;

        assert!(session.succeeded());
        assert_eq!(ti_nvm_writes(&mock), 10);
        Ok(())
    }

    #[test]
    fn test_transient_failures_are_retried() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let mock = isl_regulator(20);
        mock.fail_next(2);

        let mut transport = mock.clone();
        let session = manager.update(&mut transport, &vccin(&IslHex::new(0xC0)))?;
        assert!(session.succeeded());
        Ok(())
    }

    #[test]
    fn test_persistent_failure_stops_before_writing() {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let mock = isl_regulator(20);
        mock.fail_next(3);

        let mut transport = mock.clone();
        let err = must_err(manager.update(&mut transport, &vccin(&IslHex::new(0xC0))));

        assert!(matches!(err, UpdateError::Transport(_)));
        assert_eq!(mock.requests().len(), 3);
        assert_eq!(record_writes(&mock), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_long_update_refreshes_lease() -> Result<()> {
        let store = CountingStore::default();
        let clock = ManualClock::new();
        let config =
            UpdateConfig::default().with_lease(Duration::from_secs(2), Duration::from_secs(1));
        let manager = UpdateManager::new(1, &store, &clock).with_config(config)?;

        let mut hex = IslHex::new(0xC0);
        for i in 0..30u8 {
            hex = hex.with_record(0xE7, &[i]);
        }
        let mut transport = isl_regulator(20);
        manager.update(&mut transport, &vccin(&hex))?;

        assert!(store.sets_of("fru1_fwupd") >= 3);
        assert_eq!(store.get("fru1_fwupd")?, None);
        Ok(())
    }
}

mod lease_sessions {
    use super::*;

    #[test]
    fn test_only_one_holder_at_a_time() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let mut transport = isl_regulator(20);

        let peer = LeaseGuard::acquire(
            &store,
            &clock,
            lease_key(1),
            Duration::from_secs(60),
            Duration::from_secs(30),
        )?;
        let err = must_err(manager.update(&mut transport, &vccin(&IslHex::new(0xC0))));
        assert!(matches!(err, UpdateError::ConcurrentUpdateConflict { .. }));

        peer.release()?;
        assert!(manager.update(&mut transport, &vccin(&IslHex::new(0xC0)))?.succeeded());
        Ok(())
    }

    #[test]
    fn test_stale_lease_is_reclaimed() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        store.set(&lease_key(1), "60", None)?;
        clock.advance(Duration::from_secs(61));

        let manager = UpdateManager::new(1, &store, &clock);
        let mut transport = isl_regulator(20);
        assert!(manager.update(&mut transport, &vccin(&IslHex::new(0xC0)))?.succeeded());
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn test_other_slot_is_independent() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        store.set(&lease_key(2), "600", None)?;

        let manager = UpdateManager::new(1, &store, &clock);
        let mut transport = isl_regulator(20);
        assert!(manager.update(&mut transport, &vccin(&IslHex::new(0xC0)))?.succeeded());
        assert_eq!(store.get(&lease_key(2))?, Some("600".to_string()));
        Ok(())
    }
}

mod pcie_sessions {
    use super::*;

    fn pesw(source: ImageSource) -> UpdateRequest {
        UpdateRequest::new(Component::PcieSwitch, source)
    }

    #[test]
    fn test_single_sub_image_updates_in_place() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let mock = pcie_switch();
        let mut transport = mock.clone();

        let source = ImageSource::bytes("main.img", pcie_sub_image(4, 2048));
        let session = manager.update(&mut transport, &pesw(source))?;

        assert_eq!(session.phases.first(), Some(&RecoveryPhase::Idle));
        assert_eq!(session.phases.last(), Some(&RecoveryPhase::Done));
        assert!(!session.phases.contains(&RecoveryPhase::EnteringRecovery));
        assert!(!session.phases.contains(&RecoveryPhase::PowerCycling));
        assert_eq!(mock.bulk_packets().len(), 3);
        assert_eq!(mock.count(NETFN_CHASSIS, CMD_CHASSIS_CONTROL), 0);
        assert_eq!(mock.count(NETFN_OEM_1S, CMD_OEM_1S_PCIE_SWITCH_CTRL), 1);
        let target = must_some(session.target, "target resolved");
        assert_eq!(target.vendor, Vendor::PcieSwitch);
        Ok(())
    }

    #[test]
    fn test_recovery_directory_runs_every_phase_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for (name, raw_type) in [
            ("bl2_rcvry.img", 2),
            ("bl2.img", 2),
            ("cfg.img", 3),
            ("main.img", 4),
        ] {
            std::fs::write(dir.path().join(name), pcie_sub_image(raw_type, 1024))?;
        }
        let store = InMemoryKvStore::new();
        store.set("fru1_host_ready", "1", None)?;
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let mock = pcie_switch();
        let mut transport = mock.clone();

        let session = manager.update(&mut transport, &pesw(ImageSource::path(dir.path())))?;

        let order = [
            RecoveryPhase::Idle,
            RecoveryPhase::EnteringRecovery,
            RecoveryPhase::Toggling,
            RecoveryPhase::PowerCycling,
            RecoveryPhase::WaitingHostReady,
            RecoveryPhase::Done,
        ];
        let mut last = None;
        for phase in &order {
            let position =
                must_some(session.phases.iter().position(|p| p == phase), "phase visited");
            assert!(last.is_none_or(|l| l < position));
            last = Some(position);
        }
        assert!(
            session
                .phases
                .iter()
                .any(|p| matches!(p, RecoveryPhase::Flashing(_)))
        );
        assert_eq!(mock.count(NETFN_CHASSIS, CMD_CHASSIS_CONTROL), 3);
        assert_eq!(store.get("fru1_fwupd")?, None);
        assert_eq!(store.get("fru1_host_ready")?, Some("1".to_string()));
        Ok(())
    }

    #[test]
    #[traced_test]
    fn test_rejected_download_fails_session() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let mut transport = MockTransport::with_handler(|req: &Request| {
            if req.is_oem(CMD_OEM_1S_GET_PCIE_SWITCH_STATUS) {
                Reply::oem(&[0x03, 0x00])
            } else {
                Reply::empty_for(req)
            }
        });

        let source = ImageSource::bytes("cfg.img", pcie_sub_image(3, 1024));
        let mut session = UpdateSession::new("2ou_pcie_switch");
        let result = manager.execute(&mut transport, &pesw(source), &mut NoProgress, &mut session);

        assert!(matches!(result, Err(UpdateError::DeviceFault { .. })));
        assert_eq!(session.phases.last(), Some(&RecoveryPhase::Failed));
        assert!(store.is_empty());
        assert!(logs_contain("Result: Fail"));
        Ok(())
    }
}

mod bios_sessions {
    use super::*;

    #[test]
    fn test_progress_reaches_every_block() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(2, &store, &clock);
        let mut transport = MockTransport::new();

        let mut reports = Vec::new();
        let mut sink = |stage: &str, done: usize, total: usize| {
            reports.push((stage.to_string(), done, total));
        };
        let request = UpdateRequest::new(
            Component::Bios,
            ImageSource::bytes("bios.bin", bios_image(3 * 0x10000 + 1)),
        );
        let mut session = UpdateSession::new("bios");
        manager.execute(&mut transport, &request, &mut sink, &mut session)?;

        let writes: Vec<_> = reports.iter().filter(|(s, _, _)| s == "Writing").collect();
        assert_eq!(writes.len(), 4);
        assert_eq!(writes.last().map(|(_, d, t)| (*d, *t)), Some((4, 4)));
        assert_eq!(session.percent(), 100);
        Ok(())
    }

    #[test]
    fn test_image_from_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bios.bin");
        std::fs::write(&path, bios_image(0x10000))?;

        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let mut transport = MockTransport::new();

        let request = UpdateRequest::new(Component::Bios, path.as_path());
        let session = manager.update(&mut transport, &request)?;
        assert!(session.succeeded());
        assert_eq!(session.total, 1);
        Ok(())
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let mock = MockTransport::new();
        let mut transport = mock.clone();

        let request =
            UpdateRequest::new(Component::Bios, ImageSource::path("/nonexistent/bios.bin"));
        let err = must_err(manager.update(&mut transport, &request));
        assert!(matches!(err, UpdateError::Io(_)));
        assert!(mock.requests().is_empty());
    }
}
