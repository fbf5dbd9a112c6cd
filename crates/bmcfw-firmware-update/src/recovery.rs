//! PCIe switch recovery sequence.
//!
//! A bundle that carries a recovery bootloader cannot be written to a
//! running switch. The orchestrator pulls the switch's recovery-select line
//! low, power cycles the host so the switch boots its recovery loader,
//! streams every sub-image, activates them and power cycles again. The
//! second-stage bootloader is then written once more from the running
//! firmware and activated by a last power cycle.
//!
//! Bundles without a recovery bootloader skip all of that: the sub-images
//! are streamed and activated in place.
//!
//! The recovery-select line is held by [`RecoverySelect`], which drives it
//! back high when dropped, so the switch is never left strapped into
//! recovery when a step fails.

use core::ops::{Deref, DerefMut};
use std::time::Duration;

use bmcfw_errors::{Result, UpdateError};
use bmcfw_image::{FirmwareImage, PcieBundle, SubImageKind};
use bmcfw_transport::ipmi::{
    CHASSIS_POWER_CYCLE, CMD_CHASSIS_CONTROL, CMD_OEM_1S_GET_DEVICE_LIST,
    CMD_OEM_1S_GET_SET_GPIO, CMD_OEM_1S_PCIE_SWITCH_CTRL, NETFN_CHASSIS,
};
use tracing::{debug, info, warn};

use crate::context::ProgramContext;
use crate::lease::KvStore;
use crate::monitor::MonitorGuard;
use crate::programmer::{PcieProgrammer, Programmer};
use crate::state::RecoveryPhase;

/// GPIO that straps the switch into its recovery loader when low.
pub const RECOVERY_SELECT_GPIO: u8 = 19;
/// Address the switch answers on while in recovery.
pub const RECOVERY_DEVICE_ADDR: u8 = 0xB0;
/// Boot phase the switch's status register reports while its recovery
/// loader runs.
pub const RECOVERY_LOADER_PHASE: u8 = 0x01;

const GPIO_SET: u8 = 0x01;
const DEVICE_LIST_BUS: u8 = 0x09;

const MUX_BUS: u8 = 0x13;
const MUX_ADDR: u8 = 0xE2;
const MUX_SELECT_SWITCH: [u8; 2] = [0x00, 0x02];

const TOGGLE_NORMAL: u8 = 0x03;
const TOGGLE_RECOVERY: u8 = 0x06;

const RECOVERY_SETTLE: Duration = Duration::from_secs(6);
const STATUS_SETTLE: Duration = Duration::from_secs(1);

/// Key the host firmware sets to `1` once the server has booted.
pub fn host_ready_key(slot: u8) -> String {
    format!("fru{slot}_host_ready")
}

fn set_recovery_select(ctx: &mut ProgramContext<'_, '_>, low: bool) -> Result<()> {
    let level = u8::from(!low);
    ctx.channel().oem(
        CMD_OEM_1S_GET_SET_GPIO,
        &[GPIO_SET, RECOVERY_SELECT_GPIO, level],
    )?;
    debug!(level, "recovery select driven");
    Ok(())
}

/// Context with the switch's recovery-select line held low.
pub struct RecoverySelect<'g, 's, 'a> {
    ctx: &'g mut ProgramContext<'s, 'a>,
    released: bool,
}

impl<'g, 's, 'a> RecoverySelect<'g, 's, 'a> {
    /// Drive the line low.
    ///
    /// # Errors
    ///
    /// Transport failure of the GPIO request.
    pub fn assert(ctx: &'g mut ProgramContext<'s, 'a>) -> Result<Self> {
        set_recovery_select(ctx, true)?;
        info!("recovery select asserted");
        Ok(Self {
            ctx,
            released: false,
        })
    }

    /// Drive the line high again and report failures.
    ///
    /// # Errors
    ///
    /// Transport failure of the GPIO request.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        set_recovery_select(self.ctx, false)?;
        info!("recovery select released");
        Ok(())
    }
}

impl<'s, 'a> Deref for RecoverySelect<'_, 's, 'a> {
    type Target = ProgramContext<'s, 'a>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl DerefMut for RecoverySelect<'_, '_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl Drop for RecoverySelect<'_, '_, '_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match set_recovery_select(self.ctx, false) {
            Ok(()) => info!("recovery select released"),
            Err(e) => warn!(error = %e, "failed to release recovery select"),
        }
    }
}

impl core::fmt::Debug for RecoverySelect<'_, '_, '_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RecoverySelect")
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

/// Status register selector of each boot phase.
fn status_selector(kind: SubImageKind, run: bool) -> Option<u8> {
    match kind {
        SubImageKind::Rcvry if run => Some(0x05),
        SubImageKind::Rcvry => Some(0x04),
        SubImageKind::PartMap => Some(0x12),
        SubImageKind::Bl2 => Some(0x11),
        SubImageKind::Cfg => Some(0x15),
        SubImageKind::Main => Some(0x17),
        SubImageKind::InitBl => Some(0x00),
        SubImageKind::KeyMgr => None,
    }
}

/// Activation request marking main, config and bootloader images.
fn toggle_request(mask: u8, recovery: bool) -> [u8; 4] {
    let flag = |kind: SubImageKind| u8::from(mask & kind.bit() != 0);
    [
        if recovery { TOGGLE_RECOVERY } else { TOGGLE_NORMAL },
        flag(SubImageKind::Main),
        flag(SubImageKind::Cfg),
        flag(SubImageKind::Bl2),
    ]
}

/// Drives a PCIe switch bundle onto the device.
pub struct RecoveryOrchestrator<'k> {
    store: &'k dyn KvStore,
    programmer: PcieProgrammer,
}

impl<'k> RecoveryOrchestrator<'k> {
    /// Orchestrator reading host readiness from `store`.
    pub fn new(store: &'k dyn KvStore) -> Self {
        Self {
            store,
            programmer: PcieProgrammer::new(),
        }
    }

    /// Write `bundle`, through the recovery loader when it carries one.
    ///
    /// The session records every phase; on error the last one is
    /// [`RecoveryPhase::Failed`].
    ///
    /// # Errors
    ///
    /// [`UpdateError::UnsupportedImage`] for a recovery bundle without a
    /// second-stage bootloader, [`UpdateError::RecoveryModeTimeout`] when
    /// the switch does not come up in recovery, or any error of the
    /// transfers.
    pub fn run(&self, ctx: &mut ProgramContext<'_, '_>, bundle: &PcieBundle) -> Result<()> {
        if bundle.is_recovery() && bundle.get(SubImageKind::Bl2).is_none() {
            return Err(UpdateError::unsupported_image(
                "recovery bundle without a BOOTLOADER2 image",
            ));
        }
        ctx.enter_phase(RecoveryPhase::Idle);
        let result = if bundle.is_recovery() {
            self.recover(ctx, bundle)
        } else {
            self.update_in_place(ctx, bundle)
        };
        match result {
            Ok(()) => {
                ctx.enter_phase(RecoveryPhase::Done);
                info!(kinds = ?bundle.kinds(), "PCIe switch updated");
                Ok(())
            }
            Err(e) => {
                ctx.enter_phase(RecoveryPhase::Failed);
                Err(e)
            }
        }
    }

    fn update_in_place(&self, ctx: &mut ProgramContext<'_, '_>, bundle: &PcieBundle) -> Result<()> {
        for (kind, image) in bundle.images() {
            self.flash(ctx, kind, image)?;
        }
        self.toggle(ctx, bundle.mask(), false)
    }

    fn recover(&self, ctx: &mut ProgramContext<'_, '_>, bundle: &PcieBundle) -> Result<()> {
        ctx.enter_phase(RecoveryPhase::EnteringRecovery);
        let mut select = RecoverySelect::assert(ctx)?;
        power_cycle(&mut select)?;
        select.sleep(RECOVERY_SETTLE);
        {
            let mut monitor = MonitorGuard::disable_here(&mut select)?;
            self.confirm_recovery(&mut monitor)?;
            for (kind, image) in bundle.images() {
                self.flash(&mut monitor, kind, image)?;
                if kind == SubImageKind::Rcvry {
                    info!("activating recovery bootloader");
                    self.phase_status(&mut monitor, kind, true)?;
                }
                self.phase_status(&mut monitor, kind, false)?;
            }
        }

        self.toggle(&mut select, bundle.mask(), true)?;
        for kind in [SubImageKind::Bl2, SubImageKind::Cfg, SubImageKind::Main] {
            self.phase_status(&mut select, kind, false)?;
        }
        info!("initializing bootloader");
        self.phase_status(&mut select, SubImageKind::InitBl, false)?;
        select.release()?;

        ctx.enter_phase(RecoveryPhase::PowerCycling);
        power_cycle(ctx)?;
        self.wait_host_ready(ctx)?;

        let mut reflash = 0u8;
        for kind in [SubImageKind::KeyMgr, SubImageKind::Bl2] {
            if let Some(image) = bundle.get(kind) {
                self.flash(ctx, kind, image)?;
                reflash |= kind.bit();
            }
        }
        self.toggle(ctx, reflash, false)?;
        ctx.enter_phase(RecoveryPhase::PowerCycling);
        power_cycle(ctx)?;
        self.wait_host_ready(ctx)
    }

    fn flash(
        &self,
        ctx: &mut ProgramContext<'_, '_>,
        kind: SubImageKind,
        image: &FirmwareImage,
    ) -> Result<()> {
        ctx.enter_phase(RecoveryPhase::Flashing(kind));
        self.programmer.program(ctx, image)
    }

    fn toggle(&self, ctx: &mut ProgramContext<'_, '_>, mask: u8, recovery: bool) -> Result<()> {
        ctx.enter_phase(RecoveryPhase::Toggling);
        let req = toggle_request(mask, recovery);
        info!(request = %hex::encode(req), "activating sub-images");
        ctx.channel().oem(CMD_OEM_1S_PCIE_SWITCH_CTRL, &req)?;
        Ok(())
    }

    /// Read the status register of `kind`'s boot phase. Kinds without one
    /// read as empty.
    fn phase_status(
        &self,
        ctx: &mut ProgramContext<'_, '_>,
        kind: SubImageKind,
        run: bool,
    ) -> Result<Vec<u8>> {
        let Some(selector) = status_selector(kind, run) else {
            return Ok(Vec::new());
        };
        ctx.sleep(STATUS_SETTLE);
        let resp = ctx.channel().oem(CMD_OEM_1S_PCIE_SWITCH_CTRL, &[selector])?;
        debug!(%kind, selector, response = %hex::encode(&resp), "phase status");
        Ok(resp)
    }

    /// Route the bridge's bus to the switch and check that it answers as a
    /// recovery loader: present at [`RECOVERY_DEVICE_ADDR`] and reporting
    /// [`RECOVERY_LOADER_PHASE`].
    fn confirm_recovery(&self, ctx: &mut ProgramContext<'_, '_>) -> Result<()> {
        ctx.channel()
            .master_write_read(MUX_BUS, MUX_ADDR, &MUX_SELECT_SWITCH, 0)?;
        let devices = ctx
            .channel()
            .oem(CMD_OEM_1S_GET_DEVICE_LIST, &[DEVICE_LIST_BUS])?;
        if !devices.contains(&RECOVERY_DEVICE_ADDR) {
            warn!(devices = %hex::encode(&devices), "switch not found in recovery");
            return Err(not_in_recovery());
        }
        let status = self
            .phase_status(ctx, SubImageKind::Rcvry, false)
            .map_err(|e| {
                warn!(error = %e, "recovery loader status unavailable");
                not_in_recovery()
            })?;
        if status.first() != Some(&RECOVERY_LOADER_PHASE) {
            warn!(status = %hex::encode(&status), "switch bootloader not in recovery phase");
            return Err(not_in_recovery());
        }
        info!("PCIe switch running in recovery mode");
        Ok(())
    }

    /// Wait for the host to report ready. A host that never does is logged
    /// and the sequence carries on.
    fn wait_host_ready(&self, ctx: &mut ProgramContext<'_, '_>) -> Result<()> {
        ctx.enter_phase(RecoveryPhase::WaitingHostReady);
        let key = host_ready_key(ctx.route().slot_id());
        let polls = ctx.config().host_ready_polls;
        let interval = ctx.config().host_ready_interval;
        for _ in 0..polls {
            if self.store.get(&key)?.is_some_and(|v| v.trim() == "1") {
                debug!(key = %key, "host ready");
                return Ok(());
            }
            ctx.keepalive()?;
            ctx.sleep(interval);
        }
        warn!(key = %key, polls, "host not ready, proceeding");
        Ok(())
    }
}

impl core::fmt::Debug for RecoveryOrchestrator<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RecoveryOrchestrator")
            .field("programmer", &self.programmer)
            .finish_non_exhaustive()
    }
}

fn not_in_recovery() -> UpdateError {
    UpdateError::RecoveryModeTimeout {
        phase: RecoveryPhase::EnteringRecovery.to_string(),
    }
}

fn power_cycle(ctx: &mut ProgramContext<'_, '_>) -> Result<()> {
    info!("power cycling the host");
    ctx.server()
        .raw(NETFN_CHASSIS, CMD_CHASSIS_CONTROL, &[CHASSIS_POWER_CYCLE])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use bmcfw_test_helpers::prelude::*;
    use bmcfw_transport::ipmi::{
        CMD_OEM_1S_ENABLE_SENSOR_MONITOR, CMD_OEM_1S_GET_PCIE_SWITCH_STATUS, NETFN_OEM_1S, intf,
    };
    use bmcfw_transport::{Channel, Hop, Link, RetryPolicy, Route};
    use tracing_test::traced_test;

    use super::*;
    use crate::config::UpdateConfig;
    use crate::lease::InMemoryKvStore;
    use crate::progress::NoProgress;
    use crate::state::UpdateSession;

    fn bundle(dir: &Path, files: &[(&str, u8)]) -> Result<PcieBundle> {
        for (name, raw_type) in files {
            std::fs::write(dir.join(name), pcie_sub_image(*raw_type, 1500))?;
        }
        Ok(PcieBundle::from_dir(dir)?)
    }

    fn full_bundle(dir: &Path) -> Result<PcieBundle> {
        bundle(
            dir,
            &[("bl2_rcvry.img", 2), ("bl2.img", 2), ("cfg.img", 3), ("main.img", 4)],
        )
    }

    /// Switch listing `devices` on its bus and answering phase reads with
    /// `phase`.
    fn switch_with_phase(devices: &'static [u8], phase: &'static [u8]) -> MockTransport {
        MockTransport::with_handler(move |req: &Request| {
            if req.is_oem(CMD_OEM_1S_GET_PCIE_SWITCH_STATUS) {
                Reply::oem(&[0x01, 0x02])
            } else if req.is_oem(CMD_OEM_1S_GET_DEVICE_LIST) {
                Reply::oem(devices)
            } else if req.is_oem(CMD_OEM_1S_PCIE_SWITCH_CTRL) {
                Reply::oem(phase)
            } else {
                Reply::empty_for(req)
            }
        })
    }

    fn switch(devices: &'static [u8]) -> MockTransport {
        switch_with_phase(devices, &[RECOVERY_LOADER_PHASE])
    }

    fn run(
        mock: &MockTransport,
        store: &InMemoryKvStore,
        bundle: &PcieBundle,
    ) -> (Result<()>, UpdateSession) {
        let mut transport = mock.clone();
        let clock = ManualClock::new();
        let config = UpdateConfig::default();
        let mut session = UpdateSession::new("2ou_pesw");
        let mut sink = NoProgress;
        let route = Route::slot(1).via(Hop::new(intf::REXP_BIC)).with_link(Link::Usb);
        let channel = Channel::new(&mut transport, &clock, route, RetryPolicy::none());
        let mut ctx = ProgramContext::new(channel, &config, &mut session, &mut sink);
        let result = RecoveryOrchestrator::new(store).run(&mut ctx, bundle);
        (result, session)
    }

    fn gpio_levels(mock: &MockTransport) -> Vec<u8> {
        mock.requests_for(NETFN_OEM_1S, CMD_OEM_1S_GET_SET_GPIO)
            .iter()
            .filter_map(|r| r.oem_body().and_then(|b| b.get(2).copied()))
            .collect()
    }

    fn toggles(mock: &MockTransport) -> Vec<Vec<u8>> {
        mock.requests_for(NETFN_OEM_1S, CMD_OEM_1S_PCIE_SWITCH_CTRL)
            .iter()
            .filter_map(|r| r.oem_body().map(<[u8]>::to_vec))
            .filter(|b| b.len() == 4)
            .collect()
    }

    #[test]
    fn test_recovery_visits_every_phase() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bundle = full_bundle(dir.path())?;
        let store = InMemoryKvStore::new();
        store.set(&host_ready_key(1), "1", None)?;
        let mock = switch(&[0x01, 0xB0]);

        let (result, session) = run(&mock, &store, &bundle);
        result?;

        assert_eq!(
            session.phases,
            vec![
                RecoveryPhase::Idle,
                RecoveryPhase::EnteringRecovery,
                RecoveryPhase::Flashing(SubImageKind::Rcvry),
                RecoveryPhase::Flashing(SubImageKind::Bl2),
                RecoveryPhase::Flashing(SubImageKind::Cfg),
                RecoveryPhase::Flashing(SubImageKind::Main),
                RecoveryPhase::Toggling,
                RecoveryPhase::PowerCycling,
                RecoveryPhase::WaitingHostReady,
                RecoveryPhase::Flashing(SubImageKind::Bl2),
                RecoveryPhase::Toggling,
                RecoveryPhase::PowerCycling,
                RecoveryPhase::WaitingHostReady,
                RecoveryPhase::Done,
            ]
        );
        assert_eq!(gpio_levels(&mock), vec![0, 1]);
        assert_eq!(mock.count(NETFN_CHASSIS, CMD_CHASSIS_CONTROL), 3);
        assert_eq!(
            toggles(&mock),
            vec![vec![0x06, 1, 1, 1], vec![0x03, 0, 0, 1]]
        );
        // monitoring is off for the recovery transfers only
        let monitor: Vec<_> = mock
            .requests_for(NETFN_OEM_1S, CMD_OEM_1S_ENABLE_SENSOR_MONITOR)
            .iter()
            .filter_map(|r| r.oem_body().map(<[u8]>::to_vec))
            .collect();
        assert_eq!(monitor, vec![vec![0], vec![1]]);
        Ok(())
    }

    #[test]
    fn test_in_place_update_skips_recovery() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bundle = bundle(dir.path(), &[("main.img", 4)])?;
        let store = InMemoryKvStore::new();
        let mock = switch(&[]);

        let (result, session) = run(&mock, &store, &bundle);
        result?;

        assert_eq!(
            session.phases,
            vec![
                RecoveryPhase::Idle,
                RecoveryPhase::Flashing(SubImageKind::Main),
                RecoveryPhase::Toggling,
                RecoveryPhase::Done,
            ]
        );
        assert!(gpio_levels(&mock).is_empty());
        assert_eq!(mock.count(NETFN_CHASSIS, CMD_CHASSIS_CONTROL), 0);
        assert_eq!(toggles(&mock), vec![vec![0x03, 1, 0, 0]]);
        Ok(())
    }

    #[test]
    fn test_switch_missing_releases_select() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bundle = full_bundle(dir.path())?;
        let store = InMemoryKvStore::new();
        let mock = switch(&[0x01, 0x02]);

        let (result, session) = run(&mock, &store, &bundle);
        assert!(matches!(result, Err(UpdateError::RecoveryModeTimeout { .. })));
        assert_eq!(session.phase(), RecoveryPhase::Failed);
        assert_eq!(gpio_levels(&mock), vec![0, 1]);
        assert!(mock.bulk_packets().is_empty());
        Ok(())
    }

    #[test]
    fn test_wrong_boot_phase_releases_select() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bundle = full_bundle(dir.path())?;
        let store = InMemoryKvStore::new();

        let replies: [&'static [u8]; 2] = [&[0x02], &[]];
        for reply in replies {
            let mock = switch_with_phase(&[0xB0], reply);
            let (result, session) = run(&mock, &store, &bundle);
            assert!(
                matches!(
                    result,
                    Err(UpdateError::RecoveryModeTimeout { ref phase })
                        if phase == "entering recovery"
                ),
                "{result:?}"
            );
            assert_eq!(session.phase(), RecoveryPhase::Failed);
            assert!(!session.phases.contains(&RecoveryPhase::Flashing(SubImageKind::Rcvry)));
            assert_eq!(gpio_levels(&mock), vec![0, 1]);
            assert!(mock.bulk_packets().is_empty());
        }
        Ok(())
    }

    #[test]
    fn test_failed_download_releases_select() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bundle = full_bundle(dir.path())?;
        let store = InMemoryKvStore::new();
        let mock = MockTransport::with_handler(|req: &Request| {
            if req.is_oem(CMD_OEM_1S_GET_PCIE_SWITCH_STATUS) {
                Reply::oem(&[0x04, 0x00])
            } else if req.is_oem(CMD_OEM_1S_GET_DEVICE_LIST) {
                Reply::oem(&[0xB0])
            } else if req.is_oem(CMD_OEM_1S_PCIE_SWITCH_CTRL) {
                Reply::oem(&[RECOVERY_LOADER_PHASE])
            } else {
                Reply::empty_for(req)
            }
        });

        let (result, session) = run(&mock, &store, &bundle);
        assert!(matches!(result, Err(UpdateError::DeviceFault { .. })));
        assert_eq!(
            session.phases.get(session.phases.len().saturating_sub(2)),
            Some(&RecoveryPhase::Flashing(SubImageKind::Rcvry))
        );
        assert_eq!(gpio_levels(&mock), vec![0, 1]);
        Ok(())
    }

    #[test]
    #[traced_test]
    fn test_host_not_ready_proceeds() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bundle = full_bundle(dir.path())?;
        let store = InMemoryKvStore::new();
        let mock = switch(&[0xB0]);

        let (result, session) = run(&mock, &store, &bundle);
        result?;
        assert_eq!(session.phase(), RecoveryPhase::Done);
        assert!(logs_contain("host not ready, proceeding"));
        Ok(())
    }

    #[test]
    fn test_recovery_bundle_needs_bootloader() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bundle = bundle(dir.path(), &[("bl2_rcvry.img", 2), ("main.img", 4)])?;
        let store = InMemoryKvStore::new();
        let mock = switch(&[0xB0]);

        let (result, session) = run(&mock, &store, &bundle);
        assert!(matches!(result, Err(UpdateError::UnsupportedImage(_))));
        assert!(session.phases.is_empty());
        assert!(mock.requests().is_empty());
        Ok(())
    }

    #[test]
    fn test_toggle_request_flags() {
        let mask = SubImageKind::Main.bit() | SubImageKind::Rcvry.bit();
        assert_eq!(toggle_request(mask, false), [0x03, 1, 0, 0]);
        assert_eq!(toggle_request(0, true), [0x06, 0, 0, 0]);
    }
}
