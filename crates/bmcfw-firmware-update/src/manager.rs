//! Update session coordinator.
//!
//! Resolves a [`Component`] to its route, image parser and programmer, takes
//! the cross-BMC lease and runs one session to completion. The image is
//! parsed and validated before the lease is taken, so a bad file never
//! touches hardware. The lease is released on every exit path.

use std::borrow::Cow;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use bmcfw_errors::{Result, UpdateError};
use bmcfw_image::{FirmwareImage, ImageFormat, PcieBundle, Vendor};
use bmcfw_transport::{Channel, Clock, Transport};
use tracing::{debug, error, info, warn};

use crate::component::{Component, VrRail};
use crate::config::UpdateConfig;
use crate::context::ProgramContext;
use crate::lease::{KvStore, LeaseGuard};
use crate::programmer::{
    AlteraProgrammer, BiosProgrammer, DeviceProgrammer, I2cDevice, IfxProgrammer, IslProgrammer,
    LatticeProgrammer, Programmer, PxeProgrammer, TiProgrammer, vr,
};
use crate::progress::{LogProgress, ProgressSink};
use crate::recovery::RecoveryOrchestrator;
use crate::state::{DeviceTarget, Outcome, ProgramState, UpdateSession};

/// Key of the cached checksum of the regulator at `addr`.
pub fn vr_crc_key(addr: u8) -> String {
    format!("vr_{addr:02x}h_crc")
}

/// Where an image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// File, or for the PCIe switch a directory of sub-image files
    Path(PathBuf),
    /// Contents already in memory
    Bytes {
        /// File name, used for format detection and logs
        name: String,
        /// File contents
        bytes: Vec<u8>,
    },
}

impl ImageSource {
    /// Image at `path`.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        ImageSource::Path(path.into())
    }

    /// In-memory image called `name`.
    pub fn bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        ImageSource::Bytes {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Drain `reader`, for images handed over as an open descriptor.
    ///
    /// # Errors
    ///
    /// [`UpdateError::Io`] if the read fails.
    pub fn from_reader(name: impl Into<String>, mut reader: impl Read) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(ImageSource::bytes(name, bytes))
    }

    /// File name without directories.
    pub fn file_name(&self) -> String {
        match self {
            ImageSource::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            ImageSource::Bytes { name, .. } => name.clone(),
        }
    }

    fn load(&self) -> Result<Cow<'_, [u8]>> {
        match self {
            ImageSource::Path(path) => Ok(Cow::Owned(std::fs::read(path)?)),
            ImageSource::Bytes { bytes, .. } => Ok(Cow::Borrowed(bytes)),
        }
    }

    fn bundle(&self) -> Result<PcieBundle> {
        Ok(match self {
            ImageSource::Path(path) => PcieBundle::from_path(path)?,
            ImageSource::Bytes { name, bytes } => PcieBundle::from_bytes(name, bytes)?,
        })
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Path(path) => write!(f, "{}", path.display()),
            ImageSource::Bytes { name, .. } => f.write_str(name),
        }
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        ImageSource::path(path)
    }
}

/// One update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Component to update
    pub component: Component,
    /// Image to write
    pub source: ImageSource,
    /// Override soft checks: identity, revision, remaining-writes warning,
    /// redundant update
    pub force: bool,
}

impl UpdateRequest {
    /// Request without `force`.
    pub fn new(component: Component, source: impl Into<ImageSource>) -> Self {
        Self {
            component,
            source: source.into(),
            force: false,
        }
    }

    /// Set the force flag.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Validated input of a session, ready for the device.
enum Prepared {
    Image(FirmwareImage),
    /// Regulator images per format the file parses as; the probe picks one.
    Vr(Vec<(ImageFormat, Vec<FirmwareImage>)>),
    Bundle(PcieBundle),
}

/// Runs update sessions for the components of one slot.
pub struct UpdateManager<'e> {
    slot: u8,
    config: UpdateConfig,
    store: &'e dyn KvStore,
    clock: &'e dyn Clock,
}

impl<'e> UpdateManager<'e> {
    /// Manager for `slot` with the default configuration.
    pub fn new(slot: u8, store: &'e dyn KvStore, clock: &'e dyn Clock) -> Self {
        Self {
            slot,
            config: UpdateConfig::default(),
            store,
            clock,
        }
    }

    /// Replace the configuration.
    ///
    /// # Errors
    ///
    /// [`UpdateError::Config`] if `config` fails validation.
    pub fn with_config(mut self, config: UpdateConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Slot served.
    pub fn slot(&self) -> u8 {
        self.slot
    }

    /// Active configuration.
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Update one component, logging progress.
    ///
    /// # Errors
    ///
    /// The first error that stopped the session.
    pub fn update(
        &self,
        transport: &mut dyn Transport,
        request: &UpdateRequest,
    ) -> Result<UpdateSession> {
        let mut session = UpdateSession::new(request.component.to_string());
        let mut progress = LogProgress::new();
        self.execute(transport, request, &mut progress, &mut session)?;
        Ok(session)
    }

    /// Run one session into `session`.
    ///
    /// On return the session holds every state and phase visited and its
    /// outcome, whether the update succeeded or not.
    ///
    /// # Errors
    ///
    /// The first error that stopped the session.
    pub fn execute(
        &self,
        transport: &mut dyn Transport,
        request: &UpdateRequest,
        progress: &mut dyn ProgressSink,
        session: &mut UpdateSession,
    ) -> Result<()> {
        let component = request.component;
        let slot = self.slot;
        info!(%component, slot, "Updating {component} on slot{slot}. File: {}", request.source);

        let result = self.run(transport, request, progress, session);
        match &result {
            Ok(()) => {
                session.enter(ProgramState::Success);
                session.outcome = Some(Outcome::Success);
            }
            Err(e) => {
                session.enter(ProgramState::Failed);
                session.outcome = Some(Outcome::Failed { error: e.to_string() });
                error!(%component, slot, error = %e, category = ?e.category(), "update failed");
            }
        }
        let verdict = if result.is_ok() { "Success" } else { "Fail" };
        info!(
            %component,
            slot,
            "Updated {component} on slot{slot}. File: {}. Result: {verdict}",
            request.source
        );
        result
    }

    fn run(
        &self,
        transport: &mut dyn Transport,
        request: &UpdateRequest,
        progress: &mut dyn ProgressSink,
        session: &mut UpdateSession,
    ) -> Result<()> {
        let component = request.component;
        let prepared = prepare(component, &request.source)?;

        let mut lease = LeaseGuard::acquire(
            self.store,
            self.clock,
            component.lease_key(self.slot),
            self.config.lease_ttl,
            self.config.lease_refresh_interval,
        )?;
        session.lease = Some(lease.key().to_string());

        let channel = Channel::new(
            transport,
            self.clock,
            component.route(self.slot),
            self.config.retry,
        );
        let mut ctx = ProgramContext::new(channel, &self.config, session, progress)
            .with_lease(&mut lease)
            .with_store(self.store)
            .with_force(request.force);
        let result = self.dispatch(&mut ctx, component, prepared);
        drop(ctx);

        let released = lease.release();
        if let (Err(e), Err(_)) = (&released, &result) {
            warn!(error = %e, "lease release failed after a failed update");
        }
        result.and(released)
    }

    fn dispatch(
        &self,
        ctx: &mut ProgramContext<'_, '_>,
        component: Component,
        prepared: Prepared,
    ) -> Result<()> {
        match (component, prepared) {
            (Component::Vr(rail), Prepared::Vr(candidates)) => {
                self.update_vr(ctx, rail, candidates)
            }
            (Component::PcieSwitch, Prepared::Bundle(bundle)) => {
                let route = ctx.route().clone();
                ctx.set_target(DeviceTarget {
                    route,
                    bus: 0,
                    address: 0,
                    vendor: Vendor::PcieSwitch,
                });
                RecoveryOrchestrator::new(self.store).run(ctx, &bundle)
            }
            (Component::Bios, Prepared::Image(image)) => {
                program_target(ctx, 0, 0, &DeviceProgrammer::Bios(BiosProgrammer::new()), &image)
            }
            (
                Component::SbCpld | Component::ExpCpld | Component::BbCpld,
                Prepared::Image(image),
            ) => {
                let dev = component
                    .device()
                    .ok_or_else(|| UpdateError::device_not_found(component.to_string()))?;
                let programmer = if component == Component::BbCpld {
                    DeviceProgrammer::Altera(AlteraProgrammer::new(dev))
                } else {
                    DeviceProgrammer::Lattice(LatticeProgrammer::new(dev))
                };
                program_target(ctx, dev.selector(), dev.addr(), &programmer, &image)
            }
            (component, _) => Err(UpdateError::unsupported_image(format!(
                "no update path for {component}"
            ))),
        }
    }

    fn update_vr(
        &self,
        ctx: &mut ProgramContext<'_, '_>,
        rail: VrRail,
        candidates: Vec<(ImageFormat, Vec<FirmwareImage>)>,
    ) -> Result<()> {
        let dev = rail.device();
        let identity = vr::probe(ctx, dev)?;
        let images = pick_vr_candidate(candidates, identity.format())?;
        let image = select_vr_image(images, dev)?;

        let compatible = match identity.vendor {
            Vendor::Isl => matches!(image.vendor(), Vendor::Isl | Vendor::Pxe),
            vendor => image.vendor() == vendor,
        };
        if !compatible {
            return Err(UpdateError::unsupported_image(format!(
                "{} image for a {} regulator",
                image.vendor(),
                identity.vendor
            )));
        }
        vr::check_identity(ctx, dev, &image, &identity)?;

        let programmer = match image.vendor() {
            Vendor::Isl => DeviceProgrammer::Isl(IslProgrammer::new(dev)),
            Vendor::Pxe => DeviceProgrammer::Pxe(PxeProgrammer::new(dev)),
            Vendor::Ti => DeviceProgrammer::Ti(TiProgrammer::new(dev)),
            Vendor::Infineon => DeviceProgrammer::Infineon(IfxProgrammer::new(dev)),
            other => {
                return Err(UpdateError::unsupported_image(format!("{other} is not a regulator")));
            }
        };
        program_target(ctx, rail.bus(), dev.addr(), &programmer, &image)?;

        let key = vr_crc_key(dev.addr());
        if let Err(e) = self.store.delete(&key) {
            warn!(key = %key, error = %e, "failed to drop cached regulator checksum");
        }
        Ok(())
    }
}

impl fmt::Debug for UpdateManager<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateManager")
            .field("slot", &self.slot)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn program_target(
    ctx: &mut ProgramContext<'_, '_>,
    bus: u8,
    address: u8,
    programmer: &DeviceProgrammer,
    image: &FirmwareImage,
) -> Result<()> {
    let route = ctx.route().clone();
    ctx.set_target(DeviceTarget {
        route,
        bus,
        address,
        vendor: programmer.vendor(),
    });
    programmer.program(ctx, image)
}

/// Parse and validate the image for `component` without any I/O to the
/// device.
fn prepare(component: Component, source: &ImageSource) -> Result<Prepared> {
    if component == Component::PcieSwitch {
        return Ok(Prepared::Bundle(source.bundle()?));
    }
    let bytes = source.load()?;
    match (component, component.formats()) {
        (Component::Vr(_), formats) => {
            let guessed =
                ImageFormat::guess(&source.file_name(), &bytes).filter(|f| formats.contains(f));
            if let Some(format) = guessed {
                return Ok(Prepared::Vr(vec![(format, format.parse_all(&bytes)?)]));
            }
            let candidates: Vec<_> = formats
                .iter()
                .filter_map(|&format| match format.parse_all(&bytes) {
                    Ok(images) => Some((format, images)),
                    Err(e) => {
                        debug!(%format, error = %e, "regulator format rejected");
                        None
                    }
                })
                .collect();
            if candidates.is_empty() {
                return Err(UpdateError::unsupported_image(format!(
                    "{} is not a regulator image",
                    source.file_name()
                )));
            }
            Ok(Prepared::Vr(candidates))
        }
        (_, [format]) => Ok(Prepared::Image(format.parse(&bytes)?)),
        (component, _) => Err(UpdateError::unsupported_image(format!(
            "no image format for {component}"
        ))),
    }
}

/// Images parsed in the probed part's format, or the first that parsed.
fn pick_vr_candidate(
    candidates: Vec<(ImageFormat, Vec<FirmwareImage>)>,
    probed: ImageFormat,
) -> Result<Vec<FirmwareImage>> {
    let mut fallback = None;
    for (format, images) in candidates {
        if format == probed {
            return Ok(images);
        }
        fallback.get_or_insert(images);
    }
    fallback.ok_or_else(|| UpdateError::unsupported_image("no regulator image"))
}

/// Image of a multi-regulator file that targets `dev`.
fn select_vr_image(images: Vec<FirmwareImage>, dev: I2cDevice) -> Result<FirmwareImage> {
    let count = images.len();
    let mut images = images.into_iter();
    if count == 1 {
        return images
            .next()
            .ok_or_else(|| UpdateError::unsupported_image("empty regulator image"));
    }
    images.find(|image| image.address() == dev.addr()).ok_or_else(|| {
        UpdateError::unsupported_image(format!(
            "none of {count} regulator images targets {:#04x}",
            dev.addr()
        ))
    })
}

#[cfg(test)]
mod tests {
    use bmcfw_test_helpers::prelude::*;
    use tracing_test::traced_test;

    use super::*;
    use crate::lease::{InMemoryKvStore, lease_key};
    use crate::programmer::vr::{REG_IC_DEVICE_ID, REG_IC_DEVICE_REV};
    use crate::progress::NoProgress;

    /// ISL regulator with 20 NVM slots that reports done on the first poll.
    fn isl_regulator(id: [u8; 4], revision: u8) -> MockTransport {
        let mut window = [0u8; 2];
        MockTransport::with_handler(move |req: &Request| {
            let Some(i2c) = req.i2c() else {
                return Reply::empty_for(req);
            };
            match i2c.write {
                [REG_IC_DEVICE_ID] => {
                    let mut resp = vec![4];
                    resp.extend_from_slice(&id);
                    resp.resize(7, 0);
                    Reply::Ok(resp)
                }
                [REG_IC_DEVICE_REV] => Reply::Ok(vec![0, 0, 0, revision]),
                [0xC7, lo, hi] => {
                    window = [*lo, *hi];
                    Reply::empty()
                }
                [0xC5] if window == [0x35, 0x00] => Reply::Ok(vec![20, 0, 0, 0]),
                [0xC5] => Reply::Ok(vec![0x01, 0, 0, 0]),
                _ => Reply::empty(),
            }
        })
    }

    fn isl_source() -> ImageSource {
        ImageSource::bytes("vccin.hex", IslHex::new(0xC0).to_text())
    }

    fn execute(
        manager: &UpdateManager<'_>,
        mock: &MockTransport,
        request: &UpdateRequest,
    ) -> (UpdateSession, Result<()>) {
        let mut transport = mock.clone();
        let mut session = UpdateSession::new(request.component.to_string());
        let result = manager.execute(&mut transport, request, &mut NoProgress, &mut session);
        (session, result)
    }

    #[test]
    fn test_regulator_update_end_to_end() -> Result<()> {
        let store = InMemoryKvStore::new();
        store.set(&vr_crc_key(0xC0), "0BADF00D", None)?;
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let mock = isl_regulator([0x11, 0x22, 0x33, 0x44], 0x06);

        let request = UpdateRequest::new(Component::Vr(VrRail::Vccin), isl_source());
        let (session, result) = execute(&manager, &mock, &request);
        result?;

        assert!(session.succeeded());
        assert_eq!(session.state(), ProgramState::Success);
        assert_eq!(session.lease.as_deref(), Some("fru1_fwupd"));
        let target = must_some(session.target.clone(), "target resolved");
        assert_eq!(target.vendor, Vendor::Isl);
        assert_eq!(target.bus, 4);
        assert_eq!(target.address, 0xC0);

        assert_eq!(store.get(&vr_crc_key(0xC0))?, None);
        assert_eq!(store.get(&lease_key(1))?, None);
        Ok(())
    }

    #[test]
    fn test_bad_image_touches_nothing() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let mock = MockTransport::new();

        let request =
            UpdateRequest::new(Component::SbCpld, ImageSource::bytes("cpld.jed", "QF1*\n"));
        let (session, result) = execute(&manager, &mock, &request);

        assert!(matches!(result, Err(UpdateError::Image(_))));
        assert!(mock.requests().is_empty());
        assert_eq!(session.lease, None);
        assert_eq!(session.state(), ProgramState::Failed);
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn test_unrecognized_regulator_file_touches_nothing() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let mock = isl_regulator([0x11, 0x22, 0x33, 0x44], 0x06);

        let garbage = ImageSource::bytes("vccin.img", vec![0xFFu8, 0xFE, 0x00, 0x13, 0x37]);
        let request = UpdateRequest::new(Component::Vr(VrRail::Vccin), garbage);
        let (session, result) = execute(&manager, &mock, &request);

        assert!(matches!(result, Err(UpdateError::UnsupportedImage(_))));
        assert!(mock.requests().is_empty());
        assert_eq!(session.lease, None);
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn test_peer_lease_blocks_update() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        store.set(&lease_key(2), "600", None)?;
        let manager = UpdateManager::new(2, &store, &clock);
        let mock = isl_regulator([0x11, 0x22, 0x33, 0x44], 0x06);

        let request = UpdateRequest::new(Component::Vr(VrRail::Vccin), isl_source());
        let (session, result) = execute(&manager, &mock, &request);

        assert!(matches!(result, Err(UpdateError::ConcurrentUpdateConflict { .. })));
        assert!(mock.requests().is_empty());
        assert_eq!(store.get(&lease_key(2))?, Some("600".to_string()));
        assert!(matches!(session.outcome, Some(Outcome::Failed { .. })));
        Ok(())
    }

    #[test]
    fn test_lease_released_after_device_failure() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let mock = isl_regulator([0xDE, 0xAD, 0xBE, 0xEF], 0x06);

        let request = UpdateRequest::new(Component::Vr(VrRail::Vccin), isl_source());
        let (_, result) = execute(&manager, &mock, &request);

        assert!(matches!(result, Err(UpdateError::DeviceMismatch { .. })));
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn test_force_overrides_identity() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let mock = isl_regulator([0xDE, 0xAD, 0xBE, 0xEF], 0x02);

        let request =
            UpdateRequest::new(Component::Vr(VrRail::Vccin), isl_source()).with_force(true);
        let (session, result) = execute(&manager, &mock, &request);
        result?;
        assert!(session.succeeded());
        Ok(())
    }

    #[test]
    fn test_wrong_family_is_refused_even_forced() {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let mock = MockTransport::with_handler(|req: &Request| match req.i2c() {
            Some(i2c) if i2c.write.first() == Some(&REG_IC_DEVICE_ID) => {
                Reply::Ok(vec![2, 0x03, 0x8A, 0, 0, 0, 0])
            }
            _ => Reply::empty_for(req),
        });

        let request =
            UpdateRequest::new(Component::Vr(VrRail::Vccinfaon), isl_source()).with_force(true);
        let (_, result) = execute(&manager, &mock, &request);
        assert!(matches!(result, Err(UpdateError::UnsupportedImage(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_multi_regulator_file_picks_address() -> Result<()> {
        let c0 = IslHex::new(0xC0).to_text();
        let c4 = IslHex::new(0xC4).with_record(0xE8, &[0x05]).to_text();
        let images = ImageFormat::Isl.parse_all(format!("{c0}{c4}").as_bytes())?;
        assert_eq!(images.len(), 2);

        let chosen = select_vr_image(images.clone(), VrRail::Vccd.device())?;
        assert_eq!(chosen.address(), 0xC4);
        assert_eq!(chosen.records().len(), 3);

        assert!(select_vr_image(images, VrRail::ExpStby1.device()).is_err());
        Ok(())
    }

    #[test]
    fn test_bios_update_over_usb() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let config = UpdateConfig::default().with_bios_dedup(false);
        let manager = UpdateManager::new(3, &store, &clock).with_config(config)?;
        let mock = MockTransport::new();

        let request = UpdateRequest::new(
            Component::Bios,
            ImageSource::bytes("bios.bin", bios_image(0x20000)),
        );
        let (session, result) = execute(&manager, &mock, &request);
        result?;

        assert!(!mock.bulk_packets().is_empty());
        assert_eq!(session.done, 2);
        assert_eq!(session.total, 2);
        assert_eq!(session.percent(), 100);
        Ok(())
    }

    #[test]
    fn test_baseboard_cpld_uses_shared_lease() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        store.set(crate::lease::BASEBOARD_LEASE_KEY, "600", None)?;
        let manager = UpdateManager::new(1, &store, &clock);
        let mock = MockTransport::new();

        let request = UpdateRequest::new(
            Component::BbCpld,
            ImageSource::bytes("bb.rpd", altera_rpd(None)),
        )
        .with_force(true);
        let (_, result) = execute(&manager, &mock, &request);
        assert!(matches!(
            result,
            Err(UpdateError::ConcurrentUpdateConflict { ref key }) if key == "bb_fw_update"
        ));
        Ok(())
    }

    #[test]
    fn test_reader_source() -> Result<()> {
        let text = IslHex::new(0xC0).to_text();
        let source = ImageSource::from_reader("vr.hex", text.as_bytes())?;
        assert_eq!(source.file_name(), "vr.hex");
        assert_eq!(source.to_string(), "vr.hex");
        assert!(matches!(source.load()?, Cow::Borrowed(_)));
        Ok(())
    }

    #[test]
    #[traced_test]
    fn test_start_and_end_lines() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(1, &store, &clock);
        let mock = isl_regulator([0x11, 0x22, 0x33, 0x44], 0x06);

        let request = UpdateRequest::new(Component::Vr(VrRail::Vccin), isl_source());
        let mut transport = mock.clone();
        manager.update(&mut transport, &request)?;

        assert!(logs_contain("Updating vr_vccin on slot1. File: vccin.hex"));
        assert!(logs_contain("Updated vr_vccin on slot1. File: vccin.hex. Result: Success"));
        Ok(())
    }

    #[test]
    #[traced_test]
    fn test_failure_end_line() {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let manager = UpdateManager::new(4, &store, &clock);
        let mut transport = MockTransport::new();

        let request =
            UpdateRequest::new(Component::Bios, ImageSource::bytes("empty.bin", Vec::new()));
        assert!(manager.update(&mut transport, &request).is_err());
        assert!(logs_contain("Updated bios on slot4. File: empty.bin. Result: Fail"));
    }
}
