//! Convenience re-exports for common firmware update types

pub use crate::component::{Component, VrRail};
pub use crate::config::UpdateConfig;
pub use crate::context::ProgramContext;
pub use crate::lease::{BASEBOARD_LEASE_KEY, InMemoryKvStore, KvStore, LeaseGuard, lease_key};
pub use crate::manager::{ImageSource, UpdateManager, UpdateRequest, vr_crc_key};
pub use crate::monitor::MonitorGuard;
pub use crate::programmer::{
    AlteraProgrammer, BiosProgrammer, DeviceProgrammer, I2cDevice, IfxProgrammer, IslProgrammer,
    LatticeProgrammer, PcieProgrammer, Programmer, PxeProgrammer, TiProgrammer,
};
pub use crate::progress::{LogProgress, NoProgress, ProgressSink};
pub use crate::recovery::RecoveryOrchestrator;
pub use crate::state::{DeviceTarget, Outcome, ProgramState, RecoveryPhase, UpdateSession};
pub use bmcfw_errors::{Result, UpdateError};
pub use bmcfw_image::{FirmwareImage, ImageFormat, PcieBundle, Vendor};
pub use bmcfw_transport::{Clock, Route, SystemClock, Transport};
