//! Firmware update engine for BMC-managed components
//!
//! Drives voltage regulators, CPLDs, the host BIOS and the 2OU PCIe switch
//! through their vendor program sequences over a [`bmcfw_transport`] channel:
//! - Image pre-check before the first write, device checksum post-check after the last
//! - Cross-BMC update lease with periodic refresh, released on every exit path
//! - Sensor monitoring suspended through a scoped guard while the bus is busy
//! - PCIe switch recovery through the bootloader, surviving host power cycles
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`manager`]: [`UpdateManager`], the session coordinator and update entry point
//! - [`component`]: Component table: routes, devices, lease keys, formats
//! - [`programmer`]: One [`Programmer`] per vendor family behind [`DeviceProgrammer`]
//! - [`recovery`]: PCIe switch [`RecoveryOrchestrator`]
//! - [`context`]: [`ProgramContext`] threaded through every sequence
//! - [`lease`]: [`KvStore`] contract and [`LeaseGuard`]
//! - [`monitor`]: [`MonitorGuard`] for sensor monitoring
//! - [`state`]: Programmer states, recovery phases and the session record
//! - [`progress`]: [`ProgressSink`] side channel
//! - [`config`]: [`UpdateConfig`]
//!
//! # Failure modes
//!
//! There is no cancellation in the middle of a write. A session that stops
//! on an error may leave a device partially written; the lease is still
//! released and the recovery select line is always returned to normal.
//!
//! # Example
//!
//! ```ignore
//! use bmcfw_firmware_update::prelude::*;
//!
//! # fn example(transport: &mut dyn Transport, store: &dyn KvStore) -> Result<(), UpdateError> {
//! let clock = SystemClock::new();
//! let manager = UpdateManager::new(1, store, &clock);
//!
//! let request = UpdateRequest::new(Component::Vr(VrRail::Vccin), ImageSource::path("vccin.hex"));
//! let session = manager.update(transport, &request)?;
//! assert!(session.succeeded());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod component;
pub mod config;
pub mod context;
pub mod lease;
pub mod manager;
pub mod monitor;
pub mod prelude;
pub mod programmer;
pub mod progress;
pub mod recovery;
pub mod state;

pub use bmcfw_errors::{Result, UpdateError};
pub use component::{Component, VrRail};
pub use config::UpdateConfig;
pub use context::ProgramContext;
pub use lease::{InMemoryKvStore, KvStore, LeaseGuard, lease_key};
pub use manager::{ImageSource, UpdateManager, UpdateRequest, vr_crc_key};
pub use monitor::MonitorGuard;
pub use programmer::{DeviceProgrammer, I2cDevice, Programmer};
pub use progress::{LogProgress, NoProgress, ProgressSink};
pub use recovery::RecoveryOrchestrator;
pub use state::{DeviceTarget, Outcome, ProgramState, RecoveryPhase, UpdateSession};
