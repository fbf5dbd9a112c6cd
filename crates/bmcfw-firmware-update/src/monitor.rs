//! Scoped suspension of bridge sensor monitoring.
//!
//! While a regulator or the PCIe switch is being reprogrammed the bridge must
//! stop polling it. [`MonitorGuard::disable`] turns polling off and hands the
//! context back wrapped in a guard; dropping the guard turns polling back on,
//! whichever way the sequence ends.

use core::ops::{Deref, DerefMut};

use bmcfw_errors::Result;
use bmcfw_transport::ipmi::CMD_OEM_1S_ENABLE_SENSOR_MONITOR;
use bmcfw_transport::{Channel, Route};
use tracing::{info, warn};

use crate::context::ProgramContext;

fn set_monitoring(channel: &mut Channel<'_>, enabled: bool) -> Result<()> {
    channel.oem(CMD_OEM_1S_ENABLE_SENSOR_MONITOR, &[u8::from(enabled)])?;
    Ok(())
}

/// Context with sensor monitoring suspended on one bridge.
pub struct MonitorGuard<'g, 's, 'a> {
    ctx: &'g mut ProgramContext<'s, 'a>,
    route: Route,
}

impl<'g, 's, 'a> MonitorGuard<'g, 's, 'a> {
    /// Suspend monitoring on the bridge at `route`.
    ///
    /// # Errors
    ///
    /// Transport failure of the disable request; monitoring is left as it
    /// was.
    pub fn disable(ctx: &'g mut ProgramContext<'s, 'a>, route: Route) -> Result<Self> {
        set_monitoring(&mut ctx.reroute(route.clone()), false)?;
        info!(%route, "sensor monitoring suspended");
        Ok(Self { ctx, route })
    }

    /// Suspend monitoring on the bridge that owns the session's device.
    ///
    /// # Errors
    ///
    /// As [`MonitorGuard::disable`].
    pub fn disable_here(ctx: &'g mut ProgramContext<'s, 'a>) -> Result<Self> {
        let route = ctx.route().clone();
        Self::disable(ctx, route)
    }
}

impl<'s, 'a> Deref for MonitorGuard<'_, 's, 'a> {
    type Target = ProgramContext<'s, 'a>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl DerefMut for MonitorGuard<'_, '_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl Drop for MonitorGuard<'_, '_, '_> {
    fn drop(&mut self) {
        let route = self.route.clone();
        match set_monitoring(&mut self.ctx.reroute(route), true) {
            Ok(()) => info!(route = %self.route, "sensor monitoring resumed"),
            Err(e) => warn!(route = %self.route, error = %e, "failed to resume sensor monitoring"),
        }
    }
}

impl core::fmt::Debug for MonitorGuard<'_, '_, '_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MonitorGuard")
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}
