//! Per-session context threaded through every programmer.
//!
//! Holds what the sequences share: the bound transport channel, the engine
//! configuration, the session record, the progress sink, the lease to keep
//! alive, the BMC key-value store and the force flag. There is no other state; programmers never
//! reach for globals.

use std::time::Duration;

use bmcfw_errors::Result;
use bmcfw_transport::{Channel, Clock, Route};
use tracing::debug;

use crate::config::UpdateConfig;
use crate::lease::{KvStore, LeaseGuard};
use crate::progress::ProgressSink;
use crate::state::{DeviceTarget, ProgramState, RecoveryPhase, UpdateSession};

/// Borrowed session context.
pub struct ProgramContext<'s, 'a> {
    channel: Channel<'a>,
    config: &'s UpdateConfig,
    session: &'s mut UpdateSession,
    progress: &'s mut dyn ProgressSink,
    lease: Option<&'s mut LeaseGuard<'a>>,
    store: Option<&'s dyn KvStore>,
    force: bool,
}

impl<'s, 'a> ProgramContext<'s, 'a> {
    /// Context over `channel`.
    pub fn new(
        channel: Channel<'a>,
        config: &'s UpdateConfig,
        session: &'s mut UpdateSession,
        progress: &'s mut dyn ProgressSink,
    ) -> Self {
        Self {
            channel,
            config,
            session,
            progress,
            lease: None,
            store: None,
            force: false,
        }
    }

    /// Keep `lease` alive while the session runs.
    #[must_use]
    pub fn with_lease(mut self, lease: &'s mut LeaseGuard<'a>) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Give programmers access to the BMC key-value store.
    #[must_use]
    pub fn with_store(mut self, store: &'s dyn KvStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the force flag.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Channel bound to the device route.
    pub fn channel(&mut self) -> &mut Channel<'a> {
        &mut self.channel
    }

    /// Same transport over another route.
    pub fn reroute(&mut self, route: Route) -> Channel<'_> {
        self.channel.reroute(route)
    }

    /// Direct route to the bridge controller of the session's slot.
    pub fn server(&mut self) -> Channel<'_> {
        let route =
            Route::slot(self.channel.route().slot_id()).with_link(self.channel.route().link());
        self.channel.reroute(route)
    }

    /// Route of the session.
    pub fn route(&self) -> &Route {
        self.channel.route()
    }

    /// Engine configuration.
    pub fn config(&self) -> &UpdateConfig {
        self.config
    }

    /// Whether the caller asked to override soft checks.
    pub fn force(&self) -> bool {
        self.force
    }

    /// BMC key-value store, if the session has one.
    pub fn store(&self) -> Option<&'s dyn KvStore> {
        self.store
    }

    /// Session record.
    pub fn session(&self) -> &UpdateSession {
        self.session
    }

    /// Record the resolved device.
    pub fn set_target(&mut self, target: DeviceTarget) {
        debug!(component = %self.session.component, %target, "device resolved");
        self.session.target = Some(target);
    }

    /// Component name, for error and log text.
    pub fn component(&self) -> String {
        self.session.component.clone()
    }

    /// Session clock.
    pub fn clock(&self) -> &'a dyn Clock {
        self.channel.clock()
    }

    /// Sleep through the session clock.
    pub fn sleep(&self, duration: Duration) {
        self.channel.sleep(duration);
    }

    /// Record a programmer state.
    pub fn enter(&mut self, state: ProgramState) {
        if !matches!(state, ProgramState::Writing { .. }) {
            debug!(component = %self.session.component, ?state, "programmer state");
        }
        self.session.enter(state);
    }

    /// Record a recovery phase.
    pub fn enter_phase(&mut self, phase: RecoveryPhase) {
        debug!(component = %self.session.component, %phase, "recovery phase");
        self.session.enter_phase(phase);
    }

    /// Count one more attempt of the outer program sequence.
    pub fn next_attempt(&mut self) -> u32 {
        self.session.attempts = self.session.attempts.saturating_add(1);
        self.session.attempts
    }

    /// Report write progress and keep the lease alive.
    ///
    /// # Errors
    ///
    /// As [`ProgramContext::keepalive`].
    pub fn wrote(&mut self, done: usize, total: usize) -> Result<()> {
        self.enter(ProgramState::Writing { done, total });
        self.report("Writing", done, total)
    }

    /// Report progress of `stage` and keep the lease alive.
    ///
    /// # Errors
    ///
    /// As [`ProgramContext::keepalive`].
    pub fn report(&mut self, stage: &str, done: usize, total: usize) -> Result<()> {
        self.progress.report(stage, done, total);
        self.keepalive()
    }

    /// Extend the lease if its refresh interval has passed.
    ///
    /// # Errors
    ///
    /// [`bmcfw_errors::UpdateError::Io`] if the key-value store fails.
    pub fn keepalive(&mut self) -> Result<()> {
        match self.lease.as_deref_mut() {
            Some(lease) => lease.refresh_if_due(),
            None => Ok(()),
        }
    }
}

impl core::fmt::Debug for ProgramContext<'_, '_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProgramContext")
            .field("channel", &self.channel)
            .field("component", &self.session.component)
            .field("force", &self.force)
            .field("lease", &self.lease.as_ref().map(|l| l.key()))
            .finish_non_exhaustive()
    }
}
