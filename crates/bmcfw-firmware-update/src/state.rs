//! Session bookkeeping: programmer states, recovery phases and the session
//! record the coordinator hands back to the caller.

use core::fmt;

use bmcfw_image::{SubImageKind, Vendor};
use bmcfw_transport::Route;
use serde::Serialize;

/// Programmer state machine shared by every vendor.
///
/// Not every vendor visits every state; a VR without an erase step goes
/// straight from `Unlocked` to `Writing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramState {
    /// Nothing sent yet
    #[default]
    Idle,

    /// Write protection lifted
    Unlocked,

    /// Erase issued, polling for completion
    Erasing,

    /// Writing records or blocks
    Writing {
        /// Units written so far
        done: usize,
        /// Units to write
        total: usize,
    },

    /// Write protection restored
    Locked,

    /// New image committed or activated
    Activated,

    /// Reading back the device checksum
    Verifying,

    /// Finished successfully
    Success,

    /// Aborted
    Failed,
}

impl ProgramState {
    /// Check if the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgramState::Success | ProgramState::Failed)
    }
}

/// Phase of the PCIe switch recovery sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPhase {
    /// Not started
    #[default]
    Idle,
    /// Forcing the switch into its recovery bootloader
    EnteringRecovery,
    /// Streaming one sub-image
    Flashing(SubImageKind),
    /// Marking sub-images active
    Toggling,
    /// Power cycling the host
    PowerCycling,
    /// Waiting for the host to come back
    WaitingHostReady,
    /// Finished successfully
    Done,
    /// Aborted
    Failed,
}

impl RecoveryPhase {
    /// Check if the phase is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryPhase::Done | RecoveryPhase::Failed)
    }
}

impl fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryPhase::Idle => write!(f, "idle"),
            RecoveryPhase::EnteringRecovery => write!(f, "entering recovery"),
            RecoveryPhase::Flashing(kind) => write!(f, "flashing {kind}"),
            RecoveryPhase::Toggling => write!(f, "toggling"),
            RecoveryPhase::PowerCycling => write!(f, "power cycling"),
            RecoveryPhase::WaitingHostReady => write!(f, "waiting for host"),
            RecoveryPhase::Done => write!(f, "done"),
            RecoveryPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Resolved addressing of the device being updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceTarget {
    /// Route to the controller that owns the device bus
    pub route: Route,
    /// Bus id behind that controller
    pub bus: u8,
    /// 8-bit slave address, 0 when the device is addressed in-band
    pub address: u8,
    /// Vendor programmer selected for the device
    pub vendor: Vendor,
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} bus {}", self.vendor, self.route, self.bus)?;
        if self.address != 0 {
            write!(f, " addr {:#04x}", self.address)?;
        }
        Ok(())
    }
}

/// Final result of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every step succeeded
    Success,
    /// The session stopped on an error
    Failed {
        /// Error display text
        error: String,
    },
}

/// Record of one update session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateSession {
    /// Component being updated
    pub component: String,
    /// Resolved device, once probed
    pub target: Option<DeviceTarget>,
    /// Work units done
    pub done: usize,
    /// Work units in total
    pub total: usize,
    /// Attempts of the outer program sequence
    pub attempts: u32,
    /// Lease key held by the session
    pub lease: Option<String>,
    /// Programmer states, in order
    pub states: Vec<ProgramState>,
    /// Recovery phases, in order; empty unless the PCIe switch was updated
    pub phases: Vec<RecoveryPhase>,
    /// Terminal outcome
    pub outcome: Option<Outcome>,
}

impl UpdateSession {
    /// Fresh session for `component`.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            target: None,
            done: 0,
            total: 0,
            attempts: 0,
            lease: None,
            states: vec![ProgramState::Idle],
            phases: Vec::new(),
            outcome: None,
        }
    }

    /// Current programmer state.
    pub fn state(&self) -> ProgramState {
        self.states.last().copied().unwrap_or_default()
    }

    /// Current recovery phase.
    pub fn phase(&self) -> RecoveryPhase {
        self.phases.last().copied().unwrap_or_default()
    }

    /// Record a programmer state. Consecutive `Writing` updates collapse
    /// into one entry.
    pub fn enter(&mut self, state: ProgramState) {
        if let ProgramState::Writing { done, total } = state {
            self.done = done;
            self.total = total;
            if let Some(last @ ProgramState::Writing { .. }) = self.states.last_mut() {
                *last = state;
                return;
            }
        }
        self.states.push(state);
    }

    /// Record a recovery phase.
    pub fn enter_phase(&mut self, phase: RecoveryPhase) {
        self.phases.push(phase);
    }

    /// Progress in percent.
    pub fn percent(&self) -> u8 {
        percent(self.done, self.total)
    }

    /// Check whether the session ended successfully.
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, Some(Outcome::Success))
    }
}

pub(crate) fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = done.saturating_mul(100) / total;
    u8::try_from(pct.min(100)).unwrap_or(100)
}
