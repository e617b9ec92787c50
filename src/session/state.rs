//! Session worker state machine.

use std::fmt;

/// Lifecycle state of a session worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    /// Opening the store and connecting the transport.
    #[default]
    Starting,
    /// Receiving and dispatching inbound messages.
    Connected,
    /// Stop requested; notifying peer and closing the connection.
    Draining,
    /// Connection could not be opened or was lost.
    Faulted,
    /// Worker has finished and holds no resources.
    Stopped,
}

impl WorkerState {
    /// Check if transition to target state is valid.
    ///
    /// Valid transitions:
    /// - Starting -> Connected
    /// - Starting -> Draining (stop requested before the connection is up)
    /// - Starting -> Faulted
    /// - Connected -> Draining
    /// - Connected -> Faulted
    /// - Draining -> Stopped
    /// - Faulted -> Stopped
    pub fn can_transition_to(&self, target: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (*self, target),
            (Starting, Connected)
                | (Starting, Draining)
                | (Starting, Faulted)
                | (Connected, Draining)
                | (Connected, Faulted)
                | (Draining, Stopped)
                | (Faulted, Stopped)
        )
    }

    /// Attempt to transition to a new state.
    ///
    /// Returns `Ok(())` if the transition is valid, or an error otherwise.
    pub fn transition_to(&mut self, target: WorkerState) -> crate::Result<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(crate::error::RelayError::InvalidStateTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Stopped)
    }

    /// Check if the worker is dispatching commands.
    pub fn is_connected(&self) -> bool {
        matches!(self, WorkerState::Connected)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Connected => "connected",
            Self::Draining => "draining",
            Self::Faulted => "faulted",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
