//! Per-session worker.
//!
//! A worker owns one transport connection, one store handle and one
//! command router. It runs as its own tokio task, processes inbound
//! messages strictly in arrival order, and never lets a single message
//! take the session down.
//!
//! ```text
//! Starting ──> Connected ──> Draining ──> Stopped
//!    │             │                        ^
//!    └─────────────┴──> Faulted ────────────┘
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{FutureExt, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::error::RelayError;
use crate::router::{CommandRouter, Dispatch};
use crate::session::{SessionIdentity, StoreHandle, WorkerState};
use crate::transport::{Connection, InboundMessage, InboundStream, Transport};
use crate::Result;

/// Upper bound on the goodbye sequence run while draining, by default.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a worker was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Store entry was deleted: unlink the device.
    Removed,
    /// The account sent `stopbot`.
    Unlinked,
    /// Process is shutting down: disconnect but stay linked.
    Shutdown,
}

/// How a worker finished.
#[derive(Debug)]
pub enum WorkerExit {
    Stopped {
        reason: StopReason,
        was_connected: bool,
    },
    Faulted {
        error: RelayError,
        was_connected: bool,
    },
}

impl WorkerExit {
    pub fn was_connected(&self) -> bool {
        match self {
            Self::Stopped { was_connected, .. } | Self::Faulted { was_connected, .. } => {
                *was_connected
            }
        }
    }
}

/// Observes and stops a worker from outside its task.
///
/// Dropping every control for a worker counts as a shutdown request.
#[derive(Debug, Clone)]
pub struct WorkerControl {
    identity: SessionIdentity,
    stop_tx: Arc<watch::Sender<Option<StopReason>>>,
    state_rx: watch::Receiver<WorkerState>,
}

impl WorkerControl {
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Ask the worker to drain. Only the first reason sticks.
    pub fn stop(&self, reason: StopReason) {
        self.stop_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    pub fn state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    /// Wait until the worker reaches `target` or stops.
    ///
    /// Returns the state reached.
    pub async fn wait_for(&self, target: WorkerState) -> WorkerState {
        let mut rx = self.state_rx.clone();
        let reached = rx
            .wait_for(|state| *state == target || state.is_terminal())
            .await
            .map(|state| *state);
        match reached {
            Ok(state) => state,
            Err(_) => *rx.borrow(),
        }
    }
}

/// Publishes state changes and enforces the transition table.
struct StateCell {
    identity: SessionIdentity,
    state: WorkerState,
    tx: watch::Sender<WorkerState>,
}

impl StateCell {
    fn advance(&mut self, target: WorkerState) {
        match self.state.transition_to(target) {
            Ok(()) => {
                debug!(session = %self.identity, state = %target, "worker state changed");
                self.tx.send_replace(target);
            }
            Err(e) => error!(session = %self.identity, error = %e, "rejected worker transition"),
        }
    }
}

/// One supervised session.
pub struct SessionWorker {
    store: StoreHandle,
    transport: Arc<dyn Transport>,
    router: CommandRouter,
    drain_timeout: Duration,
    state_tx: watch::Sender<WorkerState>,
    stop_rx: watch::Receiver<Option<StopReason>>,
}

impl SessionWorker {
    /// Build a worker and the control used to observe and stop it.
    pub fn new(
        store: StoreHandle,
        transport: Arc<dyn Transport>,
        prefix: char,
    ) -> (Self, WorkerControl) {
        let (state_tx, state_rx) = watch::channel(WorkerState::Starting);
        let (stop_tx, stop_rx) = watch::channel(None);
        let control = WorkerControl {
            identity: store.identity().clone(),
            stop_tx: Arc::new(stop_tx),
            state_rx,
        };
        let worker = Self {
            router: CommandRouter::new(store.clone(), prefix),
            store,
            transport,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            state_tx,
            stop_rx,
        };
        (worker, control)
    }

    /// Bound the notice, logout and disconnect sequence run on stop.
    ///
    /// When it expires the connection is dropped as is and the worker
    /// still reaches `Stopped`.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Run the worker on its own task.
    pub fn spawn(self) -> JoinHandle<WorkerExit> {
        tokio::spawn(self.run())
    }

    /// Drive the worker to completion.
    pub async fn run(self) -> WorkerExit {
        let SessionWorker {
            store,
            transport,
            router,
            drain_timeout,
            state_tx,
            mut stop_rx,
        } = self;
        let identity = store.identity().clone();
        let mut cell = StateCell {
            identity: identity.clone(),
            state: WorkerState::Starting,
            tx: state_tx,
        };
        info!(session = %identity, "worker starting");

        let opened = tokio::select! {
            biased;
            reason = stop_requested(&mut stop_rx) => {
                cell.advance(WorkerState::Draining);
                cell.advance(WorkerState::Stopped);
                info!(session = %identity, ?reason, "worker stopped before connecting");
                return WorkerExit::Stopped { reason, was_connected: false };
            }
            opened = open_connection(&store, transport.as_ref()) => opened,
        };
        let (conn, mut inbound) = match opened {
            Ok(opened) => opened,
            Err(error) => {
                warn!(session = %identity, error = %error, "could not open session");
                cell.advance(WorkerState::Faulted);
                cell.advance(WorkerState::Stopped);
                return WorkerExit::Faulted {
                    error,
                    was_connected: false,
                };
            }
        };

        cell.advance(WorkerState::Connected);
        info!(session = %identity, account = %conn.own_id(), "session online");

        let ended = loop {
            let next = tokio::select! {
                biased;
                reason = stop_requested(&mut stop_rx) => break Ok(reason),
                next = inbound.next() => next,
            };
            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(error)) => break Err(error),
                None => break Err(RelayError::Network("inbound stream closed".into())),
            };

            // Credentials vanish when the operator removes the session.
            if let Err(error) = store.ensure_present().await {
                break Err(error);
            }
            if dispatch(&router, conn.as_ref(), &message, &identity).await == Some(Dispatch::Stop) {
                break Ok(StopReason::Unlinked);
            }
        };

        match ended {
            Ok(reason) => {
                cell.advance(WorkerState::Draining);
                let drained = time::timeout(drain_timeout, drain(conn.as_ref(), reason, &identity));
                if drained.await.is_err() {
                    warn!(
                        session = %identity,
                        ?reason,
                        timeout = ?drain_timeout,
                        "drain timed out; dropping connection"
                    );
                }
                cell.advance(WorkerState::Stopped);
                info!(session = %identity, ?reason, "worker stopped");
                WorkerExit::Stopped {
                    reason,
                    was_connected: true,
                }
            }
            Err(error) => {
                if error.is_removal() {
                    info!(session = %identity, "session store removed; stopping worker");
                } else {
                    warn!(session = %identity, error = %error, "connection lost");
                }
                cell.advance(WorkerState::Faulted);
                conn.disconnect().await;
                cell.advance(WorkerState::Stopped);
                WorkerExit::Faulted {
                    error,
                    was_connected: true,
                }
            }
        }
    }
}

async fn open_connection(
    store: &StoreHandle,
    transport: &dyn Transport,
) -> Result<(Box<dyn Connection>, InboundStream)> {
    let credentials = store.credentials().await?;
    let mut conn = transport.connect(&credentials).await?;
    let inbound = conn.receive_stream()?;
    Ok((conn, inbound))
}

/// Resolve once a stop has been requested.
async fn stop_requested(rx: &mut watch::Receiver<Option<StopReason>>) -> StopReason {
    loop {
        if let Some(reason) = *rx.borrow_and_update() {
            return reason;
        }
        if rx.changed().await.is_err() {
            return StopReason::Shutdown;
        }
    }
}

/// Run one message through the router, containing errors and panics.
async fn dispatch(
    router: &CommandRouter,
    conn: &dyn Connection,
    message: &InboundMessage,
    identity: &SessionIdentity,
) -> Option<Dispatch> {
    match AssertUnwindSafe(router.handle(conn, message))
        .catch_unwind()
        .await
    {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(e)) => {
            warn!(session = %identity, error = %e, "command failed");
            None
        }
        Err(_) => {
            error!(session = %identity, "command handler panicked; message dropped");
            None
        }
    }
}

async fn drain(conn: &dyn Connection, reason: StopReason, identity: &SessionIdentity) {
    match reason {
        StopReason::Removed => {
            let notice = "This number was removed from the bot server.";
            if let Err(e) = conn.send_text(conn.own_id(), notice).await {
                debug!(session = %identity, error = %e, "removal notice not delivered");
            }
            if let Err(e) = conn.logout().await {
                warn!(session = %identity, error = %e, "logout failed");
            }
        }
        StopReason::Unlinked => {
            if let Err(e) = conn.logout().await {
                warn!(session = %identity, error = %e, "logout failed");
            }
        }
        StopReason::Shutdown => {}
    }
    conn.disconnect().await;
}
