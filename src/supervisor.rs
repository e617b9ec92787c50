//! Session supervisor.
//!
//! One task owns the registry of live workers. Every poll tick it compares
//! the identities that have durable credentials against the identities
//! with a running worker: new identities get a worker, vanished ones are
//! told to drain. Workers report their exit back over a channel; faulted
//! ones are restarted with exponential backoff.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::RelayError;
use crate::router::DEFAULT_PREFIX;
use crate::session::{SessionDirectory, SessionIdentity, WorkerState};
use crate::transport::Transport;
use crate::worker::{SessionWorker, StopReason, WorkerControl, WorkerExit};
use crate::Result;

/// Tunables for the supervisor loop.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub poll_interval: Duration,
    pub drain_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub prefix: char,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(300),
            prefix: DEFAULT_PREFIX,
        }
    }
}

impl SupervisorConfig {
    /// Delay before restart attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff.max(self.initial_backoff))
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<SessionIdentity>,
    pub removed: Vec<SessionIdentity>,
}

/// One registry row as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub identity: SessionIdentity,
    pub state: WorkerState,
}

/// Outcome of a supervisor shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that reached `Stopped` within the drain timeout.
    pub drained: usize,
    /// Workers aborted after the timeout.
    pub forced: Vec<SessionIdentity>,
}

enum Request {
    Reconcile(oneshot::Sender<Result<ReconcileReport>>),
    Snapshot(oneshot::Sender<Vec<SessionSummary>>),
    Worker(SessionIdentity, oneshot::Sender<Option<WorkerControl>>),
}

struct ExitEvent {
    identity: SessionIdentity,
    generation: u64,
    exit: WorkerExit,
}

struct Entry {
    generation: u64,
    control: WorkerControl,
    task: JoinHandle<()>,
}

/// A removed identity's worker that has been told to drain.
struct Draining {
    entry: Entry,
    /// Past this the task is aborted and the identity released.
    deadline: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Retry {
    attempts: u32,
    not_before: Instant,
}

/// Owns the worker registry. Build with [`Supervisor::new`], then
/// [`spawn`](Supervisor::spawn) it.
pub struct Supervisor {
    directory: SessionDirectory,
    transport: Arc<dyn Transport>,
    config: SupervisorConfig,
    live: HashMap<SessionIdentity, Entry>,
    draining: HashMap<SessionIdentity, Draining>,
    retries: HashMap<SessionIdentity, Retry>,
    parked: HashSet<SessionIdentity>,
    next_generation: u64,
    exits_tx: mpsc::UnboundedSender<ExitEvent>,
    exits_rx: mpsc::UnboundedReceiver<ExitEvent>,
}

impl Supervisor {
    pub fn new(
        directory: SessionDirectory,
        transport: Arc<dyn Transport>,
        config: SupervisorConfig,
    ) -> Self {
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        Self {
            directory,
            transport,
            config,
            live: HashMap::new(),
            draining: HashMap::new(),
            retries: HashMap::new(),
            parked: HashSet::new(),
            next_generation: 0,
            exits_tx,
            exits_rx,
        }
    }

    /// Start the supervisor loop on its own task.
    pub fn spawn(self) -> SupervisorHandle {
        let (requests_tx, requests_rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(self.run(requests_rx, shutdown.clone()));
        SupervisorHandle {
            requests: requests_tx,
            shutdown,
            task,
        }
    }

    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        shutdown: CancellationToken,
    ) -> ShutdownReport {
        info!(
            sessions_dir = %self.directory.sessions_dir().display(),
            poll_interval = ?self.config.poll_interval,
            "supervisor started"
        );
        let mut ticker = time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut requests_open = true;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile().await {
                        error!(error = %e, "session discovery failed; keeping current workers");
                    }
                }
                Some(event) = self.exits_rx.recv() => self.on_exit(event),
                request = requests.recv(), if requests_open => match request {
                    Some(request) => self.on_request(request).await,
                    None => requests_open = false,
                },
            }
        }

        self.drain().await
    }

    async fn on_request(&mut self, request: Request) {
        match request {
            Request::Reconcile(reply) => {
                let _ = reply.send(self.reconcile().await);
            }
            Request::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Request::Worker(identity, reply) => {
                let control = self.live.get(&identity).map(|e| e.control.clone());
                let _ = reply.send(control);
            }
        }
    }

    fn snapshot(&self) -> Vec<SessionSummary> {
        let mut rows: Vec<SessionSummary> = self
            .live
            .iter()
            .map(|(identity, entry)| SessionSummary {
                identity: identity.clone(),
                state: entry.control.state(),
            })
            .collect();
        rows.sort_by(|a, b| a.identity.cmp(&b.identity));
        rows
    }

    /// Bring the registry in line with the session directory.
    async fn reconcile(&mut self) -> Result<ReconcileReport> {
        self.reap_draining();
        let present: HashSet<SessionIdentity> =
            self.directory.list().await?.into_iter().collect();
        let mut report = ReconcileReport::default();

        let vanished: Vec<SessionIdentity> = self
            .live
            .keys()
            .filter(|id| !present.contains(*id))
            .cloned()
            .collect();
        for identity in vanished {
            if let Some(entry) = self.live.remove(&identity) {
                info!(session = %identity, "session removed from store; draining worker");
                entry.control.stop(StopReason::Removed);
                // The worker bounds its own drain; this is the backstop.
                let deadline = Instant::now() + self.config.drain_timeout.saturating_mul(2);
                self.draining
                    .insert(identity.clone(), Draining { entry, deadline });
                report.removed.push(identity);
            }
        }
        self.retries.retain(|id, _| present.contains(id));
        self.parked.retain(|id| present.contains(id));

        let now = Instant::now();
        let mut candidates: Vec<&SessionIdentity> = present
            .iter()
            .filter(|id| !self.live.contains_key(*id))
            .collect();
        candidates.sort();
        let mut to_start = Vec::new();
        for identity in candidates {
            if self.draining.contains_key(identity) || self.parked.contains(identity) {
                continue;
            }
            if self
                .retries
                .get(identity)
                .is_some_and(|retry| retry.not_before > now)
            {
                continue;
            }
            to_start.push(identity.clone());
        }

        for identity in to_start {
            match self.start_worker(&identity).await {
                Ok(()) => report.started.push(identity),
                Err(e) => warn!(session = %identity, error = %e, "could not start worker"),
            }
        }

        if !report.started.is_empty() || !report.removed.is_empty() {
            debug!(
                started = report.started.len(),
                removed = report.removed.len(),
                live = self.live.len(),
                "reconciled sessions"
            );
        }
        Ok(report)
    }

    /// Abort removed workers that outlived their drain deadline.
    fn reap_draining(&mut self) {
        let now = Instant::now();
        let expired: Vec<SessionIdentity> = self
            .draining
            .iter()
            .filter(|(_, draining)| draining.deadline <= now)
            .map(|(identity, _)| identity.clone())
            .collect();
        for identity in expired {
            if let Some(draining) = self.draining.remove(&identity) {
                warn!(session = %identity, "removed session did not drain in time; aborting");
                draining.entry.task.abort();
            }
        }
    }

    async fn start_worker(&mut self, identity: &SessionIdentity) -> Result<()> {
        let store = self.directory.open(identity).await?;
        let (worker, control) =
            SessionWorker::new(store, Arc::clone(&self.transport), self.config.prefix);
        let worker = worker.with_drain_timeout(self.config.drain_timeout);

        self.next_generation += 1;
        let generation = self.next_generation;
        let exits = self.exits_tx.clone();
        let reported = identity.clone();
        let task = tokio::spawn(async move {
            let exit = worker.run().await;
            let _ = exits.send(ExitEvent {
                identity: reported,
                generation,
                exit,
            });
        });

        info!(session = %identity, generation, "worker started");
        self.live.insert(
            identity.clone(),
            Entry {
                generation,
                control,
                task,
            },
        );
        Ok(())
    }

    fn on_exit(&mut self, event: ExitEvent) {
        let ExitEvent {
            identity,
            generation,
            exit,
        } = event;

        if self
            .draining
            .get(&identity)
            .is_some_and(|d| d.entry.generation == generation)
        {
            self.draining.remove(&identity);
            info!(session = %identity, "removed session drained");
            return;
        }
        if !self
            .live
            .get(&identity)
            .is_some_and(|e| e.generation == generation)
        {
            debug!(session = %identity, generation, "ignoring stale worker exit");
            return;
        }
        self.live.remove(&identity);

        match exit {
            WorkerExit::Stopped {
                reason: StopReason::Unlinked,
                ..
            } => {
                info!(session = %identity, "account unlinked itself; not restarting");
                self.retries.remove(&identity);
                self.parked.insert(identity);
            }
            WorkerExit::Stopped { reason, .. } => {
                debug!(session = %identity, ?reason, "worker stopped");
            }
            WorkerExit::Faulted { error, .. } if error.is_removal() => {
                info!(session = %identity, "worker stopped after session removal");
                self.retries.remove(&identity);
            }
            WorkerExit::Faulted {
                error,
                was_connected,
            } => {
                let attempts = match self.retries.get(&identity) {
                    Some(retry) if !was_connected => retry.attempts.saturating_add(1),
                    _ => 1,
                };
                let delay = self.config.backoff_for(attempts);
                warn!(
                    session = %identity,
                    error = %error,
                    attempt = attempts,
                    retry_in = ?delay,
                    "worker faulted; scheduling restart"
                );
                self.retries.insert(
                    identity,
                    Retry {
                        attempts,
                        not_before: Instant::now() + delay,
                    },
                );
            }
        }
    }

    /// Signal every worker to drain and wait for them, bounded.
    async fn drain(mut self) -> ShutdownReport {
        let mut entries: Vec<(SessionIdentity, Entry)> = self.live.drain().collect();
        entries.extend(self.draining.drain().map(|(id, d)| (id, d.entry)));
        info!(workers = entries.len(), "supervisor shutting down");

        for (_, entry) in &entries {
            entry.control.stop(StopReason::Shutdown);
        }

        let deadline = Instant::now() + self.config.drain_timeout;
        let mut report = ShutdownReport::default();
        for (identity, mut entry) in entries {
            match time::timeout_at(deadline, &mut entry.task).await {
                Ok(_) => report.drained += 1,
                Err(_) => {
                    warn!(session = %identity, "worker did not drain in time; aborting");
                    entry.task.abort();
                    report.forced.push(identity);
                }
            }
        }
        info!(
            drained = report.drained,
            forced = report.forced.len(),
            "supervisor stopped"
        );
        report
    }
}

/// Client side of a running supervisor.
pub struct SupervisorHandle {
    requests: mpsc::Sender<Request>,
    shutdown: CancellationToken,
    task: JoinHandle<ShutdownReport>,
}

impl SupervisorHandle {
    async fn ask<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(build(tx))
            .await
            .map_err(|_| RelayError::ChannelClosed)?;
        rx.await.map_err(|_| RelayError::ChannelClosed)
    }

    /// Run a reconciliation pass now instead of waiting for the next tick.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.ask(Request::Reconcile).await?
    }

    /// Identities with a registered worker and their current state.
    pub async fn sessions(&self) -> Result<Vec<SessionSummary>> {
        self.ask(Request::Snapshot).await
    }

    /// Control for the registered worker of `identity`, if any.
    pub async fn worker(&self, identity: &SessionIdentity) -> Result<Option<WorkerControl>> {
        let identity = identity.clone();
        self.ask(|reply| Request::Worker(identity, reply)).await
    }

    /// Token that stops the supervisor when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Drain every worker and wait for the supervisor to exit.
    pub async fn shutdown(self) -> Result<ShutdownReport> {
        self.shutdown.cancel();
        self.task.await.map_err(|e| {
            error!(error = %e, "supervisor task failed");
            RelayError::ChannelClosed
        })
    }
}
