//! # status-relay
//!
//! Multi-session supervisor for linked messaging accounts.
//!
//! Every paired account gets its own long-lived worker with a durable
//! credential store, a status ledger and a small chat command set
//! (`.status`, `.list`, `.delete`, `.stopbot`). A single supervisor
//! discovers accounts from the session directory, starts and drains
//! workers as accounts come and go, and restarts faulted ones with
//! backoff without disturbing their siblings.
//!
//! ## Features
//!
//! - **Session isolation**: one task, one connection, one store per account
//! - **Hot add/remove**: dropping a credentials file unlinks the account
//! - **Fault isolation**: a bad message never takes a session down
//! - **Pluggable transport**: the protocol client sits behind [`Transport`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use status_relay::{LoopbackTransport, SessionDirectory, Supervisor, SupervisorConfig};
//!
//! #[tokio::main]
//! async fn main() -> status_relay::Result<()> {
//!     status_relay::logging::try_init().ok();
//!
//!     let directory = SessionDirectory::init("sessions", "history").await?;
//!     let transport = Arc::new(LoopbackTransport::new());
//!
//!     let handle = Supervisor::new(directory, transport, SupervisorConfig::default()).spawn();
//!     tokio::signal::ctrl_c().await?;
//!
//!     let report = handle.shutdown().await?;
//!     println!("drained {} workers", report.drained);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod pairing;
pub mod router;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod worker;

// Re-export commonly used types
pub use error::{RelayError, Result};
pub use pairing::{normalize_phone, PairingFlow, PairingRequest};
pub use router::{Command, CommandError, CommandRouter, Dispatch};
pub use session::{
    Credentials, SessionDirectory, SessionIdentity, StatusEntry, StoreHandle, WorkerState,
};
pub use supervisor::{
    ReconcileReport, SessionSummary, ShutdownReport, Supervisor, SupervisorConfig,
    SupervisorHandle,
};
pub use transport::{
    ChatId, Connection, InboundMessage, LoopbackTransport, MessageContent, Transport,
};
pub use worker::{SessionWorker, StopReason, WorkerControl, WorkerExit};
