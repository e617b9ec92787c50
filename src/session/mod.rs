//! Session management module.
//!
//! This module provides types for identifying linked accounts, tracking
//! worker lifecycle state, and the durable per-session store.

mod id;
mod state;
mod store;

pub use id::{SessionIdentity, MAX_IDENTITY_LEN};
pub use state::WorkerState;
pub use store::{
    purge_expired, snippet_of, Credentials, PendingSession, SessionDirectory, StatusEntry,
    StoreHandle, CREDENTIALS_EXT, DEFAULT_RETENTION, LEDGER_EXT, SNIPPET_CHARS,
};
