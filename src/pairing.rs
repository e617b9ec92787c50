//! One-shot pairing of a new identity.
//!
//! The identity is reserved in the session directory first, then the
//! transport handshake runs. Credentials only become discoverable once the
//! phone confirms the link; every other outcome (transport failure,
//! timeout, operator abort) drops the reservation.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::RelayError;
use crate::session::{SessionDirectory, SessionIdentity, StoreHandle};
use crate::transport::Transport;
use crate::Result;

/// How long to wait for the phone to confirm, by default.
pub const DEFAULT_PAIRING_TIMEOUT: Duration = Duration::from_secs(300);

/// Name the linked device shows on the phone, by default.
pub const DEFAULT_DISPLAY_NAME: &str = "Status Relay";

const MIN_PHONE_DIGITS: usize = 7;
const MAX_PHONE_DIGITS: usize = 15;

/// Inputs for one pairing run.
#[derive(Debug, Clone)]
pub struct PairingRequest {
    pub identity: SessionIdentity,
    pub phone: String,
    pub display_name: String,
}

impl PairingRequest {
    pub fn new(identity: SessionIdentity, phone: impl Into<String>) -> Self {
        Self {
            identity,
            phone: phone.into(),
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }
}

/// Reduce a phone number to its digits, accepting common separators.
///
/// `+1 (555) 010-9999` becomes `15550109999`.
pub fn normalize_phone(raw: &str) -> Result<String> {
    let mut digits = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        match c {
            '0'..='9' => digits.push(c),
            '+' | ' ' | '-' | '(' | ')' => {}
            _ => {
                return Err(RelayError::Pairing(format!(
                    "phone number contains '{c}'; use digits only"
                )))
            }
        }
    }
    if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len()) {
        return Err(RelayError::Pairing(format!(
            "phone number must have {MIN_PHONE_DIGITS}-{MAX_PHONE_DIGITS} digits including country code"
        )));
    }
    Ok(digits)
}

/// Drives a single pairing to completion or full rollback.
pub struct PairingFlow {
    directory: SessionDirectory,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl PairingFlow {
    pub fn new(directory: SessionDirectory, transport: Arc<dyn Transport>) -> Self {
        Self {
            directory,
            transport,
            timeout: DEFAULT_PAIRING_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pair `request.identity`.
    ///
    /// `on_code` receives the pairing code as soon as the transport issues
    /// it. Cancelling `abort` at any point rolls back like a failure and
    /// yields [`RelayError::Aborted`].
    pub async fn run(
        &self,
        request: PairingRequest,
        on_code: impl FnOnce(&str),
        abort: CancellationToken,
    ) -> Result<StoreHandle> {
        let phone = normalize_phone(&request.phone)?;
        let pending = self.directory.create(&request.identity).await?;
        let identity = pending.identity().clone();
        info!(session = %identity, "pairing started");

        let ticket = tokio::select! {
            _ = abort.cancelled() => Err(RelayError::Aborted),
            ticket = self.transport.pair(&phone, &request.display_name) => ticket,
        };
        let ticket = match ticket {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!(session = %identity, error = %e, "pairing could not start; rolled back");
                pending.rollback().await?;
                return Err(e);
            }
        };
        on_code(&ticket.code);

        let linked = tokio::select! {
            _ = abort.cancelled() => Err(RelayError::Aborted),
            _ = tokio::time::sleep(self.timeout) => Err(RelayError::Timeout),
            outcome = ticket.linked => match outcome {
                Ok(result) => result,
                Err(_) => Err(RelayError::Pairing("transport dropped the handshake".into())),
            },
        };

        match linked {
            Ok(credentials) => {
                let store = pending.commit(&credentials).await?;
                info!(session = %identity, "pairing complete");
                Ok(store)
            }
            Err(e) => {
                warn!(session = %identity, error = %e, "pairing failed; rolled back");
                pending.rollback().await?;
                Err(e)
            }
        }
    }
}
