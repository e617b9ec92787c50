//! Transport capability.
//!
//! The relay never speaks the messaging protocol itself. Pairing, the
//! encrypted channel and message framing live behind [`Transport`] and
//! [`Connection`]; this crate only drives them.
//!
//! ## Backends
//!
//! - [`LoopbackTransport`]: in-process backend with a controllable fake
//!   remote service. Used by the test suite and for local dry runs.

pub mod loopback;
mod message;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::sync::oneshot;

use crate::session::Credentials;
use crate::Result;

pub use loopback::{ConnectFailure, LoopbackTransport, SentMessage};
pub use message::{ChatId, InboundMessage, MessageContent, RemoteId, MAX_UNWRAP_DEPTH, USER_SERVER};

/// Lazy, unbounded sequence of inbound messages.
///
/// An `Err` item or the end of the stream means the connection is gone;
/// the stream cannot be restarted.
pub type InboundStream = BoxStream<'static, Result<InboundMessage>>;

/// A pairing handshake in progress.
pub struct PairingTicket {
    /// Code the operator types on the phone.
    pub code: String,
    /// Resolves once the phone confirms the link, or the handshake fails.
    pub linked: oneshot::Receiver<Result<Credentials>>,
}

/// Factory for authenticated connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin linking `phone` as a new device called `display_name`.
    ///
    /// Fails with `Pairing` if the handshake cannot be started.
    async fn pair(&self, phone: &str, display_name: &str) -> Result<PairingTicket>;

    /// Open a connection with stored credentials.
    ///
    /// Fails with `Auth` for bad or revoked credentials and `Network` for
    /// transient failures.
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Connection>>;
}

/// One live authenticated connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// The linked account this connection acts as.
    fn own_id(&self) -> &ChatId;

    /// Take the inbound stream. Only the first call succeeds.
    fn receive_stream(&mut self) -> Result<InboundStream>;

    /// Send `text` to `to`, returning the id needed to revoke it later.
    async fn send_text(&self, to: &ChatId, text: &str) -> Result<RemoteId>;

    /// Ask the remote service to delete a previously sent message.
    async fn revoke(&self, chat: &ChatId, remote_id: &RemoteId) -> Result<()>;

    /// Unlink this device; the stored credentials become useless.
    async fn logout(&self) -> Result<()>;

    /// Close the connection, keeping the device linked.
    async fn disconnect(&self);
}
