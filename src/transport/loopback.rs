//! In-process transport backend.
//!
//! `LoopbackTransport` stands in for the remote service: it issues pairing
//! codes, hands out connections, records everything sent or revoked, and
//! lets the caller inject inbound messages and faults. All clones share
//! one hub.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use super::{ChatId, Connection, InboundMessage, InboundStream, PairingTicket, RemoteId, Transport};
use crate::error::RelayError;
use crate::session::Credentials;
use crate::Result;

const CREDENTIALS_PREFIX: &str = "loopback:";

/// Failure to inject into the next `connect` for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    Auth,
    Network,
}

/// A message recorded by the loopback hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: ChatId,
    pub text: String,
    pub id: RemoteId,
}

struct Pairing {
    user: String,
    done: oneshot::Sender<Result<Credentials>>,
}

#[derive(Default)]
struct Account {
    inbound: Option<mpsc::UnboundedSender<Result<InboundMessage>>>,
    generation: u64,
    connects: usize,
    logged_out: bool,
    failing_sends: bool,
    stalled: bool,
    connect_failures: VecDeque<ConnectFailure>,
    sent: Vec<SentMessage>,
    revoked: Vec<(ChatId, RemoteId)>,
}

#[derive(Default)]
struct Hub {
    auto_link: bool,
    next_code: u32,
    next_message: u64,
    pairings: HashMap<String, Pairing>,
    accounts: HashMap<String, Account>,
}

impl Hub {
    fn account(&mut self, user: &str) -> &mut Account {
        self.accounts.entry(user.to_string()).or_default()
    }
}

/// In-process [`Transport`].
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Confirm every pairing as soon as its code is issued.
    pub fn auto_linking(self) -> Self {
        self.lock().auto_link = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        // The hub holds no invariants a panicking holder could break.
        self.hub.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Credentials the hub accepts for `user`.
    pub fn credentials_for(user: &str) -> Credentials {
        Credentials::new(format!("{CREDENTIALS_PREFIX}{user}").into_bytes())
    }

    fn user_of(credentials: &Credentials) -> Result<String> {
        std::str::from_utf8(credentials.as_bytes())
            .ok()
            .and_then(|s| s.strip_prefix(CREDENTIALS_PREFIX))
            .filter(|user| !user.is_empty())
            .map(str::to_string)
            .ok_or_else(|| RelayError::Auth("unrecognised credentials".into()))
    }

    /// Codes issued by [`Transport::pair`] that are still waiting.
    pub fn pending_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.lock().pairings.keys().cloned().collect();
        codes.sort();
        codes
    }

    /// Simulate the phone accepting `code`. Returns false for unknown codes.
    pub fn confirm_pairing(&self, code: &str) -> bool {
        let Some(pairing) = self.lock().pairings.remove(code) else {
            return false;
        };
        let _ = pairing
            .done
            .send(Ok(Self::credentials_for(&pairing.user)));
        true
    }

    /// Simulate the handshake failing for `code`.
    pub fn reject_pairing(&self, code: &str, reason: &str) -> bool {
        let Some(pairing) = self.lock().pairings.remove(code) else {
            return false;
        };
        let _ = pairing.done.send(Err(RelayError::Pairing(reason.to_string())));
        true
    }

    /// Push a message into `user`'s live connection.
    ///
    /// Returns false if the account has no open inbound stream.
    pub fn deliver(&self, user: &str, message: InboundMessage) -> bool {
        let mut hub = self.lock();
        let account = hub.account(user);
        match &account.inbound {
            Some(tx) => tx.send(Ok(message)).is_ok(),
            None => false,
        }
    }

    /// Deliver a "note to self" text from `user`.
    pub fn deliver_text(&self, user: &str, text: &str) -> bool {
        self.deliver(user, InboundMessage::note_to_self(&ChatId::account(user), text))
    }

    /// Break `user`'s live connection with a network error.
    pub fn sever(&self, user: &str) -> bool {
        let mut hub = self.lock();
        match hub.account(user).inbound.take() {
            Some(tx) => tx
                .send(Err(RelayError::Network("connection reset".into())))
                .is_ok(),
            None => false,
        }
    }

    /// Make the next `connect` for `user` fail.
    pub fn fail_next_connect(&self, user: &str, failure: ConnectFailure) {
        self.lock()
            .account(user)
            .connect_failures
            .push_back(failure);
    }

    /// Toggle send failures for `user`.
    pub fn fail_sends(&self, user: &str, failing: bool) {
        self.lock().account(user).failing_sends = failing;
    }

    /// Make sends, revokes and logout for `user` hang until cleared.
    pub fn stall(&self, user: &str, stalled: bool) {
        self.lock().account(user).stalled = stalled;
    }

    pub fn sent(&self, user: &str) -> Vec<SentMessage> {
        self.lock().account(user).sent.clone()
    }

    pub fn revoked(&self, user: &str) -> Vec<(ChatId, RemoteId)> {
        self.lock().account(user).revoked.clone()
    }

    pub fn is_logged_out(&self, user: &str) -> bool {
        self.lock().account(user).logged_out
    }

    pub fn is_connected(&self, user: &str) -> bool {
        self.lock()
            .account(user)
            .inbound
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    pub fn connect_count(&self, user: &str) -> usize {
        self.lock().account(user).connects
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn pair(&self, phone: &str, _display_name: &str) -> Result<PairingTicket> {
        if phone.is_empty() {
            return Err(RelayError::Pairing("phone number is empty".into()));
        }

        let (done, linked) = oneshot::channel();
        let mut hub = self.lock();
        hub.next_code += 1;
        let code = format!("LOOP-{:04}", hub.next_code);
        hub.account(phone).logged_out = false;

        if hub.auto_link {
            let _ = done.send(Ok(Self::credentials_for(phone)));
        } else {
            hub.pairings.insert(
                code.clone(),
                Pairing {
                    user: phone.to_string(),
                    done,
                },
            );
        }
        debug!(phone, code = %code, "loopback pairing started");
        Ok(PairingTicket { code, linked })
    }

    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Connection>> {
        let user = Self::user_of(credentials)?;
        let mut hub = self.lock();
        let account = hub.account(&user);

        if account.logged_out {
            return Err(RelayError::Auth(format!("device for {user} was logged out")));
        }
        match account.connect_failures.pop_front() {
            Some(ConnectFailure::Auth) => {
                return Err(RelayError::Auth(format!("credentials for {user} rejected")))
            }
            Some(ConnectFailure::Network) => {
                return Err(RelayError::Network("connection refused".into()))
            }
            None => {}
        }

        let (tx, rx) = mpsc::unbounded_channel();
        account.inbound = Some(tx);
        account.generation += 1;
        account.connects += 1;
        let generation = account.generation;
        debug!(user = %user, generation, "loopback connection opened");

        Ok(Box::new(LoopbackConnection {
            hub: Arc::clone(&self.hub),
            me: ChatId::account(&user),
            user,
            generation,
            inbound: Some(rx),
        }))
    }
}

struct LoopbackConnection {
    hub: Arc<Mutex<Hub>>,
    me: ChatId,
    user: String,
    generation: u64,
    inbound: Option<mpsc::UnboundedReceiver<Result<InboundMessage>>>,
}

impl LoopbackConnection {
    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Park forever while the account is stalled.
    async fn stall_point(&self) {
        let stalled = self.lock().account(&self.user).stalled;
        if stalled {
            trace!(user = %self.user, "loopback call stalled");
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl Connection for LoopbackConnection {
    fn own_id(&self) -> &ChatId {
        &self.me
    }

    fn receive_stream(&mut self) -> Result<InboundStream> {
        let rx = self
            .inbound
            .take()
            .ok_or_else(|| RelayError::Network("inbound stream already taken".into()))?;
        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn send_text(&self, to: &ChatId, text: &str) -> Result<RemoteId> {
        self.stall_point().await;
        let mut hub = self.lock();
        hub.next_message += 1;
        let id = RemoteId::new(format!("3EB0{:012X}", hub.next_message));
        let account = hub.account(&self.user);

        if account.logged_out {
            return Err(RelayError::Auth("device logged out".into()));
        }
        if account.failing_sends {
            return Err(RelayError::Send(format!("delivery to {to} failed")));
        }
        trace!(user = %self.user, to = %to, "loopback send");
        account.sent.push(SentMessage {
            to: to.clone(),
            text: text.to_string(),
            id: id.clone(),
        });
        Ok(id)
    }

    async fn revoke(&self, chat: &ChatId, remote_id: &RemoteId) -> Result<()> {
        self.stall_point().await;
        let mut hub = self.lock();
        let account = hub.account(&self.user);
        if account.failing_sends {
            return Err(RelayError::Revoke(format!("could not revoke {remote_id}")));
        }
        account.revoked.push((chat.clone(), remote_id.clone()));
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.stall_point().await;
        let mut hub = self.lock();
        let account = hub.account(&self.user);
        account.logged_out = true;
        account.inbound = None;
        debug!(user = %self.user, "loopback device logged out");
        Ok(())
    }

    async fn disconnect(&self) {
        let mut hub = self.lock();
        let account = hub.account(&self.user);
        if account.generation == self.generation {
            account.inbound = None;
        }
    }
}
