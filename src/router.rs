//! Text command parsing and dispatch.
//!
//! Commands are plain chat messages starting with a one-character prefix
//! (default `.`):
//!
//! - `.status <text>`: post a status broadcast and record it in the ledger
//! - `.list`: list active statuses, numbered from 1
//! - `.delete <n>`: revoke the n-th status from the list
//! - `.stopbot`: say goodbye and unlink this session
//!
//! Only the account's own messages are obeyed. Everything else, and any
//! text that is not a recognised command, is ignored without a reply.

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::error::RelayError;
use crate::session::{StatusEntry, StoreHandle};
use crate::transport::{ChatId, Connection, InboundMessage, RemoteId};
use crate::Result;

/// Default command prefix.
pub const DEFAULT_PREFIX: char = '.';

/// A recognised command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Post the text as a status.
    Status(String),
    List,
    /// Delete by 1-based position; the raw argument is validated later.
    Delete(Option<String>),
    StopBot,
}

impl Command {
    /// Parse `text` against `prefix`. Returns `None` for anything that is
    /// not a command.
    pub fn parse(text: &str, prefix: char) -> Option<Self> {
        let body = text.strip_prefix(prefix)?;

        if let Some(content) = body.strip_prefix("status ") {
            if content.trim().is_empty() {
                return None;
            }
            return Some(Self::Status(content.to_string()));
        }

        match body.trim_end() {
            "list" => Some(Self::List),
            "stopbot" => Some(Self::StopBot),
            "delete" => Some(Self::Delete(None)),
            other => {
                let arg = other.strip_prefix("delete")?;
                if !arg.starts_with(char::is_whitespace) {
                    return None;
                }
                Some(Self::Delete(arg.split_whitespace().next().map(str::to_string)))
            }
        }
    }

    /// Verb name for logging.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::List => "list",
            Self::Delete(_) => "delete",
            Self::StopBot => "stopbot",
        }
    }
}

/// Bad command argument. The message is sent back to the chat.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Please specify a number. Example: {prefix}delete 1")]
    MissingNumber { prefix: char },

    #[error("Please enter a valid number.")]
    NotANumber(String),

    #[error("Invalid number. Check {prefix}list")]
    InvalidNumber { prefix: char },
}

/// What the router did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Not for us; nothing was sent.
    Ignored,
    /// Command handled and answered.
    Replied,
    /// `stopbot`: the worker should unlink and stop.
    Stop,
}

/// Per-session command dispatcher.
#[derive(Debug, Clone)]
pub struct CommandRouter {
    prefix: char,
    store: StoreHandle,
}

impl CommandRouter {
    pub fn new(store: StoreHandle, prefix: char) -> Self {
        Self { prefix, store }
    }

    pub fn prefix(&self) -> char {
        self.prefix
    }

    /// Only the linked account itself may drive its session.
    pub fn is_authorized(me: &ChatId, message: &InboundMessage) -> bool {
        message.from_me || message.sender.user() == me.user()
    }

    /// Handle one inbound message.
    ///
    /// Argument errors are answered in chat and reported as `Replied`.
    /// `Err` is reserved for store and reply-delivery failures.
    pub async fn handle(
        &self,
        conn: &dyn Connection,
        message: &InboundMessage,
    ) -> Result<Dispatch> {
        if !Self::is_authorized(conn.own_id(), message) {
            trace!(session = %self.store.identity(), sender = %message.sender, "ignoring foreign message");
            return Ok(Dispatch::Ignored);
        }
        let Some(text) = message.text() else {
            return Ok(Dispatch::Ignored);
        };
        let Some(command) = Command::parse(text, self.prefix) else {
            return Ok(Dispatch::Ignored);
        };

        debug!(session = %self.store.identity(), command = command.verb(), "dispatching command");
        let chat = &message.chat;
        match command {
            Command::Status(content) => self.post_status(conn, chat, &content).await,
            Command::List => self.list_statuses(conn, chat).await,
            Command::Delete(arg) => self.delete_status(conn, chat, arg.as_deref()).await,
            Command::StopBot => {
                reply(conn, chat, "Disconnecting from bot server...").await?;
                Ok(Dispatch::Stop)
            }
        }
    }

    async fn post_status(&self, conn: &dyn Connection, chat: &ChatId, content: &str) -> Result<Dispatch> {
        let remote_id = match conn.send_text(&ChatId::status_broadcast(), content).await {
            Ok(id) => id,
            Err(e) => {
                warn!(session = %self.store.identity(), error = %e, "status post failed");
                reply(conn, chat, &format!("Could not post status: {e}")).await?;
                return Ok(Dispatch::Replied);
            }
        };

        let entry = StatusEntry::new(remote_id.as_str(), content, Utc::now());
        let count = self.store.append_entry(entry).await?;
        reply(conn, chat, &format!("Posted! (status #{count})")).await?;
        Ok(Dispatch::Replied)
    }

    async fn list_statuses(&self, conn: &dyn Connection, chat: &ChatId) -> Result<Dispatch> {
        let ledger = self.store.load_ledger().await?;
        if ledger.is_empty() {
            reply(conn, chat, "You have no active statuses.").await?;
            return Ok(Dispatch::Replied);
        }

        let mut text = String::from("Active statuses:\n");
        for (index, entry) in ledger.iter().enumerate() {
            text.push_str(&format!("{}. {}\n", index + 1, entry.snippet));
        }
        text.push_str(&format!(
            "\nTo delete, send {p}delete <number> (e.g. {p}delete 1)",
            p = self.prefix
        ));
        reply(conn, chat, &text).await?;
        Ok(Dispatch::Replied)
    }

    /// Validate a raw delete argument into a 1-based position.
    ///
    /// Range against the ledger is checked by the store.
    pub fn parse_position(&self, arg: Option<&str>) -> std::result::Result<usize, CommandError> {
        let raw = arg.ok_or(CommandError::MissingNumber {
            prefix: self.prefix,
        })?;
        let invalid = CommandError::InvalidNumber {
            prefix: self.prefix,
        };
        let n: i64 = match raw.parse() {
            Ok(n) => n,
            // Too large for any ledger, but still a number.
            Err(_) if is_integer_literal(raw) => return Err(invalid),
            Err(_) => return Err(CommandError::NotANumber(raw.to_string())),
        };
        usize::try_from(n)
            .ok()
            .filter(|&n| n >= 1)
            .ok_or(invalid)
    }

    async fn delete_status(
        &self,
        conn: &dyn Connection,
        chat: &ChatId,
        arg: Option<&str>,
    ) -> Result<Dispatch> {
        let position = match self.parse_position(arg) {
            Ok(position) => position,
            Err(e) => {
                reply(conn, chat, &e.to_string()).await?;
                return Ok(Dispatch::Replied);
            }
        };

        let entry = match self.store.remove_entry_at(position).await {
            Ok(entry) => entry,
            Err(RelayError::OutOfRange { .. }) => {
                let e = CommandError::InvalidNumber {
                    prefix: self.prefix,
                };
                reply(conn, chat, &e.to_string()).await?;
                return Ok(Dispatch::Replied);
            }
            Err(e) => return Err(e),
        };

        let remote_id = RemoteId::new(entry.remote_id);
        match conn.revoke(&ChatId::status_broadcast(), &remote_id).await {
            Ok(()) => reply(conn, chat, &format!("Deleted status #{position}")).await?,
            Err(e) => {
                warn!(session = %self.store.identity(), error = %e, remote_id = %remote_id, "revoke failed");
                reply(
                    conn,
                    chat,
                    &format!("Removed status #{position} from the list, but revoking it failed: {e}"),
                )
                .await?
            }
        }
        Ok(Dispatch::Replied)
    }
}

fn is_integer_literal(raw: &str) -> bool {
    let digits = raw.strip_prefix(['+', '-']).unwrap_or(raw);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

async fn reply(conn: &dyn Connection, chat: &ChatId, text: &str) -> Result<()> {
    conn.send_text(chat, text).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionDirectory, SessionIdentity};
    use crate::transport::{LoopbackTransport, MessageContent, Transport};
    use tempfile::TempDir;

    const USER: &str = "2348012345678";

    struct Fixture {
        _tmp: TempDir,
        transport: LoopbackTransport,
        conn: Box<dyn Connection>,
        router: CommandRouter,
    }

    impl Fixture {
        async fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let dir = SessionDirectory::init(tmp.path().join("s"), tmp.path().join("h"))
                .await
                .unwrap();
            let store = dir
                .create(&SessionIdentity::new("david").unwrap())
                .await
                .unwrap()
                .commit(&LoopbackTransport::credentials_for(USER))
                .await
                .unwrap();
            let transport = LoopbackTransport::new();
            let conn = transport
                .connect(&store.credentials().await.unwrap())
                .await
                .unwrap();
            Self {
                _tmp: tmp,
                transport,
                conn,
                router: CommandRouter::new(store, DEFAULT_PREFIX),
            }
        }

        async fn send(&self, text: &str) -> Dispatch {
            let msg = InboundMessage::note_to_self(self.conn.own_id(), text);
            self.router.handle(self.conn.as_ref(), &msg).await.unwrap()
        }

        fn last_reply(&self) -> String {
            self.transport
                .sent(USER)
                .into_iter()
                .filter(|m| !m.to.is_status_broadcast())
                .last()
                .map(|m| m.text)
                .unwrap_or_default()
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse(".status Hello world", '.'),
            Some(Command::Status("Hello world".into()))
        );
        assert_eq!(Command::parse(".list", '.'), Some(Command::List));
        assert_eq!(Command::parse(".list  ", '.'), Some(Command::List));
        assert_eq!(Command::parse(".stopbot", '.'), Some(Command::StopBot));
        assert_eq!(Command::parse(".delete", '.'), Some(Command::Delete(None)));
        assert_eq!(
            Command::parse(".delete 3 extra", '.'),
            Some(Command::Delete(Some("3".into())))
        );
        assert_eq!(
            Command::parse("!list", '!'),
            Some(Command::List)
        );
    }

    #[test]
    fn test_parse_ignores_non_commands() {
        assert_eq!(Command::parse("hello", '.'), None);
        assert_eq!(Command::parse("list", '.'), None);
        assert_eq!(Command::parse(".status ", '.'), None);
        assert_eq!(Command::parse(".status    ", '.'), None);
        assert_eq!(Command::parse(".statusHello", '.'), None);
        assert_eq!(Command::parse(".deleted 1", '.'), None);
        assert_eq!(Command::parse(".listing", '.'), None);
        assert_eq!(Command::parse(".list", '!'), None);
    }

    #[tokio::test]
    async fn test_parse_position() {
        let fx = Fixture::new().await;
        assert_eq!(fx.router.parse_position(Some("2")), Ok(2));
        assert!(matches!(
            fx.router.parse_position(None),
            Err(CommandError::MissingNumber { .. })
        ));
        assert!(matches!(
            fx.router.parse_position(Some("two")),
            Err(CommandError::NotANumber(_))
        ));
        assert!(matches!(
            fx.router.parse_position(Some("0")),
            Err(CommandError::InvalidNumber { .. })
        ));
        assert!(matches!(
            fx.router.parse_position(Some("-1")),
            Err(CommandError::InvalidNumber { .. })
        ));
        // Overflowing integers are numbers, just never a valid position
        for huge in ["99999999999999999999", "-99999999999999999999", "+99999999999999999999"] {
            assert!(matches!(
                fx.router.parse_position(Some(huge)),
                Err(CommandError::InvalidNumber { .. })
            ));
        }
        for junk in ["-", "+", "1e3", "12a", "--1"] {
            assert!(matches!(
                fx.router.parse_position(Some(junk)),
                Err(CommandError::NotANumber(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_status_list_delete_flow() {
        let fx = Fixture::new().await;

        assert_eq!(fx.send(".status Hello").await, Dispatch::Replied);
        assert_eq!(fx.last_reply(), "Posted! (status #1)");
        let posted = fx.transport.sent(USER);
        assert!(posted[0].to.is_status_broadcast());
        assert_eq!(posted[0].text, "Hello");

        fx.send(".list").await;
        assert!(fx.last_reply().contains("1. Hello..."));

        fx.send(".delete 1").await;
        assert_eq!(fx.last_reply(), "Deleted status #1");
        let revoked = fx.transport.revoked(USER);
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].1, posted[0].id);

        fx.send(".list").await;
        assert_eq!(fx.last_reply(), "You have no active statuses.");

        fx.send(".delete 1").await;
        assert_eq!(fx.last_reply(), "Invalid number. Check .list");
    }

    #[tokio::test]
    async fn test_delete_argument_errors_reply() {
        let fx = Fixture::new().await;

        fx.send(".delete").await;
        assert_eq!(fx.last_reply(), "Please specify a number. Example: .delete 1");

        fx.send(".delete abc").await;
        assert_eq!(fx.last_reply(), "Please enter a valid number.");

        fx.send(".delete 99999999999999999999").await;
        assert_eq!(fx.last_reply(), "Invalid number. Check .list");
    }

    #[tokio::test]
    async fn test_post_failure_replies_and_keeps_ledger() {
        let fx = Fixture::new().await;
        fx.transport.fail_sends(USER, true);

        // Reply delivery fails too, so the error surfaces to the caller
        let msg = InboundMessage::note_to_self(fx.conn.own_id(), ".status Hi");
        assert!(fx.router.handle(fx.conn.as_ref(), &msg).await.is_err());
        fx.transport.fail_sends(USER, false);

        fx.send(".list").await;
        assert_eq!(fx.last_reply(), "You have no active statuses.");
    }

    #[tokio::test]
    async fn test_foreign_sender_ignored() {
        let fx = Fixture::new().await;
        let stranger = ChatId::account("15550009999");
        let msg = InboundMessage::new(
            stranger.clone(),
            stranger,
            false,
            Some(MessageContent::plain(".status pwned")),
        );

        let outcome = fx.router.handle(fx.conn.as_ref(), &msg).await.unwrap();
        assert_eq!(outcome, Dispatch::Ignored);
        assert!(fx.transport.sent(USER).is_empty());
    }

    #[tokio::test]
    async fn test_plain_chatter_ignored() {
        let fx = Fixture::new().await;
        assert_eq!(fx.send("see you tomorrow").await, Dispatch::Ignored);
        assert!(fx.transport.sent(USER).is_empty());
    }

    #[tokio::test]
    async fn test_stopbot_replies_then_stops() {
        let fx = Fixture::new().await;
        assert_eq!(fx.send(".stopbot").await, Dispatch::Stop);
        assert_eq!(fx.last_reply(), "Disconnecting from bot server...");
        // Logout is the worker's job
        assert!(!fx.transport.is_logged_out(USER));
    }

    #[tokio::test]
    async fn test_long_status_snippet() {
        let fx = Fixture::new().await;
        fx.send(".status The quick brown fox jumps over the lazy dog").await;
        fx.send(".list").await;
        assert!(fx.last_reply().contains("1. The quick brown fox ..."));
    }
}
