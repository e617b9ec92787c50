//! Inbound message model and chat addressing.

use std::fmt;
use std::str::FromStr;

use crate::error::RelayError;

/// Server part of an ordinary user account address.
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Wrapper nesting followed by [`MessageContent::text`] before giving up.
pub const MAX_UNWRAP_DEPTH: usize = 4;

/// Address of a chat or account, displayed as `user@server`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatId {
    user: String,
    server: String,
}

impl ChatId {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
        }
    }

    /// Address of an ordinary user account.
    pub fn account(user: impl Into<String>) -> Self {
        Self::new(user, USER_SERVER)
    }

    /// The reserved "all my contacts" destination for status posts.
    pub fn status_broadcast() -> Self {
        Self::new("status", "broadcast")
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn is_status_broadcast(&self) -> bool {
        self.user == "status" && self.server == "broadcast"
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}

impl FromStr for ChatId {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('@') {
            Some((user, server)) if !user.is_empty() && !server.is_empty() => {
                Ok(Self::new(user, server))
            }
            _ => Err(RelayError::Send(format!("invalid chat address: {s}"))),
        }
    }
}

/// Transport-assigned message id; opaque and stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RemoteId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The closed set of message shapes the relay understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// Plain conversation text.
    Conversation(String),
    /// Text with formatting, link preview or quote context.
    ExtendedText { text: String },
    /// Image with an optional caption.
    Image { caption: Option<String> },
    /// Disappearing-message wrapper.
    Ephemeral(Box<MessageContent>),
    /// View-once wrapper.
    ViewOnce(Box<MessageContent>),
    /// Copy of a message the account sent from another linked device.
    DeviceSent(Box<MessageContent>),
    /// Anything else (stickers, reactions, calls...), tagged by kind.
    Unsupported(String),
}

impl MessageContent {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Conversation(text.into())
    }

    /// First non-empty text carried by this message, unwrapping wrappers.
    pub fn text(&self) -> Option<&str> {
        self.text_within(MAX_UNWRAP_DEPTH)
    }

    fn text_within(&self, depth: usize) -> Option<&str> {
        match self {
            Self::Conversation(text) | Self::ExtendedText { text } => non_empty(text),
            Self::Image { caption } => caption.as_deref().and_then(non_empty),
            Self::Ephemeral(inner) | Self::ViewOnce(inner) | Self::DeviceSent(inner) => {
                if depth == 0 {
                    None
                } else {
                    inner.text_within(depth - 1)
                }
            }
            Self::Unsupported(_) => None,
        }
    }
}

fn non_empty(text: &str) -> Option<&str> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// One item from a connection's inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Chat the message arrived in; replies go here.
    pub chat: ChatId,
    pub sender: ChatId,
    /// Set when the account itself sent the message from another device.
    pub from_me: bool,
    /// `None` for empty payloads (receipts, protocol noise).
    pub content: Option<MessageContent>,
}

impl InboundMessage {
    pub fn new(chat: ChatId, sender: ChatId, from_me: bool, content: Option<MessageContent>) -> Self {
        Self {
            chat,
            sender,
            from_me,
            content,
        }
    }

    /// A "note to self" text message from `account`.
    pub fn note_to_self(account: &ChatId, text: impl Into<String>) -> Self {
        Self::new(
            account.clone(),
            account.clone(),
            true,
            Some(MessageContent::plain(text)),
        )
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_ref().and_then(MessageContent::text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(depth: usize, inner: MessageContent) -> MessageContent {
        (0..depth).fold(inner, |acc, _| MessageContent::Ephemeral(Box::new(acc)))
    }

    #[test]
    fn test_direct_shapes() {
        assert_eq!(MessageContent::plain(".list").text(), Some(".list"));
        assert_eq!(
            MessageContent::ExtendedText {
                text: ".status hi".into()
            }
            .text(),
            Some(".status hi")
        );
        assert_eq!(
            MessageContent::Image {
                caption: Some("sunset".into())
            }
            .text(),
            Some("sunset")
        );
        assert_eq!(MessageContent::Image { caption: None }.text(), None);
        assert_eq!(MessageContent::Unsupported("sticker".into()).text(), None);
        assert_eq!(MessageContent::plain("").text(), None);
    }

    #[test]
    fn test_wrapped_shapes() {
        let view_once = MessageContent::ViewOnce(Box::new(MessageContent::Image {
            caption: Some("secret".into()),
        }));
        assert_eq!(view_once.text(), Some("secret"));

        let device_sent =
            MessageContent::DeviceSent(Box::new(MessageContent::Ephemeral(Box::new(
                MessageContent::plain(".list"),
            ))));
        assert_eq!(device_sent.text(), Some(".list"));
    }

    #[test]
    fn test_unwrap_depth_is_bounded() {
        let reachable = wrap(MAX_UNWRAP_DEPTH, MessageContent::plain("deep"));
        assert_eq!(reachable.text(), Some("deep"));

        let too_deep = wrap(MAX_UNWRAP_DEPTH + 1, MessageContent::plain("deep"));
        assert_eq!(too_deep.text(), None);
    }

    #[test]
    fn test_chat_id_display_and_parse() {
        let me = ChatId::account("2348012345678");
        assert_eq!(me.to_string(), "2348012345678@s.whatsapp.net");

        let parsed: ChatId = "status@broadcast".parse().unwrap();
        assert!(parsed.is_status_broadcast());
        assert_eq!(parsed, ChatId::status_broadcast());

        assert!("no-at-sign".parse::<ChatId>().is_err());
        assert!("@server".parse::<ChatId>().is_err());
    }

    #[test]
    fn test_empty_payload_has_no_text() {
        let me = ChatId::account("1");
        let msg = InboundMessage::new(me.clone(), me, true, None);
        assert_eq!(msg.text(), None);
    }
}
