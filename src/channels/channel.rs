//! Messaging transport abstraction.
//!
//! The registration controller talks to users only through [`Messenger`].
//! Permission refusals and timeouts come back as explicit variants
//! ([`OpenOutcome`], [`WaitOutcome`]) rather than errors; `ChannelError` is
//! reserved for infrastructure failures.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Opaque identifier of a remote user on the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a conversation is one-to-one with the bot or shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Private,
    Public,
}

/// Address of a conversation on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRef {
    pub id: String,
    pub kind: ChannelKind,
}

impl ChannelRef {
    pub fn private(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ChannelKind::Private,
        }
    }

    pub fn public(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ChannelKind::Public,
        }
    }

    pub fn is_private(&self) -> bool {
        self.kind == ChannelKind::Private
    }
}

/// A message received from a user.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Platform-native message id.
    pub id: String,
    pub sender: Identity,
    /// Display name of the sender, if the platform provides one.
    pub sender_name: Option<String>,
    pub channel: ChannelRef,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn new(sender: Identity, channel: ChannelRef, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender,
            sender_name: None,
            channel,
            content: content.into(),
            received_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    /// Display label for logs: the sender name if known, else the identity.
    pub fn author(&self) -> &str {
        self.sender_name.as_deref().unwrap_or(self.sender.as_str())
    }
}

/// Result of asking the platform for a private conversation with a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened(ChannelRef),
    /// The user's privacy settings do not allow the bot to message them.
    PermissionDenied,
}

/// Result of a single bounded wait for a user reply.
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    Message(IncomingMessage),
    TimedOut,
}

/// Predicate deciding which incoming message a wait accepts.
pub type MessageFilter<'a> = &'a (dyn Fn(&IncomingMessage) -> bool + Send + Sync);

/// Stream of every inbound message the transport sees.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// A messaging platform the bot converses over.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Short platform name used in logs and errors.
    fn name(&self) -> &str;

    /// Start receiving and return the stream of inbound messages.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Open (or look up) the private conversation with `identity`.
    async fn open_private_channel(&self, identity: &Identity) -> Result<OpenOutcome, ChannelError>;

    /// Send a text message.
    async fn send(&self, channel: &ChannelRef, text: &str) -> Result<(), ChannelError>;

    /// Wait for the next message on `channel` accepted by `filter`.
    ///
    /// Exactly one message is consumed. Messages rejected by the filter are
    /// dropped, not buffered for a later wait. For a channel returned by
    /// `open_private_channel`, messages that arrived since the previous wait
    /// are seen too.
    async fn wait_for_next_message(
        &self,
        channel: &ChannelRef,
        filter: MessageFilter<'_>,
        timeout: Duration,
    ) -> Result<WaitOutcome, ChannelError>;

    /// Stop tracking a private channel opened for a conversation.
    fn release_private_channel(&self, _channel: &ChannelRef) {}

    /// Show a "typing" indicator while slow work runs.
    async fn indicate_typing(&self, _channel: &ChannelRef) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Filter accepting only messages from `identity` posted in `channel`.
pub fn from_sender_in<'a>(
    identity: &'a Identity,
    channel: &'a ChannelRef,
) -> impl Fn(&IncomingMessage) -> bool + Send + Sync + 'a {
    move |msg| msg.sender == *identity && msg.channel == *channel
}
