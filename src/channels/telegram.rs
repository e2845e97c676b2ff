//! Telegram channel, long-polling the Bot API for updates.
//!
//! One poller task fans every parsed message out on a broadcast channel.
//! The command dispatcher consumes it as a stream. Each opened private chat
//! gets its own receiver, held until the session releases the chat, so
//! replies sent between two waits are kept for the next one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::channels::{
    ChannelKind, ChannelRef, Identity, IncomingMessage, MessageFilter, MessageStream, Messenger,
    OpenOutcome, WaitOutcome,
};
use crate::error::ChannelError;
use crate::privilege::PrivilegeAssignor;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to getUpdates.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Back-off after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Inbound messages buffered per subscriber before it starts lagging.
const BROADCAST_CAPACITY: usize = 256;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Thin Bot API client shared by the messenger and the role grant.
pub struct TelegramApi {
    bot_token: SecretString,
    base_url: String,
    client: reqwest::Client,
}

/// Raw HTTP status plus decoded body of a Bot API call.
struct ApiResponse {
    status: u16,
    body: Value,
}

impl ApiResponse {
    fn description(&self) -> String {
        self.body
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("no description")
            .to_string()
    }

    /// Map a non-success response to a `ChannelError`, 403 becoming `Forbidden`.
    fn into_result(self, method: &str) -> Result<Value, ChannelError> {
        let ok = self.body.get("ok").and_then(Value::as_bool).unwrap_or(false);
        if (200..300).contains(&self.status) && ok {
            return Ok(self.body.get("result").cloned().unwrap_or(Value::Null));
        }
        let reason = format!("{method} returned {}: {}", self.status, self.description());
        if self.status == 403 {
            Err(ChannelError::Forbidden {
                name: "telegram".into(),
                reason,
            })
        } else {
            Err(ChannelError::Http {
                name: "telegram".into(),
                reason,
            })
        }
    }
}

impl TelegramApi {
    pub fn new(bot_token: SecretString) -> Self {
        Self::with_base_url(bot_token, DEFAULT_API_BASE)
    }

    /// Point the client at a different Bot API server (self-hosted or test).
    pub fn with_base_url(bot_token: SecretString, base_url: impl Into<String>) -> Self {
        Self {
            bot_token,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.base_url,
            self.bot_token.expose_secret()
        )
    }

    async fn post(&self, method: &str, body: &Value) -> Result<ApiResponse, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Http {
                name: "telegram".into(),
                // reqwest errors embed the URL, which carries the token.
                reason: format!("{method}: {}", e.without_url()),
            })?;

        let status = resp.status().as_u16();
        let body = resp.json::<Value>().await.unwrap_or(Value::Null);
        Ok(ApiResponse { status, body })
    }

    async fn call(&self, method: &str, body: &Value) -> Result<Value, ChannelError> {
        self.post(method, body).await?.into_result(method)
    }
}

/// Telegram transport for the registration conversation.
pub struct TelegramMessenger {
    api: Arc<TelegramApi>,
    tx: broadcast::Sender<IncomingMessage>,
    started: AtomicBool,
    /// Receivers of open private chats, keyed by chat id.
    watched: Mutex<HashMap<String, broadcast::Receiver<IncomingMessage>>>,
}

impl TelegramMessenger {
    pub fn new(api: Arc<TelegramApi>) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            api,
            tx,
            started: AtomicBool::new(false),
            watched: Mutex::new(HashMap::new()),
        }
    }

    fn watched(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, broadcast::Receiver<IncomingMessage>>> {
        self.watched.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start buffering inbound messages for `channel`.
    fn watch(&self, channel: &ChannelRef) {
        self.watched().insert(channel.id.clone(), self.tx.subscribe());
    }

    fn subscribe_stream(&self) -> MessageStream {
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(|item| item.ok());
        Box::pin(stream)
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        // Subscribe before spawning so nothing published in between is lost.
        let stream = self.subscribe_stream();
        if !self.started.swap(true, Ordering::SeqCst) {
            tokio::spawn(poll_updates(Arc::clone(&self.api), self.tx.clone()));
        }
        Ok(stream)
    }

    async fn open_private_channel(&self, identity: &Identity) -> Result<OpenOutcome, ChannelError> {
        // A user's private chat id equals their user id. getChat only
        // succeeds once the user has started a conversation with the bot.
        let resp = self
            .api
            .post("getChat", &json!({ "chat_id": identity.as_str() }))
            .await?;

        match resp.status {
            400 | 403 => {
                tracing::debug!(%identity, reason = %resp.description(), "Private chat unavailable");
                Ok(OpenOutcome::PermissionDenied)
            }
            _ => {
                resp.into_result("getChat")?;
                let dm = ChannelRef::private(identity.as_str());
                self.watch(&dm);
                Ok(OpenOutcome::Opened(dm))
            }
        }
    }

    async fn send(&self, channel: &ChannelRef, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            // Plain text: usernames may contain `_` and `[`, which break Markdown.
            self.api
                .call(
                    "sendMessage",
                    &json!({ "chat_id": channel.id, "text": chunk }),
                )
                .await?;
        }
        Ok(())
    }

    async fn wait_for_next_message(
        &self,
        channel: &ChannelRef,
        filter: MessageFilter<'_>,
        timeout: Duration,
    ) -> Result<WaitOutcome, ChannelError> {
        // Watched chats resume from their buffered receiver; others only
        // see messages from now on.
        let (mut rx, watched) = match self.watched().remove(&channel.id) {
            Some(rx) => (rx, true),
            None => (self.tx.subscribe(), false),
        };

        let next = async {
            loop {
                match rx.recv().await {
                    Ok(msg) if msg.channel == *channel && filter(&msg) => return Ok(msg),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Reply waiter lagged behind inbound messages");
                    }
                    Err(RecvError::Closed) => {
                        return Err(ChannelError::Disconnected {
                            name: "telegram".into(),
                            reason: "inbound message channel closed".into(),
                        });
                    }
                }
            }
        };
        let result = tokio::time::timeout(timeout, next).await;

        if watched {
            self.watched().insert(channel.id.clone(), rx);
        }

        match result {
            Ok(Ok(msg)) => Ok(WaitOutcome::Message(msg)),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(WaitOutcome::TimedOut),
        }
    }

    fn release_private_channel(&self, channel: &ChannelRef) {
        self.watched().remove(&channel.id);
    }

    async fn indicate_typing(&self, channel: &ChannelRef) -> Result<(), ChannelError> {
        self.api
            .call(
                "sendChatAction",
                &json!({ "chat_id": channel.id, "action": "typing" }),
            )
            .await
            .map(|_| ())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        self.api
            .call("getMe", &json!({}))
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })
    }
}

/// Grants the member role by lifting send restrictions in a group.
///
/// Commands issued in a group grant membership in that group; commands
/// issued in a private chat use the configured community chat.
pub struct TelegramMemberGrant {
    api: Arc<TelegramApi>,
    community_chat_id: Option<String>,
}

impl TelegramMemberGrant {
    pub fn new(api: Arc<TelegramApi>, community_chat_id: Option<String>) -> Self {
        Self {
            api,
            community_chat_id,
        }
    }

    fn target_chat(&self, origin: &ChannelRef) -> Option<String> {
        match origin.kind {
            ChannelKind::Public => Some(origin.id.clone()),
            ChannelKind::Private => self.community_chat_id.clone(),
        }
    }
}

#[async_trait]
impl PrivilegeAssignor for TelegramMemberGrant {
    async fn grant_post_registration_role(
        &self,
        identity: &Identity,
        origin: &ChannelRef,
    ) -> Result<(), ChannelError> {
        let chat_id = self
            .target_chat(origin)
            .ok_or_else(|| ChannelError::RoleAssignment {
                name: "telegram".into(),
                reason: "no community chat configured".into(),
            })?;

        let user_id: i64 = identity
            .as_str()
            .parse()
            .map_err(|_| ChannelError::RoleAssignment {
                name: "telegram".into(),
                reason: format!("'{identity}' is not a Telegram user id"),
            })?;

        self.api
            .call(
                "restrictChatMember",
                &json!({
                    "chat_id": chat_id,
                    "user_id": user_id,
                    "permissions": member_permissions(),
                }),
            )
            .await
            .map_err(|e| ChannelError::RoleAssignment {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        tracing::info!(%identity, chat_id = %chat_id, "Member permissions granted");
        Ok(())
    }
}

fn member_permissions() -> Value {
    json!({
        "can_send_messages": true,
        "can_send_audios": true,
        "can_send_documents": true,
        "can_send_photos": true,
        "can_send_videos": true,
        "can_send_video_notes": true,
        "can_send_voice_notes": true,
        "can_send_polls": true,
        "can_send_other_messages": true,
        "can_add_web_page_previews": true,
    })
}

// ── Polling ─────────────────────────────────────────────────────────

async fn poll_updates(api: Arc<TelegramApi>, tx: broadcast::Sender<IncomingMessage>) {
    let mut offset: i64 = 0;

    tracing::info!("Telegram channel listening for messages...");

    loop {
        let body = json!({
            "offset": offset,
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message"]
        });

        let updates = match api.call("getUpdates", &body).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Telegram poll error: {e}");
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };

        let Some(updates) = updates.as_array() else {
            continue;
        };

        for update in updates {
            // Advance offset past this update
            if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                offset = uid + 1;
            }

            let Some(incoming) = parse_update(update) else {
                continue;
            };

            // No subscribers simply means nobody is listening right now.
            if tx.send(incoming).is_err() {
                tracing::debug!("Dropping Telegram message, no active listeners");
            }
        }
    }
}

/// Turn a raw getUpdates entry into an `IncomingMessage`.
///
/// Returns `None` for updates without a text message or sender.
fn parse_update(update: &Value) -> Option<IncomingMessage> {
    let message = update.get("message")?;
    let text = message.get("text").and_then(Value::as_str)?;

    let from = message.get("from")?;
    let user_id = from.get("id").and_then(Value::as_i64)?;

    let chat = message.get("chat")?;
    let chat_id = chat.get("id").and_then(Value::as_i64)?;
    let kind = match chat.get("type").and_then(Value::as_str) {
        Some("private") => ChannelKind::Private,
        _ => ChannelKind::Public,
    };

    let mut incoming = IncomingMessage::new(
        Identity::new(user_id.to_string()),
        ChannelRef {
            id: chat_id.to_string(),
            kind,
        },
        text,
    );

    if let Some(message_id) = message.get("message_id").and_then(Value::as_i64) {
        incoming = incoming.with_id(message_id.to_string());
    }
    if let Some(sent_at) = message
        .get("date")
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    {
        incoming.received_at = sent_at;
    }

    let name = from
        .get("username")
        .or_else(|| from.get("first_name"))
        .and_then(Value::as_str);
    if let Some(name) = name {
        incoming = incoming.with_sender_name(name);
    }

    Some(incoming)
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Byte offset of the first char past the limit.
        let limit = remaining
            .char_indices()
            .nth(max_len)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
