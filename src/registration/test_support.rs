//! In-memory fakes for exercising the registration flow.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::channels::{
    ChannelRef, Identity, IncomingMessage, MessageFilter, MessageStream, Messenger, OpenOutcome,
    WaitOutcome,
};
use crate::error::{ChannelError, DatabaseError};
use crate::privilege::PrivilegeAssignor;
use crate::store::{Account, AccountStore, NewAccount, Permissions};

/// Private message from `user` in their own chat.
pub fn dm_from(user: &str, text: &str) -> IncomingMessage {
    IncomingMessage::new(Identity::new(user), ChannelRef::private(user), text)
}

pub fn existing_account(identity: &str, normalized_name: &str) -> Account {
    Account {
        id: 0,
        username: normalized_name.to_string(),
        normalized_name: normalized_name.to_string(),
        external_identity: Identity::new(identity),
        credential_hash: "$argon2id$v=19$m=8,t=1,p=1$c2FsdA$aGFzaA".to_string(),
        email: "user@example.com".to_string(),
        country: "XX".to_string(),
        activated: true,
        permissions: Permissions::NORMAL,
        created_at: Utc::now(),
    }
}

/// Messenger that replays a fixed script of inbound messages.
///
/// A wait with nothing left in the script times out immediately.
#[derive(Default)]
pub struct ScriptedMessenger {
    replies: Mutex<VecDeque<IncomingMessage>>,
    sent: Mutex<Vec<(ChannelRef, String)>>,
    deny_private: bool,
    forbid_private_sends: bool,
    fail_waits: bool,
    hold_waits: bool,
    pub open_calls: AtomicUsize,
    pub typing_calls: AtomicUsize,
    pub released: AtomicUsize,
}

impl ScriptedMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, msg: IncomingMessage) -> Self {
        self.replies.lock().unwrap().push_back(msg);
        self
    }

    pub fn with_replies(self, user: &str, texts: &[&str]) -> Self {
        texts
            .iter()
            .fold(self, |messenger, text| messenger.with_reply(dm_from(user, text)))
    }

    pub fn deny_private(mut self) -> Self {
        self.deny_private = true;
        self
    }

    pub fn forbid_private_sends(mut self) -> Self {
        self.forbid_private_sends = true;
        self
    }

    pub fn fail_waits(mut self) -> Self {
        self.fail_waits = true;
        self
    }

    /// Make empty-script waits sleep for the full timeout instead.
    pub fn hold_waits(mut self) -> Self {
        self.hold_waits = true;
        self
    }

    pub fn all_sent(&self) -> Vec<(ChannelRef, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, channel: &ChannelRef) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == channel)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Messenger for ScriptedMessenger {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn open_private_channel(&self, identity: &Identity) -> Result<OpenOutcome, ChannelError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.deny_private {
            return Ok(OpenOutcome::PermissionDenied);
        }
        Ok(OpenOutcome::Opened(ChannelRef::private(identity.as_str())))
    }

    async fn send(&self, channel: &ChannelRef, text: &str) -> Result<(), ChannelError> {
        if self.forbid_private_sends && channel.is_private() {
            return Err(ChannelError::Forbidden {
                name: "scripted".to_string(),
                reason: "bot was blocked by the user".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((channel.clone(), text.to_string()));
        Ok(())
    }

    async fn wait_for_next_message(
        &self,
        _channel: &ChannelRef,
        filter: MessageFilter<'_>,
        timeout: Duration,
    ) -> Result<WaitOutcome, ChannelError> {
        if self.fail_waits {
            return Err(ChannelError::Disconnected {
                name: "scripted".to_string(),
                reason: "connection reset".to_string(),
            });
        }
        loop {
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(msg) if filter(&msg) => return Ok(WaitOutcome::Message(msg)),
                Some(_) => continue,
                None => {
                    if self.hold_waits {
                        tokio::time::sleep(timeout).await;
                    }
                    return Ok(WaitOutcome::TimedOut);
                }
            }
        }
    }

    fn release_private_channel(&self, _channel: &ChannelRef) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    async fn indicate_typing(&self, _channel: &ChannelRef) -> Result<(), ChannelError> {
        self.typing_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Account store backed by a vector, with call counters.
#[derive(Default)]
pub struct MemoryAccounts {
    accounts: Mutex<Vec<Account>>,
    fail_create: bool,
    fail_identity_lookups: bool,
    fail_name_lookups: bool,
    stale_name_lookups: bool,
    pub create_calls: AtomicUsize,
    pub name_lookups: AtomicUsize,
}

impl MemoryAccounts {
    pub fn fail_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn fail_identity_lookups(mut self) -> Self {
        self.fail_identity_lookups = true;
        self
    }

    pub fn fail_name_lookups(mut self) -> Self {
        self.fail_name_lookups = true;
        self
    }

    /// Name lookups always report the name as free, as if another session
    /// claimed it after the check.
    pub fn stale_name_lookups(mut self) -> Self {
        self.stale_name_lookups = true;
        self
    }

    pub fn insert(&self, account: Account) {
        self.accounts.lock().unwrap().push(account);
    }
}

#[async_trait]
impl AccountStore for MemoryAccounts {
    async fn find_by_identity(&self, identity: &Identity) -> Result<Option<Account>, DatabaseError> {
        if self.fail_identity_lookups {
            return Err(DatabaseError::Query("database is locked".to_string()));
        }
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.external_identity == *identity)
            .cloned())
    }

    async fn find_by_normalized_name(&self, name: &str) -> Result<Option<Account>, DatabaseError> {
        self.name_lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_name_lookups {
            return Err(DatabaseError::Query("database is locked".to_string()));
        }
        if self.stale_name_lookups {
            return Ok(None);
        }
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.normalized_name == name)
            .cloned())
    }

    async fn create(&self, account: NewAccount) -> Result<Account, DatabaseError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(DatabaseError::Query("disk I/O error".to_string()));
        }

        let mut accounts = self.accounts.lock().unwrap();
        if accounts.iter().any(|a| {
            a.normalized_name == account.normalized_name
                || a.external_identity == account.external_identity
        }) {
            return Err(DatabaseError::Constraint("account already exists".to_string()));
        }

        let created = Account {
            id: accounts.len() as i64 + 1,
            username: account.username,
            normalized_name: account.normalized_name,
            external_identity: account.external_identity,
            credential_hash: account.credential_hash,
            email: account.email,
            country: account.country,
            activated: account.activated,
            permissions: account.permissions,
            created_at: Utc::now(),
        };
        accounts.push(created.clone());
        Ok(created)
    }
}

/// Privilege assignor that counts calls and optionally fails.
#[derive(Default)]
pub struct RecordingAssignor {
    fail: bool,
    pub calls: AtomicUsize,
}

impl RecordingAssignor {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl PrivilegeAssignor for RecordingAssignor {
    async fn grant_post_registration_role(
        &self,
        _identity: &Identity,
        _origin: &ChannelRef,
    ) -> Result<(), ChannelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ChannelError::RoleAssignment {
                name: "scripted".to_string(),
                reason: "missing rights".to_string(),
            });
        }
        Ok(())
    }
}
