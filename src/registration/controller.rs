//! The registration conversation.
//!
//! One call to [`RegistrationController::register`] drives one session from
//! the command message to a terminal phase:
//!
//! ```text
//! Init -> PreflightChecked -> ChannelOpened -> CollectingUsername
//!      -> CollectingPassword -> Finalizing -> Completed
//! ```
//!
//! with `Rejected`, `Cancelled` and `TimedOut` as the other exits. Every
//! terminal phase except a silent `AlreadyRegistered` rejection is announced
//! to the user with exactly one message.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::Instrument;

use super::hasher::CredentialHasher;
use super::prompts;
use super::session::RegistrationSession;
use super::state::RegistrationPhase;
use super::validator;
use crate::channels::{
    ChannelRef, IncomingMessage, Messenger, OpenOutcome, WaitOutcome, from_sender_in,
};
use crate::config::RegistrationConfig;
use crate::error::{ChannelError, HashError, RegistrationError, ValidationFailure};
use crate::privilege::PrivilegeAssignor;
use crate::store::{Account, AccountStore, NewAccount, Permissions};

/// How a session ended.
#[derive(Debug)]
pub struct RegistrationOutcome {
    pub phase: RegistrationPhase,
    pub result: Result<Account, RegistrationError>,
}

impl RegistrationOutcome {
    pub fn is_completed(&self) -> bool {
        self.phase == RegistrationPhase::Completed
    }
}

/// Runs registration conversations.
///
/// Shared between concurrent sessions; holds no per-session state.
pub struct RegistrationController {
    messenger: Arc<dyn Messenger>,
    accounts: Arc<dyn AccountStore>,
    privileges: Arc<dyn PrivilegeAssignor>,
    hasher: CredentialHasher,
    config: RegistrationConfig,
}

impl RegistrationController {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        accounts: Arc<dyn AccountStore>,
        privileges: Arc<dyn PrivilegeAssignor>,
        config: RegistrationConfig,
    ) -> Result<Self, HashError> {
        let hasher = CredentialHasher::new(config.hash)?;
        Ok(Self {
            messenger,
            accounts,
            privileges,
            hasher,
            config,
        })
    }

    /// Run a full registration for the sender of `origin`.
    pub async fn register(&self, origin: &IncomingMessage) -> RegistrationOutcome {
        let mut session = RegistrationSession::new(origin.sender.clone());
        let span = tracing::info_span!(
            "registration",
            session = %session.id,
            identity = %session.identity,
        );

        async {
            let result = self.drive(&mut session, origin).await;

            if let Err(ref e) = result {
                if matches!(
                    e,
                    RegistrationError::Transport(_) | RegistrationError::Lookup(_)
                ) {
                    self.interrupted(&session, origin).await;
                }
                if let Err(msg) = session.advance(e.terminal_phase()) {
                    tracing::error!(error = %e, "{msg}");
                }
            }
            if let Some(dm) = session.private_channel.take() {
                self.messenger.release_private_channel(&dm);
            }

            match &result {
                Ok(account) => tracing::info!(
                    phase = %session.phase,
                    account_id = account.id,
                    elapsed_ms = session.elapsed_ms(),
                    "Registration finished"
                ),
                Err(RegistrationError::AlreadyRegistered) => {
                    tracing::info!(phase = %session.phase, "Identity already has an account")
                }
                Err(e) => tracing::warn!(
                    phase = %session.phase,
                    error = %e,
                    elapsed_ms = session.elapsed_ms(),
                    "Registration ended without an account"
                ),
            }

            RegistrationOutcome {
                phase: session.phase,
                result,
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        session: &mut RegistrationSession,
        origin: &IncomingMessage,
    ) -> Result<Account, RegistrationError> {
        // Preflight. Existing accounts are turned away without a reply.
        if self
            .accounts
            .find_by_identity(&session.identity)
            .await?
            .is_some()
        {
            return Err(RegistrationError::AlreadyRegistered);
        }
        enter(session, RegistrationPhase::PreflightChecked);
        tracing::info!(author = origin.author(), "Starting registration");

        let dm = match self.messenger.open_private_channel(&session.identity).await? {
            OpenOutcome::Opened(dm) => dm,
            OpenOutcome::PermissionDenied => return self.deny(origin).await,
        };
        session.private_channel = Some(dm.clone());
        enter(session, RegistrationPhase::ChannelOpened);

        // Some platforms only reveal a blocked DM when the first send fails.
        match self
            .messenger
            .send(&dm, &prompts::intro(&self.config.service_name))
            .await
        {
            Ok(()) => {}
            Err(ChannelError::Forbidden { reason, .. }) => {
                tracing::debug!(%reason, "First private message refused");
                return self.deny(origin).await;
            }
            Err(e) => return Err(e.into()),
        }
        enter(session, RegistrationPhase::CollectingUsername);

        if !origin.channel.is_private() {
            if let Err(e) = self
                .messenger
                .send(&origin.channel, prompts::CHECK_PRIVATE_MESSAGES)
                .await
            {
                tracing::warn!(error = %e, "Failed to post private message notice");
            }
        }

        let username = self.collect_username(session, &dm).await?;
        session.accept_username(&username);
        tracing::info!(%username, "Username selected");

        self.messenger
            .send(&dm, &prompts::username_confirmed(&username))
            .await?;
        self.messenger
            .send(&dm, &prompts::password_prompt(&self.config.abort_keyword))
            .await?;
        enter(session, RegistrationPhase::CollectingPassword);

        let reply = self.next_reply(session, &dm).await?;
        let password = SecretString::from(reply.content);
        if validator::is_abort(password.expose_secret(), &self.config.abort_keyword) {
            self.notify(&dm, prompts::CANCELLED).await;
            return Err(RegistrationError::Aborted);
        }
        enter(session, RegistrationPhase::Finalizing);

        if let Err(e) = self.messenger.indicate_typing(&dm).await {
            tracing::debug!(error = %e, "Typing indicator failed");
        }

        let account = match self.create_account(session, password).await {
            Ok(account) => account,
            Err(reason) => {
                tracing::error!(%reason, "Failed to create account");
                self.notify(&dm, prompts::CREATION_FAILED).await;
                return Err(RegistrationError::CreationFailure { reason });
            }
        };
        tracing::info!(account_id = account.id, "Account created");

        if let Err(e) = self
            .privileges
            .grant_post_registration_role(&session.identity, &origin.channel)
            .await
        {
            let failure = RegistrationError::PrivilegeAssignmentFailure {
                reason: e.to_string(),
            };
            tracing::warn!(error = %failure, "Continuing without member role");
        }

        enter(session, RegistrationPhase::Completed);
        self.notify(&dm, prompts::COMPLETED).await;
        Ok(account)
    }

    /// Loop until the user sends a valid, free username.
    async fn collect_username(
        &self,
        session: &mut RegistrationSession,
        dm: &ChannelRef,
    ) -> Result<String, RegistrationError> {
        loop {
            let reply = self.next_reply(session, dm).await?;
            let username = reply.content.trim();

            let verdict = match validator::validate_username(username) {
                Ok(()) => {
                    let normalized = validator::normalize(username);
                    match self.accounts.find_by_normalized_name(&normalized).await? {
                        Some(_) => Err(ValidationFailure::NameTaken),
                        None => Ok(()),
                    }
                }
                Err(failure) => Err(failure),
            };

            match verdict {
                Ok(()) => return Ok(username.to_string()),
                Err(failure) => {
                    tracing::debug!(%failure, "Username refused");
                    let text = match failure {
                        ValidationFailure::InvalidUsername => prompts::invalid_username(),
                        ValidationFailure::NameTaken => prompts::NAME_TAKEN.to_string(),
                    };
                    self.messenger.send(dm, &text).await?;
                    enter(session, RegistrationPhase::CollectingUsername);
                }
            }
        }
    }

    /// Wait for the session owner's next private message.
    ///
    /// A timeout notifies the user and ends the session.
    async fn next_reply(
        &self,
        session: &RegistrationSession,
        dm: &ChannelRef,
    ) -> Result<IncomingMessage, RegistrationError> {
        let filter = from_sender_in(&session.identity, dm);
        let timeout = self.config.reply_timeout;

        match self
            .messenger
            .wait_for_next_message(dm, &filter, timeout)
            .await?
        {
            WaitOutcome::Message(msg) => Ok(msg),
            WaitOutcome::TimedOut => {
                tracing::info!(phase = %session.phase, "No reply before timeout");
                self.notify(dm, prompts::TIMED_OUT).await;
                Err(RegistrationError::Timeout { timeout })
            }
        }
    }

    /// Hash the password and persist the account.
    ///
    /// Returns a log-safe reason on failure.
    async fn create_account(
        &self,
        session: &RegistrationSession,
        password: SecretString,
    ) -> Result<Account, String> {
        let (Some(username), Some(normalized_name)) = (
            session.candidate_username.clone(),
            session.normalized_name.clone(),
        ) else {
            return Err("session reached finalizing without a username".to_string());
        };

        let hasher = self.hasher.clone();
        let credential_hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| HashError::Join(e.to_string()))
            .and_then(|hashed| hashed)
            .map_err(|e| e.to_string())?;

        let account = NewAccount {
            username,
            normalized_name,
            external_identity: session.identity.clone(),
            credential_hash,
            email: self.config.defaults.email.clone(),
            country: self.config.defaults.country.clone(),
            activated: true,
            permissions: Permissions::for_new_account(self.config.free_supporter),
        };

        self.accounts
            .create(account)
            .await
            .map_err(|e| e.to_string())
    }

    /// Tell the user in the origin chat that no private channel is available.
    async fn deny(&self, origin: &IncomingMessage) -> Result<Account, RegistrationError> {
        tracing::info!("Private channel unavailable");
        self.notify(&origin.channel, prompts::CHANNEL_DENIED).await;
        Err(RegistrationError::ChannelDenied)
    }

    /// Tell the user the session broke off. Goes to the private channel once
    /// the conversation moved there, else to where the command was issued.
    async fn interrupted(&self, session: &RegistrationSession, origin: &IncomingMessage) {
        let target = match session.private_channel {
            Some(ref dm) if session.in_conversation() => dm,
            _ => &origin.channel,
        };
        self.notify(target, prompts::INTERRUPTED).await;
    }

    /// Send a closing message. Failures are logged; the outcome stands.
    async fn notify(&self, channel: &ChannelRef, text: &str) {
        if let Err(e) = self.messenger.send(channel, text).await {
            tracing::warn!(error = %e, channel = %channel.id, "Failed to send notice");
        }
    }
}

fn enter(session: &mut RegistrationSession, phase: RegistrationPhase) {
    if let Err(msg) = session.advance(phase) {
        tracing::error!("{msg}");
        debug_assert!(false, "{msg}");
    }
}
