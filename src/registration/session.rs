//! Per-invocation registration session.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::state::RegistrationPhase;
use super::validator;
use crate::channels::{ChannelRef, Identity};

/// State of one registration conversation.
///
/// Owned by a single controller invocation and dropped when it ends.
#[derive(Debug, Clone)]
pub struct RegistrationSession {
    /// Random id used to correlate log lines.
    pub id: Uuid,
    pub identity: Identity,
    pub phase: RegistrationPhase,
    pub candidate_username: Option<String>,
    /// Always `normalize(candidate_username)` when set.
    pub normalized_name: Option<String>,
    /// Private channel opened for this conversation, if any.
    pub private_channel: Option<ChannelRef>,
    pub started_at: DateTime<Utc>,
}

impl RegistrationSession {
    pub fn new(identity: Identity) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            phase: RegistrationPhase::default(),
            candidate_username: None,
            normalized_name: None,
            private_channel: None,
            started_at: Utc::now(),
        }
    }

    /// Move to `target`. Returns an error if the transition is not allowed.
    pub fn advance(&mut self, target: RegistrationPhase) -> Result<RegistrationPhase, String> {
        if !self.phase.can_transition_to(target) {
            return Err(format!("Cannot transition from {} to {}", self.phase, target));
        }
        self.phase = target;
        Ok(target)
    }

    /// Record the validated username and its normalized form.
    pub fn accept_username(&mut self, username: &str) {
        self.normalized_name = Some(validator::normalize(username));
        self.candidate_username = Some(username.to_string());
    }

    /// Whether the user is talking to the bot in the private channel.
    pub fn in_conversation(&self) -> bool {
        self.private_channel.is_some()
            && matches!(
                self.phase,
                RegistrationPhase::CollectingUsername
                    | RegistrationPhase::CollectingPassword
                    | RegistrationPhase::Finalizing
            )
    }

    /// Milliseconds since the session started, for logs.
    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }
}
