//! Registration state machine.

use serde::{Deserialize, Serialize};

/// The phases of a registration conversation.
///
/// Progresses forward only: Init → PreflightChecked → ChannelOpened →
/// CollectingUsername → CollectingPassword → Finalizing → Completed.
/// CollectingUsername may repeat while the user retries a name, and any
/// non-terminal phase may end early in Cancelled, TimedOut or Rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationPhase {
    Init,
    PreflightChecked,
    ChannelOpened,
    CollectingUsername,
    CollectingPassword,
    Finalizing,
    Completed,
    Cancelled,
    TimedOut,
    Rejected,
}

impl RegistrationPhase {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: RegistrationPhase) -> bool {
        use RegistrationPhase::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, target),
            (Init, PreflightChecked)
                | (PreflightChecked, ChannelOpened)
                | (ChannelOpened, CollectingUsername)
                | (CollectingUsername, CollectingUsername)
                | (CollectingUsername, CollectingPassword)
                | (CollectingUsername, TimedOut)
                | (CollectingPassword, Finalizing)
                | (CollectingPassword, Cancelled)
                | (CollectingPassword, TimedOut)
                | (Finalizing, Completed)
                | (_, Rejected)
        )
    }

    /// Whether this phase ends the conversation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::TimedOut | Self::Rejected
        )
    }
}

impl Default for RegistrationPhase {
    fn default() -> Self {
        Self::Init
    }
}

impl std::fmt::Display for RegistrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::PreflightChecked => "preflight_checked",
            Self::ChannelOpened => "channel_opened",
            Self::CollectingUsername => "collecting_username",
            Self::CollectingPassword => "collecting_password",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}
