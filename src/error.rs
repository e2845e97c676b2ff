//! Error types for the signup bot.

use std::time::Duration;

use crate::registration::state::RegistrationPhase;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Hash error: {0}")]
    Hash(#[from] HashError),

    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Messaging transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Channel {name} disconnected: {reason}")]
    Disconnected { name: String, reason: String },

    #[error("Channel {name} refused access: {reason}")]
    Forbidden { name: String, reason: String },

    #[error("Request to {name} failed: {reason}")]
    Http { name: String, reason: String },

    #[error("Role assignment on {name} failed: {reason}")]
    RoleAssignment { name: String, reason: String },
}

/// Credential hashing errors.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("Invalid hash parameters: {0}")]
    Params(String),

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Stored hash is malformed: {0}")]
    Malformed(String),

    #[error("Hashing task panicked or was cancelled: {0}")]
    Join(String),
}

/// Why a username was refused during the collection loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationFailure {
    #[error("username contains invalid characters or has an invalid length")]
    InvalidUsername,

    #[error("username is already taken")]
    NameTaken,
}

/// Terminal outcomes of a registration conversation other than success.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("identity already has an account")]
    AlreadyRegistered,

    #[error("private channel could not be opened")]
    ChannelDenied,

    #[error("registration aborted by user")]
    Aborted,

    #[error("no reply within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("account creation failed: {reason}")]
    CreationFailure { reason: String },

    #[error("post-registration role assignment failed: {reason}")]
    PrivilegeAssignmentFailure { reason: String },

    #[error("transport failure: {0}")]
    Transport(#[from] ChannelError),

    #[error("account lookup failed: {0}")]
    Lookup(#[from] DatabaseError),
}

impl RegistrationError {
    /// The phase a session ends in when it stops with this error.
    pub fn terminal_phase(&self) -> RegistrationPhase {
        match self {
            Self::Aborted => RegistrationPhase::Cancelled,
            Self::Timeout { .. } => RegistrationPhase::TimedOut,
            // Privilege failures never end a session; the account exists.
            Self::PrivilegeAssignmentFailure { .. } => RegistrationPhase::Completed,
            _ => RegistrationPhase::Rejected,
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phase_mapping() {
        assert_eq!(
            RegistrationError::Aborted.terminal_phase(),
            RegistrationPhase::Cancelled
        );
        assert_eq!(
            RegistrationError::Timeout {
                timeout: Duration::from_secs(60)
            }
            .terminal_phase(),
            RegistrationPhase::TimedOut
        );
        assert_eq!(
            RegistrationError::AlreadyRegistered.terminal_phase(),
            RegistrationPhase::Rejected
        );
        assert_eq!(
            RegistrationError::CreationFailure {
                reason: "dup".into()
            }
            .terminal_phase(),
            RegistrationPhase::Rejected
        );
        assert_eq!(
            RegistrationError::ChannelDenied.terminal_phase(),
            RegistrationPhase::Rejected
        );
    }

    #[test]
    fn top_level_wraps_registration_error() {
        let err: Error = RegistrationError::ChannelDenied.into();
        assert!(err.to_string().contains("private channel"));
    }
}
