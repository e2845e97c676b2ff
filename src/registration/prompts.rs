//! User-facing texts of the registration conversation.
//!
//! Failure notices name the outcome category only, never internal detail.

use super::validator::USERNAME_MAX_LEN;

/// First private message, explaining what happens next.
pub fn intro(service_name: &str) -> String {
    format!(
        "You are about to register an account on {service_name}.\n\
         Please enter a username!"
    )
}

/// Posted in a public chat so the user knows to look at their private messages.
pub const CHECK_PRIVATE_MESSAGES: &str = "Please check your private messages!";

/// Posted where the command was issued when the bot cannot message the user.
pub const CHANNEL_DENIED: &str = "I could not send you a private message. \
     Please start a chat with me or check your privacy settings, then try again!";

/// Posted where the command was issued while a registration is already running.
pub const ALREADY_IN_PROGRESS: &str =
    "Your registration is already in progress. Please check your private messages!";

pub fn invalid_username() -> String {
    format!(
        "Your username has invalid characters or is too long. \
         Use letters, numbers, spaces, `-`, `_`, `[` or `]` (at most {USERNAME_MAX_LEN} characters). \
         Please try again!"
    )
}

pub const NAME_TAKEN: &str = "A user with that name already exists. Please try again!";

pub fn username_confirmed(username: &str) -> String {
    format!("Your username will be \"{username}\".")
}

pub fn password_prompt(abort_keyword: &str) -> String {
    format!(
        "Please enter a password for you to log in!\n\
         (Type \"{abort_keyword}\" to abort the registration)"
    )
}

pub const CANCELLED: &str = "The registration was cancelled.";

pub const TIMED_OUT: &str = "The registration was cancelled due to inactivity.\nPlease try again!";

pub const CREATION_FAILED: &str =
    "Something went wrong during the registration. Please contact an operator!";

/// Sent when the conversation breaks off on an infrastructure failure.
pub const INTERRUPTED: &str =
    "Something went wrong on our side and the registration was stopped. Please try again later!";

pub const COMPLETED: &str = "Thank you! You can now try to log in.\n\
     If something doesn't work, feel free to ping an operator.\n\
     Have fun!";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_prompt_mentions_keyword() {
        assert!(password_prompt("cancel").contains("\"cancel\""));
    }

    #[test]
    fn intro_names_service() {
        assert!(intro("Titan").contains("account on Titan."));
    }

    #[test]
    fn invalid_username_states_length_limit() {
        assert!(invalid_username().contains("at most 15 characters"));
    }

    #[test]
    fn confirmation_quotes_username() {
        assert_eq!(username_confirmed("Alice"), "Your username will be \"Alice\".");
    }
}
