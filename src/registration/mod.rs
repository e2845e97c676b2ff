//! Account registration over private messages.

pub mod controller;
pub mod hasher;
pub mod prompts;
pub mod session;
pub mod state;
pub mod validator;

#[cfg(test)]
pub(crate) mod test_support;

pub use controller::{RegistrationController, RegistrationOutcome};
pub use hasher::CredentialHasher;
pub use session::RegistrationSession;
pub use state::RegistrationPhase;
