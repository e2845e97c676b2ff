//! Command dispatch.
//!
//! Watches the inbound stream for the registration command and runs one
//! controller session per command on its own task. At most one session
//! per identity runs at a time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::channels::{Identity, IncomingMessage, Messenger};
use crate::error::Result;
use crate::registration::{RegistrationController, RegistrationOutcome, prompts};

type InFlight = Arc<Mutex<HashSet<Identity>>>;

/// Listens for the registration command and starts sessions.
pub struct RegistrationBot {
    messenger: Arc<dyn Messenger>,
    controller: Arc<RegistrationController>,
    command: String,
    in_flight: InFlight,
}

impl RegistrationBot {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        controller: Arc<RegistrationController>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            messenger,
            controller,
            command: command.into(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run until Ctrl+C or until the inbound stream ends.
    pub async fn run(self) -> Result<()> {
        let mut message_stream = self.messenger.start().await?;

        tracing::info!(
            channel = self.messenger.name(),
            command = %self.command,
            "Registration bot ready and listening"
        );

        loop {
            let message = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received, shutting down...");
                    break;
                }
                msg = message_stream.next() => {
                    match msg {
                        Some(m) => m,
                        None => {
                            tracing::info!("Inbound stream ended, shutting down...");
                            break;
                        }
                    }
                }
            };

            self.dispatch(message).await;
        }

        let running = lock(&self.in_flight).len();
        if running > 0 {
            tracing::warn!(running, "Abandoning registrations still in progress");
        }
        Ok(())
    }

    /// Start a session if `message` is the registration command.
    ///
    /// Returns the session task, or `None` when nothing was started.
    pub async fn dispatch(&self, message: IncomingMessage) -> Option<JoinHandle<RegistrationOutcome>> {
        if !is_command(&message.content, &self.command) {
            return None;
        }

        let Some(guard) = InFlightGuard::acquire(&self.in_flight, &message.sender) else {
            tracing::info!(identity = %message.sender, "Registration already in progress");
            if let Err(e) = self
                .messenger
                .send(&message.channel, prompts::ALREADY_IN_PROGRESS)
                .await
            {
                tracing::warn!(error = %e, "Failed to send in-progress notice");
            }
            return None;
        };

        let controller = Arc::clone(&self.controller);
        Some(tokio::spawn(async move {
            let _guard = guard;
            controller.register(&message).await
        }))
    }
}

/// Whether `content` invokes `command`, optionally addressed as `command@bot`.
pub fn is_command(content: &str, command: &str) -> bool {
    let Some(first) = content.split_whitespace().next() else {
        return false;
    };
    match first.strip_prefix(command) {
        Some("") => true,
        Some(rest) => rest.starts_with('@') && rest.len() > 1,
        None => false,
    }
}

/// Marks an identity as busy until dropped.
struct InFlightGuard {
    in_flight: InFlight,
    identity: Identity,
}

impl InFlightGuard {
    fn acquire(in_flight: &InFlight, identity: &Identity) -> Option<Self> {
        if !lock(in_flight).insert(identity.clone()) {
            return None;
        }
        Some(Self {
            in_flight: Arc::clone(in_flight),
            identity: identity.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.identity);
    }
}

// Poisoning only means a session task panicked; the set itself stays valid.
fn lock(in_flight: &InFlight) -> std::sync::MutexGuard<'_, HashSet<Identity>> {
    in_flight.lock().unwrap_or_else(|e| e.into_inner())
}
