//! End-to-end registration against a real libSQL store.
//!
//! The messenger is a scripted stub; everything behind it (controller,
//! hasher, store, migrations) is the production code.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::time::timeout;

use signup_bot::bot::RegistrationBot;
use signup_bot::channels::{
    ChannelRef, Identity, IncomingMessage, MessageFilter, MessageStream, Messenger, OpenOutcome,
    WaitOutcome,
};
use signup_bot::config::{HashConfig, RegistrationConfig};
use signup_bot::error::{ChannelError, RegistrationError};
use signup_bot::privilege::NoopAssignor;
use signup_bot::registration::{
    CredentialHasher, RegistrationController, RegistrationPhase, prompts,
};
use signup_bot::store::{AccountStore, LibSqlAccountStore};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Replays scripted replies and records everything sent.
#[derive(Default)]
struct StubMessenger {
    commands: Mutex<Vec<IncomingMessage>>,
    replies: Mutex<VecDeque<IncomingMessage>>,
    sent: Mutex<Vec<(ChannelRef, String)>>,
}

impl StubMessenger {
    fn script(&self, user: &str, texts: &[&str]) {
        let mut replies = self.replies.lock().unwrap();
        for text in texts {
            replies.push_back(dm(user, text));
        }
    }

    fn sent_to(&self, channel: &ChannelRef) -> Vec<String> {
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
impl Messenger for StubMessenger {
    fn name(&self) -> &str {
        "stub"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let commands = std::mem::take(&mut *self.commands.lock().unwrap());
        Ok(Box::pin(futures::stream::iter(commands)))
    }

    async fn open_private_channel(&self, identity: &Identity) -> Result<OpenOutcome, ChannelError> {
        Ok(OpenOutcome::Opened(ChannelRef::private(identity.as_str())))
    }

    async fn send(&self, channel: &ChannelRef, text: &str) -> Result<(), ChannelError> {
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
        _timeout: Duration,
    ) -> Result<WaitOutcome, ChannelError> {
        loop {
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(msg) if filter(&msg) => return Ok(WaitOutcome::Message(msg)),
                Some(_) => continue,
                None => return Ok(WaitOutcome::TimedOut),
            }
        }
    }
}

fn dm(user: &str, text: &str) -> IncomingMessage {
    IncomingMessage::new(Identity::new(user), ChannelRef::private(user), text)
}

fn command_in_group(user: &str) -> IncomingMessage {
    IncomingMessage::new(Identity::new(user), ChannelRef::public("-100"), "/register")
}

fn cheap_hash() -> HashConfig {
    HashConfig {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
    }
}

async fn setup() -> (Arc<StubMessenger>, Arc<LibSqlAccountStore>, RegistrationController) {
    let messenger = Arc::new(StubMessenger::default());
    let store = Arc::new(LibSqlAccountStore::new_memory().await.unwrap());
    let config = RegistrationConfig {
        hash: cheap_hash(),
        ..RegistrationConfig::default()
    };
    let controller = RegistrationController::new(
        messenger.clone(),
        store.clone(),
        Arc::new(NoopAssignor),
        config,
    )
    .unwrap();
    (messenger, store, controller)
}

// ── Controller against libSQL ────────────────────────────────────────

#[tokio::test]
async fn registration_persists_account() {
    timeout(TEST_TIMEOUT, async {
        let (messenger, store, controller) = setup().await;
        messenger.script("42", &["User Name", "secret123"]);

        let outcome = controller.register(&command_in_group("42")).await;
        assert_eq!(outcome.phase, RegistrationPhase::Completed);

        let stored = store
            .find_by_normalized_name("user_name")
            .await
            .unwrap()
            .expect("account should be stored");
        assert_eq!(stored.username, "User Name");
        assert_eq!(stored.external_identity, Identity::new("42"));
        assert!(stored.activated);

        let hasher = CredentialHasher::new(cheap_hash()).unwrap();
        let password = SecretString::from("secret123".to_string());
        assert!(hasher.verify(&password, &stored.credential_hash).unwrap());

        assert_eq!(
            messenger.sent_to(&ChannelRef::private("42")).last().unwrap(),
            prompts::COMPLETED
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn normalized_collision_forces_new_name() {
    timeout(TEST_TIMEOUT, async {
        let (messenger, store, controller) = setup().await;
        messenger.script("1", &["User Name", "pw1"]);
        assert!(controller.register(&command_in_group("1")).await.is_completed());

        messenger.script("2", &["user_name", "Other", "pw2"]);
        let outcome = controller.register(&command_in_group("2")).await;

        assert_eq!(outcome.result.unwrap().normalized_name, "other");
        assert!(
            messenger
                .sent_to(&ChannelRef::private("2"))
                .iter()
                .any(|t| t == prompts::NAME_TAKEN)
        );
        assert!(
            store
                .find_by_identity(&Identity::new("2"))
                .await
                .unwrap()
                .is_some()
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn second_registration_is_silently_rejected() {
    timeout(TEST_TIMEOUT, async {
        let (messenger, _store, controller) = setup().await;
        messenger.script("42", &["Alice", "pw"]);
        assert!(controller.register(&command_in_group("42")).await.is_completed());

        let sent_before = messenger.sent.lock().unwrap().len();
        let outcome = controller.register(&command_in_group("42")).await;

        assert_eq!(outcome.phase, RegistrationPhase::Rejected);
        assert!(matches!(
            outcome.result,
            Err(RegistrationError::AlreadyRegistered)
        ));
        assert_eq!(messenger.sent.lock().unwrap().len(), sent_before);
    })
    .await
    .expect("test timed out");
}

// ── Bot dispatch ─────────────────────────────────────────────────────

#[tokio::test]
async fn bot_runs_commands_from_stream() {
    timeout(TEST_TIMEOUT, async {
        let (messenger, store, controller) = setup().await;
        messenger.commands.lock().unwrap().extend([
            dm("42", "hello"),
            command_in_group("42"),
        ]);
        messenger.script("42", &["Alice", "pw"]);

        RegistrationBot::new(messenger.clone(), Arc::new(controller), "/register")
            .run()
            .await
            .unwrap();

        // The session runs on its own task; wait for it to land.
        loop {
            if store
                .find_by_identity(&Identity::new("42"))
                .await
                .unwrap()
                .is_some()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("test timed out");
}
