//! Configuration types.
//!
//! Everything is read from environment variables. The `from_lookup`
//! constructors take the lookup function explicitly so tests can feed
//! values without touching the process environment.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default time a user has to answer each prompt.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(60);

/// Default keyword that cancels the registration at the password prompt.
pub const DEFAULT_ABORT_KEYWORD: &str = "abort";

/// Argon2 work factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashConfig {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        // OWASP baseline for Argon2id.
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Values stamped on every new account that the conversation does not collect.
///
/// Country and email are placeholders until the bot asks for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDefaults {
    pub country: String,
    pub email: String,
}

impl Default for AccountDefaults {
    fn default() -> Self {
        Self {
            country: "XX".to_string(),
            email: "user@example.com".to_string(),
        }
    }
}

/// Settings for the registration conversation.
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    /// Name of the service accounts are created on, shown in the intro.
    pub service_name: String,
    /// Timeout applied to every wait for a user reply.
    pub reply_timeout: Duration,
    /// Keyword that cancels the registration at the password prompt.
    pub abort_keyword: String,
    /// Grant supporter permissions to every new account.
    pub free_supporter: bool,
    pub hash: HashConfig,
    pub defaults: AccountDefaults,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            service_name: "the server".to_string(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            abort_keyword: DEFAULT_ABORT_KEYWORD.to_string(),
            free_supporter: false,
            hash: HashConfig::default(),
            defaults: AccountDefaults::default(),
        }
    }
}

impl RegistrationConfig {
    /// Build config from environment variables, falling back to defaults
    /// for unset keys. Malformed numbers are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = Self::default();

        let service_name = lookup("SIGNUP_SERVICE_NAME")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(base.service_name);

        let reply_timeout = match parse_number::<u64, _>(&lookup, "SIGNUP_REPLY_TIMEOUT_SECS")? {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    key: "SIGNUP_REPLY_TIMEOUT_SECS".to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
            Some(secs) => Duration::from_secs(secs),
            None => base.reply_timeout,
        };

        let abort_keyword = lookup("SIGNUP_ABORT_KEYWORD")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(base.abort_keyword);

        let free_supporter = lookup("SIGNUP_FREE_SUPPORTER")
            .map(|s| parse_flag(&s))
            .unwrap_or(base.free_supporter);

        let hash = HashConfig {
            memory_kib: parse_number(&lookup, "SIGNUP_HASH_MEMORY_KIB")?
                .unwrap_or(base.hash.memory_kib),
            iterations: parse_number(&lookup, "SIGNUP_HASH_ITERATIONS")?
                .unwrap_or(base.hash.iterations),
            parallelism: parse_number(&lookup, "SIGNUP_HASH_PARALLELISM")?
                .unwrap_or(base.hash.parallelism),
        };

        let defaults = AccountDefaults {
            country: lookup("SIGNUP_DEFAULT_COUNTRY").unwrap_or(base.defaults.country),
            email: lookup("SIGNUP_PLACEHOLDER_EMAIL").unwrap_or(base.defaults.email),
        };

        Ok(Self {
            service_name,
            reply_timeout,
            abort_keyword,
            free_supporter,
            hash,
            defaults,
        })
    }
}

/// Process-level settings for the bot binary.
#[derive(Debug)]
pub struct BotConfig {
    pub bot_token: SecretString,
    pub db_path: PathBuf,
    /// Command that starts a registration, e.g. `/register`.
    pub command: String,
    /// Chat whose send restrictions are lifted when the command came from a private chat.
    pub community_chat_id: Option<String>,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = lookup("TELEGRAM_BOT_TOKEN")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".to_string()))?;

        let db_path = lookup("SIGNUP_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/signup.db"));

        let command = lookup("SIGNUP_COMMAND").unwrap_or_else(|| "/register".to_string());
        if command.trim().is_empty() || command.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidValue {
                key: "SIGNUP_COMMAND".to_string(),
                message: format!("'{command}' must be a single non-empty word"),
            });
        }

        let community_chat_id = lookup("TELEGRAM_COMMUNITY_CHAT_ID")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Self {
            bot_token: SecretString::from(bot_token),
            db_path,
            command,
            community_chat_id,
        })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parse an optional numeric setting. Unset is `None`; unparseable is an error.
fn parse_number<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}' is not a valid number: {e}"),
        })
}
