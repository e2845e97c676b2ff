use std::sync::Arc;

use anyhow::Context;

use signup_bot::bot::RegistrationBot;
use signup_bot::channels::{Messenger, TelegramApi, TelegramMemberGrant, TelegramMessenger};
use signup_bot::config::{BotConfig, RegistrationConfig};
use signup_bot::privilege::PrivilegeAssignor;
use signup_bot::registration::RegistrationController;
use signup_bot::store::{AccountStore, LibSqlAccountStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let bot_config = BotConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!("  export TELEGRAM_BOT_TOKEN=123456:ABC-DEF...");
        std::process::exit(1);
    });
    let config = RegistrationConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    eprintln!("📝 Signup Bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Service: {}", config.service_name);
    eprintln!("   Command: {}", bot_config.command);
    eprintln!("   Reply timeout: {}s", config.reply_timeout.as_secs());

    // ── Database ─────────────────────────────────────────────────────────
    let accounts: Arc<dyn AccountStore> = Arc::new(
        LibSqlAccountStore::new_local(&bot_config.db_path)
            .await
            .with_context(|| {
                format!(
                    "failed to open database at {}",
                    bot_config.db_path.display()
                )
            })?,
    );
    eprintln!("   Database: {}", bot_config.db_path.display());

    // ── Telegram ─────────────────────────────────────────────────────────
    let api = Arc::new(TelegramApi::new(bot_config.bot_token));
    let messenger = Arc::new(TelegramMessenger::new(Arc::clone(&api)));
    messenger
        .health_check()
        .await
        .context("Telegram rejected the bot token")?;

    if let Some(ref chat) = bot_config.community_chat_id {
        eprintln!("   Community chat: {}", chat);
    }
    let privileges: Arc<dyn PrivilegeAssignor> =
        Arc::new(TelegramMemberGrant::new(api, bot_config.community_chat_id));

    let controller = RegistrationController::new(messenger.clone(), accounts, privileges, config)
        .context("invalid password hashing parameters")?;

    RegistrationBot::new(messenger, Arc::new(controller), bot_config.command)
        .run()
        .await?;

    Ok(())
}
