// Entry point of the spam guard service.
//
// This file's job is to:
// 1. Load configuration from the environment
// 2. Initialize the store and adapters (dependency injection)
// 3. Run the periodic profile sweep until Ctrl-C

use anyhow::Context;
use chrono::Utc;
use forum_spam_guard::core::moderation::{
    ExternalSpamChecker, ModerationGateway, ModerationSettings, ModeratorNotifier,
};
use forum_spam_guard::infra::moderation::{
    AkismetClient, LogNotifier, RoleAuthorizer, SqliteModerationStore, WebhookNotifier,
};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_DATABASE_PATH: &str = "data/moderation.db";
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Positive numbers only; zero or garbage means "disabled".
fn env_number<T: std::str::FromStr + PartialOrd + Default>(name: &str) -> Option<T> {
    env_string(name)
        .and_then(|v| v.parse::<T>().ok())
        .filter(|v| *v > T::default())
}

fn settings_from_env() -> ModerationSettings {
    let defaults = ModerationSettings::default();

    let site_urls = env_string("SPAM_GUARD_SITE_URLS")
        .map(|v| {
            v.split(',')
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let site_timezone = match env_string("SPAM_GUARD_TIMEZONE") {
        Some(name) => name.parse().unwrap_or_else(|e| {
            tracing::warn!("Unknown timezone {}, using UTC: {}", name, e);
            defaults.site_timezone
        }),
        None => defaults.site_timezone,
    };

    ModerationSettings {
        site_urls,
        banned_words: env_string("SPAM_GUARD_BANNED_WORDS"),
        checker_key: env_string("SPAM_GUARD_AKISMET_KEY"),
        checker_max_account_age_secs: env_number("SPAM_GUARD_AKISMET_MAX_ACCOUNT_AGE_SECS"),
        checker_timeout_secs: env_number("SPAM_GUARD_AKISMET_TIMEOUT_SECS")
            .unwrap_or(defaults.checker_timeout_secs),
        invalid_chars_percentage: env_number("SPAM_GUARD_INVALID_CHARS_PERCENT"),
        throttle_post_count: env_number("SPAM_GUARD_THROTTLE_POSTS"),
        throttle_duration_secs: env_number("SPAM_GUARD_THROTTLE_SECS"),
        require_recent_user: env_string("SPAM_GUARD_REQUIRE_RECENT_USER")
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(defaults.require_recent_user),
        review_queue_url: env_string("SPAM_GUARD_REVIEW_URL").unwrap_or(defaults.review_queue_url),
        site_timezone,
        legacy_charsets: defaults.legacy_charsets,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening (RUST_LOG filters it)
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let settings = settings_from_env();
    let database_path =
        env_string("SPAM_GUARD_DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string());

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================

    let store = Arc::new(
        SqliteModerationStore::new(&database_path)
            .await
            .with_context(|| format!("Failed to open moderation database at {}", database_path))?,
    );

    let notifier: Arc<dyn ModeratorNotifier> = match env_string("SPAM_GUARD_WEBHOOK_URL") {
        Some(url) => {
            tracing::info!("Sending moderator notifications to webhook");
            Arc::new(WebhookNotifier::new(url))
        }
        None => Arc::new(LogNotifier),
    };

    let checker: Option<Arc<dyn ExternalSpamChecker>> = match &settings.checker_key {
        Some(key) => {
            let site = settings.site_urls.first().cloned().unwrap_or_default();
            let timeout = Duration::from_secs(settings.checker_timeout_secs);
            Some(Arc::new(AkismetClient::connect(key, &site, timeout).await))
        }
        None => None,
    };

    let mut gateway = ModerationGateway::new(
        store.clone(),
        Arc::new(RoleAuthorizer::new(store.clone())),
        notifier,
        settings,
    );
    if let Some(checker) = checker {
        gateway = gateway.with_checker(checker);
    }
    let gateway = Arc::new(gateway);

    // ========================================================================
    // BACKGROUND TASKS
    // ========================================================================

    let sweep_interval =
        env_number("SPAM_GUARD_SWEEP_INTERVAL_SECS").unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
    let sweeper = Arc::clone(&gateway);
    let sweep_task = tokio::spawn(async move {
        loop {
            tracing::debug!("Profile sweep starting");
            match sweeper.sweep_new_profiles(Utc::now()).await {
                Ok(0) => tracing::debug!("No new spam profiles found"),
                Ok(flagged) => tracing::info!(flagged, "Profile sweep flagged new accounts"),
                Err(e) => tracing::warn!("Profile sweep failed: {}", e),
            }
            tokio::time::sleep(Duration::from_secs(sweep_interval)).await;
        }
    });

    tracing::info!(database = %database_path, "Spam guard running");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutting down");
    sweep_task.abort();
    Ok(())
}
