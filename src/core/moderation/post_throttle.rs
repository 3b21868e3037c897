// Post-rate throttle and the blocked-submission counter.
//
// The counter lives in a user preference so it survives restarts. After
// `BLOCKS_BEFORE_SUSPENSION` blocks the next one asks the caller to suspend
// the account and the counter starts over.

use super::moderation_models::window_start;
use super::moderation_store::{ContentStore, IdentityStore, ModerationError, PostCountFilter};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Preference holding how many submissions were blocked since the last suspension.
pub const BLOCKED_POSTS_PREFERENCE: &str = "spam_guard_blocked_posts_count";

pub const BLOCKS_BEFORE_SUSPENSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleOutcome {
    pub blocked_count: u32,
    /// The caller must suspend the account.
    pub suspend: bool,
}

pub struct PostThrottle<S: IdentityStore + ContentStore> {
    store: Arc<S>,
}

impl<S: IdentityStore + ContentStore> PostThrottle<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// True when the user made at least `max_posts` posts in the last `window_secs`.
    ///
    /// Disabled (always false) unless both limits are set and non-zero. Storage
    /// failures are logged and count as "not over".
    pub async fn is_over_threshold(
        &self,
        user_id: u64,
        now: DateTime<Utc>,
        window_secs: Option<u64>,
        max_posts: Option<u32>,
    ) -> bool {
        let (window, max_posts) = match (window_secs, max_posts) {
            (Some(window), Some(max)) if window > 0 && max > 0 => (window, max),
            _ => return false,
        };

        // A window wider than chrono can represent covers every post.
        let filter = match window_start(now, window) {
            Some(since) => PostCountFilter::CreatedAfter(since),
            None => PostCountFilter::All,
        };
        match self.store.count_posts(user_id, filter).await
        {
            Ok(count) => count >= max_posts as u64,
            Err(e) => {
                tracing::warn!(user_id, "Failed to count recent posts: {}", e);
                false
            }
        }
    }

    pub async fn blocked_count(&self, user_id: u64) -> Result<u32, ModerationError> {
        Ok(self
            .store
            .get_preference(user_id, BLOCKED_POSTS_PREFERENCE)
            .await?
            .and_then(|value| value.trim().parse::<u32>().ok())
            .unwrap_or(0))
    }

    /// Count one more blocked submission.
    pub async fn record_blocked_submission(
        &self,
        user_id: u64,
    ) -> Result<ThrottleOutcome, ModerationError> {
        let blocked_count = self.blocked_count(user_id).await? + 1;

        if blocked_count > BLOCKS_BEFORE_SUSPENSION {
            self.store
                .set_preference(user_id, BLOCKED_POSTS_PREFERENCE, None)
                .await?;
            return Ok(ThrottleOutcome {
                blocked_count,
                suspend: true,
            });
        }

        self.store
            .set_preference(
                user_id,
                BLOCKED_POSTS_PREFERENCE,
                Some(&blocked_count.to_string()),
            )
            .await?;
        Ok(ThrottleOutcome {
            blocked_count,
            suspend: false,
        })
    }
}
