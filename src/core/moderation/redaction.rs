// Spammer redaction - wipes a spammer's content and locks the account.
//
// Lifecycle per target: Eligible -> InProgress -> Done, or Rejected when a
// guard fails. Every mutation happens inside one store transaction; any
// failure rolls the whole thing back.

use super::moderation_models::{
    ForumKind, ModerationContext, ModerationSettings, ProfileScrub, Role, User,
};
use super::moderation_store::{
    ContentStore, IdentityStore, IneligibleReason, ModerationError, RedactionStep,
    RedactionTransaction,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Accounts first seen longer ago than this are refused when the recency rail is on.
pub const RECENT_USER_DAYS: i64 = 30;

/// Written over the city field of a redacted profile.
pub const SCRUBBED_CITY: &str = "Spammer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionState {
    Eligible,
    InProgress,
    Done,
    Rejected(IneligibleReason),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RedactionCounts {
    pub comments: u64,
    pub discussions: u64,
    pub posts: u64,
    pub messages: u64,
    pub tags: u64,
    pub sessions: u64,
    pub votes: u64,
    /// Posts left alone because they live in single-discussion forums.
    pub skipped_posts: u64,
}

/// What a finished redaction did. `user` is the account as it was before.
#[derive(Debug, Clone, PartialEq)]
pub struct RedactionReport {
    pub user: User,
    pub counts: RedactionCounts,
    pub state: RedactionState,
}

/// Checks that apply before anything else: who may be targeted at all.
pub fn entry_guard(
    actor_id: u64,
    user_id: u64,
    user: Option<&User>,
) -> Result<(), IneligibleReason> {
    if user_id == 0 {
        return Err(IneligibleReason::MissingId);
    }
    if user_id == actor_id {
        return Err(IneligibleReason::SelfTarget);
    }
    let user = user.ok_or(IneligibleReason::UnknownUser)?;
    match user.role {
        Role::Guest => Err(IneligibleReason::Guest),
        Role::Admin => Err(IneligibleReason::Admin),
        _ => Ok(()),
    }
}

/// Checks that apply right before the transaction opens.
pub fn execution_guard(
    user: &User,
    now: DateTime<Utc>,
    require_recent_user: bool,
) -> Result<(), IneligibleReason> {
    if !user.is_active() {
        return Err(IneligibleReason::AlreadyInactive);
    }
    if require_recent_user && !user.is_recent(now, Duration::days(RECENT_USER_DAYS)) {
        return Err(IneligibleReason::NotRecentUser);
    }
    Ok(())
}

type StepResult<T> = Result<T, (RedactionStep, ModerationError)>;

fn at(step: RedactionStep) -> impl Fn(ModerationError) -> (RedactionStep, ModerationError) {
    move |e| (step, e)
}

async fn run_steps(
    tx: &mut dyn RedactionTransaction,
    user_id: u64,
    scrub: &ProfileScrub,
) -> StepResult<RedactionCounts> {
    let mut counts = RedactionCounts {
        comments: tx
            .delete_comments_by(user_id)
            .await
            .map_err(at(RedactionStep::Comments))?,
        ..Default::default()
    };

    let started = tx
        .discussions_started_by(user_id)
        .await
        .map_err(at(RedactionStep::Discussions))?;
    for (discussion, forum) in started {
        if forum.kind == ForumKind::SingleDiscussion {
            tracing::debug!(
                user_id,
                discussion_id = discussion.id,
                "Keeping discussion in single-discussion forum"
            );
            continue;
        }
        tx.delete_discussion(discussion.id)
            .await
            .map_err(at(RedactionStep::Discussions))?;
        counts.discussions += 1;
    }

    let posts = tx
        .posts_by(user_id)
        .await
        .map_err(at(RedactionStep::Posts))?;
    for (post, forum) in posts {
        if forum.kind == ForumKind::SingleDiscussion {
            counts.skipped_posts += 1;
            continue;
        }
        counts.posts += tx
            .delete_post_tree(post.id)
            .await
            .map_err(at(RedactionStep::Posts))?;
    }

    counts.messages = tx
        .delete_messages_from(user_id)
        .await
        .map_err(at(RedactionStep::Messages))?;

    counts.tags = tx
        .clear_tags(user_id)
        .await
        .map_err(at(RedactionStep::Tags))?;

    tx.scrub_user(user_id, scrub)
        .await
        .map_err(at(RedactionStep::Profile))?;
    counts.sessions = tx
        .kill_sessions(user_id)
        .await
        .map_err(at(RedactionStep::Profile))?;

    counts.votes = tx
        .delete_votes_against(user_id)
        .await
        .map_err(at(RedactionStep::Votes))?;

    Ok(counts)
}

/// Users with a redaction running in this process.
#[derive(Default)]
struct InFlight(Mutex<HashSet<u64>>);

impl InFlight {
    fn contains(&self, user_id: u64) -> bool {
        self.0
            .lock()
            .map(|users| users.contains(&user_id))
            .unwrap_or(false)
    }

    fn claim(&self, user_id: u64) -> InFlightClaim<'_> {
        if let Ok(mut users) = self.0.lock() {
            users.insert(user_id);
        }
        InFlightClaim {
            in_flight: self,
            user_id,
        }
    }
}

/// Releases the user when the redaction finishes, however it finishes.
struct InFlightClaim<'a> {
    in_flight: &'a InFlight,
    user_id: u64,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        if let Ok(mut users) = self.in_flight.0.lock() {
            users.remove(&self.user_id);
        }
    }
}

pub struct RedactionWorkflow<S: IdentityStore + ContentStore> {
    store: Arc<S>,
    settings: Arc<ModerationSettings>,
    in_flight: InFlight,
}

impl<S: IdentityStore + ContentStore> RedactionWorkflow<S> {
    pub fn new(store: Arc<S>, settings: Arc<ModerationSettings>) -> Self {
        Self {
            store,
            settings,
            in_flight: InFlight::default(),
        }
    }

    /// Whether `user_id` may be offered for deletion at all.
    pub async fn is_eligible(
        &self,
        ctx: &ModerationContext,
        user_id: u64,
    ) -> Result<bool, ModerationError> {
        let user = self.store.get_user(user_id).await?;
        Ok(entry_guard(ctx.actor.id, user_id, user.as_ref()).is_ok())
    }

    async fn guarded_target(
        &self,
        ctx: &ModerationContext,
        user_id: u64,
    ) -> Result<Result<User, IneligibleReason>, ModerationError> {
        let user = self.store.get_user(user_id).await?;
        if let Err(reason) = entry_guard(ctx.actor.id, user_id, user.as_ref()) {
            return Ok(Err(reason));
        }
        let Some(user) = user else {
            return Ok(Err(IneligibleReason::UnknownUser));
        };
        if let Err(reason) = execution_guard(&user, ctx.now, self.settings.require_recent_user) {
            return Ok(Err(reason));
        }
        Ok(Ok(user))
    }

    pub async fn state_of(
        &self,
        ctx: &ModerationContext,
        user_id: u64,
    ) -> Result<RedactionState, ModerationError> {
        if self.in_flight.contains(user_id) {
            return Ok(RedactionState::InProgress);
        }
        Ok(match self.guarded_target(ctx, user_id).await? {
            Ok(_) => RedactionState::Eligible,
            Err(reason) => RedactionState::Rejected(reason),
        })
    }

    /// Run every redaction step for `user_id` in one transaction.
    pub async fn execute(
        &self,
        ctx: &ModerationContext,
        user_id: u64,
    ) -> Result<RedactionReport, ModerationError> {
        let user = match self.guarded_target(ctx, user_id).await? {
            Ok(user) => user,
            Err(reason) => {
                tracing::info!(user_id, actor_id = ctx.actor.id, %reason, "Redaction rejected");
                return Err(ModerationError::IneligibleTarget(reason));
            }
        };

        let _claim = self.in_flight.claim(user_id);
        tracing::info!(
            target: "audit",
            user_id,
            actor_id = ctx.actor.id,
            "Redaction in progress"
        );

        let failure = |step: RedactionStep, e: ModerationError| ModerationError::TransactionFailure {
            user_id,
            step,
            message: e.to_string(),
        };

        let mut tx = self
            .store
            .begin_redaction()
            .await
            .map_err(|e| failure(RedactionStep::Begin, e))?;

        // Another redaction may have finished between the guard and the lock.
        let still_active = tx
            .lock_active_user(user_id)
            .await
            .map_err(|e| failure(RedactionStep::Begin, e))?;
        if !still_active {
            if let Err(e) = tx.rollback().await {
                tracing::error!(user_id, "Rollback of refused redaction failed: {}", e);
            }
            tracing::info!(user_id, actor_id = ctx.actor.id, "Redaction rejected, account already inactive");
            return Err(ModerationError::IneligibleTarget(
                IneligibleReason::AlreadyInactive,
            ));
        }

        let scrub = ProfileScrub {
            description: format!(
                "Spammer - spam deleted and account blocked {}",
                self.settings.human_timestamp(ctx.now)
            ),
            city: SCRUBBED_CITY.to_string(),
        };

        let counts = match run_steps(tx.as_mut(), user_id, &scrub).await {
            Ok(counts) => counts,
            Err((step, e)) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(user_id, "Rollback after failed redaction failed: {}", rollback_err);
                }
                tracing::error!(user_id, %step, "Redaction failed, rolled back: {}", e);
                return Err(failure(step, e));
            }
        };

        if let Err(e) = tx.commit().await {
            tracing::error!(user_id, "Redaction commit failed: {}", e);
            return Err(failure(RedactionStep::Commit, e));
        }

        tracing::info!(
            target: "audit",
            user_id,
            actor_id = ctx.actor.id,
            comments = counts.comments,
            discussions = counts.discussions,
            posts = counts.posts,
            messages = counts.messages,
            votes = counts.votes,
            "Spammer redacted"
        );

        Ok(RedactionReport {
            user,
            counts,
            state: RedactionState::Done,
        })
    }
}
