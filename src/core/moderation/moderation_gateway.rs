// Moderation gateway - the entry points the request layer calls.
//
// Flagging content, the admin delete shortcut, the pre-publish gate and the
// review queue operations all go through here. The gateway owns permission
// checks and notifications; the ledger, throttle and redaction workflow own
// their own rules.

use super::moderation_models::*;
use super::moderation_store::{
    Authorizer, IneligibleReason, ModerationError, ModerationStore, ModeratorNotifier,
    PostCountFilter,
};
use super::post_throttle::PostThrottle;
use super::redaction::{RedactionReport, RedactionState, RedactionWorkflow, RECENT_USER_DAYS};
use super::report_subjects::resolve_subject;
use super::spam_checker::{ExternalSpamChecker, SpamCheckRequest};
use super::spam_heuristics::{
    character_set_mismatch_percent, legacy_charset_for, looks_like_profile_spam, SpamHeuristics,
};
use super::vote_ledger::VoteLedger;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Authors with a post older than this are never blocked by heuristics or the throttle.
pub const ESTABLISHED_POST_AGE_HOURS: i64 = 24;

/// The profile sweep looks at accounts first seen within this window.
pub const PROFILE_SWEEP_HOURS: i64 = 24;

/// Result of a successful flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlagReceipt {
    pub target: ReportTarget,
    pub spammer_id: u64,
    pub weighting: u32,
}

/// Everything the profile review page shows before a deletion.
#[derive(Debug, Clone, PartialEq)]
pub struct SpammerOverview {
    pub user: User,
    pub counts: UserContentCounts,
    pub is_active: bool,
    /// First access within the last 30 days.
    pub is_recent: bool,
    /// What the redaction guards say right now.
    pub state: RedactionState,
}

pub struct ModerationGateway<S: ModerationStore> {
    store: Arc<S>,
    authorizer: Arc<dyn Authorizer>,
    notifier: Arc<dyn ModeratorNotifier>,
    checker: Option<Arc<dyn ExternalSpamChecker>>,
    settings: Arc<ModerationSettings>,
    heuristics: SpamHeuristics,
    ledger: VoteLedger<S>,
    throttle: PostThrottle<S>,
    redaction: RedactionWorkflow<S>,
}

impl<S: ModerationStore> ModerationGateway<S> {
    pub fn new(
        store: Arc<S>,
        authorizer: Arc<dyn Authorizer>,
        notifier: Arc<dyn ModeratorNotifier>,
        settings: ModerationSettings,
    ) -> Self {
        let settings = Arc::new(settings);
        let heuristics =
            SpamHeuristics::new(settings.site_urls.clone(), settings.banned_words.as_deref());
        Self {
            ledger: VoteLedger::new(store.clone()),
            throttle: PostThrottle::new(store.clone()),
            redaction: RedactionWorkflow::new(store.clone(), settings.clone()),
            store,
            authorizer,
            notifier,
            checker: None,
            settings,
            heuristics,
        }
    }

    pub fn with_checker(mut self, checker: Arc<dyn ExternalSpamChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    async fn require(
        &self,
        ctx: &ModerationContext,
        capability: Capability,
    ) -> Result<(), ModerationError> {
        if self.authorizer.has_capability(&ctx.actor, capability).await? {
            Ok(())
        } else {
            Err(ModerationError::PermissionDenied(format!(
                "{:?} required",
                capability
            )))
        }
    }

    // ========================================================================
    // FLAGGING
    // ========================================================================

    /// Record the actor's spam vote against `target` and notify moderators.
    pub async fn submit_flag(
        &self,
        ctx: &ModerationContext,
        target: ReportTarget,
    ) -> Result<FlagReceipt, ModerationError> {
        if ctx.actor.role == Role::Guest || !ctx.actor.is_active() {
            return Err(ModerationError::PermissionDenied(
                "sign in to report spam".to_string(),
            ));
        }

        let subject = resolve_subject(self.store.as_ref(), target)
            .await?
            .ok_or_else(|| ModerationError::NotFound(target.to_string()))?;
        subject
            .permission_check(self.authorizer.as_ref(), &ctx.actor)
            .await?;

        let spammer = subject
            .author()
            .cloned()
            .ok_or(ModerationError::IneligibleTarget(IneligibleReason::UnknownUser))?;
        if spammer.id == ctx.actor.id {
            return Err(ModerationError::IneligibleTarget(IneligibleReason::SelfTarget));
        }
        match spammer.role {
            Role::Guest => return Err(ModerationError::IneligibleTarget(IneligibleReason::Guest)),
            Role::Admin => return Err(ModerationError::IneligibleTarget(IneligibleReason::Admin)),
            _ => {}
        }

        let voter = Voter::User(ctx.actor.id);
        if self.ledger.has_voted(voter, target).await? {
            return Err(ModerationError::AlreadyVoted);
        }
        let weighting = self
            .ledger
            .record_vote(ctx, &spammer, voter, target, &subject.content_text())
            .await?;

        self.notify_moderators(&spammer, target).await;

        Ok(FlagReceipt {
            target,
            spammer_id: spammer.id,
            weighting,
        })
    }

    /// One notice per moderator. Delivery problems never fail the flag.
    async fn notify_moderators(&self, spammer: &User, target: ReportTarget) {
        let notice = SpamReportNotice {
            spammer_id: spammer.id,
            spammer_name: spammer.full_name(),
            target,
            review_url: self.settings.review_queue_url.clone(),
        };

        let moderators = match self.store.list_moderators().await {
            Ok(moderators) => moderators,
            Err(e) => {
                tracing::warn!("Failed to list moderators for spam notice: {}", e);
                return;
            }
        };

        for moderator in moderators {
            if let Err(e) = self.notifier.notify(&moderator, &notice).await {
                tracing::warn!(
                    recipient = moderator.id,
                    spammer_id = spammer.id,
                    "Failed to deliver spam notice: {}",
                    e
                );
            }
        }
    }

    // ========================================================================
    // DELETION
    // ========================================================================

    /// Queue the post for the external checker, then redact its author.
    pub async fn admin_shortcut_delete(
        &self,
        ctx: &ModerationContext,
        post_id: u64,
    ) -> Result<RedactionReport, ModerationError> {
        self.require(ctx, Capability::DeleteSpammer).await?;

        let post = self
            .store
            .get_post(post_id)
            .await?
            .ok_or_else(|| ModerationError::NotFound(format!("post {}", post_id)))?;
        let author = self
            .store
            .get_user(post.user_id)
            .await?
            .ok_or(ModerationError::IneligibleTarget(IneligibleReason::UnknownUser))?;

        // Refuse before queueing anything the redaction would turn down.
        if let RedactionState::Rejected(reason) = self.redaction.state_of(ctx, author.id).await? {
            return Err(ModerationError::IneligibleTarget(reason));
        }

        let content = format!("{}\n{}", post.subject, post.message);
        self.ledger
            .queue_candidate(ctx, post.id, &author, &content)
            .await?;

        self.delete_spammer_unchecked(ctx, author.id).await
    }

    /// Redact a spammer from their profile page.
    pub async fn delete_spammer(
        &self,
        ctx: &ModerationContext,
        user_id: u64,
    ) -> Result<RedactionReport, ModerationError> {
        self.require(ctx, Capability::DeleteSpammer).await?;
        self.delete_spammer_unchecked(ctx, user_id).await
    }

    async fn delete_spammer_unchecked(
        &self,
        ctx: &ModerationContext,
        user_id: u64,
    ) -> Result<RedactionReport, ModerationError> {
        let report = self.redaction.execute(ctx, user_id).await?;
        tracing::info!(
            target: "audit",
            user_id,
            username = %report.user.username,
            email = %report.user.email,
            actor_id = ctx.actor.id,
            "Spammer deleted"
        );
        Ok(report)
    }

    pub async fn spammer_overview(
        &self,
        ctx: &ModerationContext,
        user_id: u64,
    ) -> Result<SpammerOverview, ModerationError> {
        self.require(ctx, Capability::ViewSpamReports).await?;

        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| ModerationError::NotFound(format!("user {}", user_id)))?;
        let counts = self.store.content_counts(user_id).await?;
        let state = self.redaction.state_of(ctx, user_id).await?;

        Ok(SpammerOverview {
            is_active: user.is_active(),
            is_recent: user.is_recent(ctx.now, Duration::days(RECENT_USER_DAYS)),
            user,
            counts,
            state,
        })
    }

    // ========================================================================
    // PRE-PUBLISH GATE
    // ========================================================================

    /// Decide whether a new post or comment may be published.
    pub async fn inspect_submission(
        &self,
        ctx: &ModerationContext,
        author_id: u64,
        text: &str,
        subject: &str,
        locale: &str,
    ) -> Result<SubmissionVerdict, ModerationError> {
        let author = self
            .store
            .get_user(author_id)
            .await?
            .ok_or_else(|| ModerationError::NotFound(format!("user {}", author_id)))?;

        if let Some(reason) = self.hard_block_reason(ctx, &author, text, subject, locale).await {
            return self.block(ctx, &author, reason).await;
        }

        let spammy = self.heuristics.is_spammy(text) || self.heuristics.is_spammy(subject);
        let reason = if spammy {
            BlockReason::TriggerWords
        } else if self
            .throttle
            .is_over_threshold(
                author.id,
                ctx.now,
                self.settings.throttle_duration_secs,
                self.settings.throttle_post_count,
            )
            .await
        {
            BlockReason::PostLimit
        } else {
            return Ok(SubmissionVerdict::Allowed);
        };

        if self.is_established(author.id, ctx.now).await? {
            tracing::debug!(user_id = author.id, %reason, "Established author, not blocking");
            return Ok(SubmissionVerdict::Allowed);
        }

        self.block(ctx, &author, reason).await
    }

    /// Checks that block regardless of how established the author is.
    async fn hard_block_reason(
        &self,
        ctx: &ModerationContext,
        author: &User,
        text: &str,
        subject: &str,
        locale: &str,
    ) -> Option<BlockReason> {
        if let (Some(checker), Some(_), Some(max_age)) = (
            self.checker.as_ref(),
            self.settings.checker_key.as_ref(),
            self.settings.checker_max_account_age_secs.filter(|age| *age > 0),
        ) {
            if author.is_younger_than(ctx.now, max_age) {
                let request = SpamCheckRequest::for_author(
                    ctx,
                    author,
                    format!("{}\n{}", subject, text),
                    locale,
                );
                if checker.check_content(&request).await {
                    return Some(BlockReason::ExternalChecker);
                }
            }
        }

        if let Some(threshold) = self.settings.invalid_chars_percentage.filter(|t| *t > 0) {
            if let Some(encoding) = legacy_charset_for(locale, &self.settings.legacy_charsets) {
                let percent =
                    character_set_mismatch_percent(&format!("{} {}", subject, text), encoding);
                if percent > threshold {
                    return Some(BlockReason::InvalidChars(percent));
                }
            }
        }

        None
    }

    async fn is_established(&self, user_id: u64, now: DateTime<Utc>) -> Result<bool, ModerationError> {
        let before = now - Duration::hours(ESTABLISHED_POST_AGE_HOURS);
        Ok(self
            .store
            .count_posts(user_id, PostCountFilter::CreatedBefore(before))
            .await?
            > 0)
    }

    async fn block(
        &self,
        ctx: &ModerationContext,
        author: &User,
        reason: BlockReason,
    ) -> Result<SubmissionVerdict, ModerationError> {
        let outcome = self.throttle.record_blocked_submission(author.id).await?;
        tracing::info!(
            target: "audit",
            user_id = author.id,
            %reason,
            blocked_count = outcome.blocked_count,
            "Submission blocked"
        );

        if outcome.suspend {
            let description = format!(
                "Account suspended {} after being blocked from posting.",
                self.settings.human_timestamp(ctx.now)
            );
            self.store.suspend_user(author.id, &description).await?;
            tracing::info!(target: "audit", user_id = author.id, "Account suspended by post throttle");
        }

        Ok(SubmissionVerdict::Blocked {
            reason,
            account_suspended: outcome.suspend,
        })
    }

    // ========================================================================
    // REVIEW QUEUE
    // ========================================================================

    pub async fn spam_reports(
        &self,
        ctx: &ModerationContext,
        kind: TargetKind,
    ) -> Result<SpamReportBuckets, ModerationError> {
        self.require(ctx, Capability::ViewSpamReports).await?;
        self.ledger.aggregate_buckets(kind).await
    }

    pub async fn pending_report_count(&self, ctx: &ModerationContext) -> Result<u64, ModerationError> {
        self.require(ctx, Capability::ViewSpamReports).await?;
        self.ledger.pending_count().await
    }

    /// Mark one report as not spam.
    pub async fn clear_report(
        &self,
        ctx: &ModerationContext,
        target: ReportTarget,
    ) -> Result<u64, ModerationError> {
        self.require(ctx, Capability::ViewSpamReports).await?;
        let removed = self.ledger.clear_votes_for(target).await?;
        tracing::info!(target: "audit", report = %target, removed, actor_id = ctx.actor.id, "Spam report cleared");
        Ok(removed)
    }

    /// Mark everything reported against a user as not spam.
    pub async fn clear_reports_for_spammer(
        &self,
        ctx: &ModerationContext,
        spammer_id: u64,
    ) -> Result<u64, ModerationError> {
        self.require(ctx, Capability::ViewSpamReports).await?;
        let removed = self.ledger.clear_votes_for_spammer(spammer_id).await?;
        tracing::info!(target: "audit", spammer_id, removed, actor_id = ctx.actor.id, "Spam reports cleared");
        Ok(removed)
    }

    pub async fn list_checker_candidates(
        &self,
        ctx: &ModerationContext,
    ) -> Result<Vec<ExternalSpamCandidate>, ModerationError> {
        self.require(ctx, Capability::ViewSpamReports).await?;
        self.store.list_candidates().await
    }

    /// Send a queued candidate to the external checker.
    ///
    /// Returns `false` and keeps the candidate when the service did not
    /// acknowledge it or no checker is configured.
    pub async fn submit_checker_candidate(
        &self,
        ctx: &ModerationContext,
        candidate_id: u64,
    ) -> Result<bool, ModerationError> {
        self.require(ctx, Capability::ViewSpamReports).await?;
        let candidate = self
            .store
            .get_candidate(candidate_id)
            .await?
            .ok_or_else(|| ModerationError::NotFound(format!("candidate {}", candidate_id)))?;

        let Some(checker) = self.checker.as_ref() else {
            tracing::warn!(candidate_id, "No external checker configured, keeping candidate");
            return Ok(false);
        };

        if !checker.report_missed_spam(&candidate).await {
            tracing::warn!(candidate_id, "External checker did not acknowledge missed spam");
            return Ok(false);
        }

        self.store.delete_candidate(candidate_id).await?;
        Ok(true)
    }

    /// Drop a queued candidate without submitting it.
    pub async fn ignore_checker_candidate(
        &self,
        ctx: &ModerationContext,
        candidate_id: u64,
    ) -> Result<bool, ModerationError> {
        self.require(ctx, Capability::ViewSpamReports).await?;
        self.store.delete_candidate(candidate_id).await
    }

    // ========================================================================
    // PROFILE SWEEP
    // ========================================================================

    /// Report new accounts whose profile description looks like spam.
    /// Returns how many new reports were filed.
    pub async fn sweep_new_profiles(&self, now: DateTime<Utc>) -> Result<usize, ModerationError> {
        let since = now - Duration::hours(PROFILE_SWEEP_HOURS);
        let candidates = self.store.users_first_accessed_since(since).await?;

        let mut reported = 0;
        for user in candidates {
            if user.is_protected() || !looks_like_profile_spam(&user.description) {
                continue;
            }

            let target = ReportTarget::Profile { user_id: user.id };
            let ctx = ModerationContext::new(user.clone(), RequestMeta::default()).at(now);
            match self
                .ledger
                .record_vote(&ctx, &user, Voter::System, target, &user.description)
                .await
            {
                Ok(_) => reported += 1,
                Err(ModerationError::AlreadyVoted) => {}
                Err(e) => return Err(e),
            }
        }

        if reported > 0 {
            tracing::info!(reported, "Profile sweep reported new spam profiles");
        }
        Ok(reported)
    }
}
