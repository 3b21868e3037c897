// Ports for the moderation engine.
//
// The content/identity store, the authorization layer and the notification
// sink are external collaborators. Core code only sees these traits; the infra
// layer provides the SQLite, role-based and webhook implementations.

use super::moderation_models::{
    Capability, Comment, CommentArea, Discussion, ExternalSpamCandidate, Forum, ForumPost,
    NewSpamCandidate, NewVote, ProfileScrub, ReportTarget, SpamReportNotice, TargetKind, User,
    UserContentCounts, Vote, Voter,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Why a user cannot be reported or redacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IneligibleReason {
    MissingId,
    UnknownUser,
    SelfTarget,
    Guest,
    Admin,
    AlreadyInactive,
    NotRecentUser,
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            IneligibleReason::MissingId => "no user id given",
            IneligibleReason::UnknownUser => "user does not exist",
            IneligibleReason::SelfTarget => "cannot act on your own account",
            IneligibleReason::Guest => "guest account",
            IneligibleReason::Admin => "site administrator",
            IneligibleReason::AlreadyInactive => "account is already suspended or deleted",
            IneligibleReason::NotRecentUser => "account first accessed more than 30 days ago",
        };
        f.write_str(text)
    }
}

/// The redaction step that was running when a transaction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionStep {
    Begin,
    Comments,
    Discussions,
    Posts,
    Messages,
    Tags,
    Profile,
    Votes,
    Commit,
}

impl fmt::Display for RedactionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RedactionStep::Begin => "begin",
            RedactionStep::Comments => "delete comments",
            RedactionStep::Discussions => "delete discussions",
            RedactionStep::Posts => "delete posts",
            RedactionStep::Messages => "delete messages",
            RedactionStep::Tags => "clear tags",
            RedactionStep::Profile => "scrub profile",
            RedactionStep::Votes => "remove votes",
            RedactionStep::Commit => "commit",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("Target is not eligible: {0}")]
    IneligibleTarget(IneligibleReason),

    #[error("You've already reported this content as spam")]
    AlreadyVoted,

    #[error("Redaction of user {user_id} failed at '{step}': {message}")]
    TransactionFailure {
        user_id: u64,
        step: RedactionStep,
        message: String,
    },

    #[error("External spam service degraded: {0}")]
    ExternalServiceDegraded(String),

    #[error("Unsupported comment component: {0}")]
    UnknownContentKind(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

// ============================================================================
// STORAGE TRAITS (PORTS)
// ============================================================================

/// Which of a user's forum posts to count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostCountFilter {
    All,
    CreatedBefore(DateTime<Utc>),
    CreatedAfter(DateTime<Utc>),
}

/// User accounts and per-user preferences.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get_user(&self, user_id: u64) -> Result<Option<User>, ModerationError>;

    /// Users holding the moderator or admin role, who receive spam notices.
    async fn list_moderators(&self) -> Result<Vec<User>, ModerationError>;

    /// Active users whose first access is after `since`.
    async fn users_first_accessed_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<User>, ModerationError>;

    async fn get_preference(
        &self,
        user_id: u64,
        name: &str,
    ) -> Result<Option<String>, ModerationError>;

    /// Store a preference; `None` removes it.
    async fn set_preference(
        &self,
        user_id: u64,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), ModerationError>;

    /// Suspend an account, rewrite its description and kill its sessions.
    async fn suspend_user(&self, user_id: u64, description: &str) -> Result<(), ModerationError>;
}

/// Forum posts, comments and the redaction transaction.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn get_post(&self, post_id: u64) -> Result<Option<ForumPost>, ModerationError>;

    async fn get_discussion(
        &self,
        discussion_id: u64,
    ) -> Result<Option<Discussion>, ModerationError>;

    async fn get_forum(&self, forum_id: u64) -> Result<Option<Forum>, ModerationError>;

    async fn get_comment(&self, comment_id: u64) -> Result<Option<Comment>, ModerationError>;

    async fn count_posts(
        &self,
        user_id: u64,
        filter: PostCountFilter,
    ) -> Result<u64, ModerationError>;

    async fn content_counts(&self, user_id: u64) -> Result<UserContentCounts, ModerationError>;

    /// Open a transaction for the redaction steps. It must hold the write
    /// lock from the start so two redactions of one user serialize. Dropping
    /// it without `commit` must leave the store untouched.
    async fn begin_redaction(&self) -> Result<Box<dyn RedactionTransaction>, ModerationError>;
}

/// The narrow, audited mutations redaction performs inside one transaction.
#[async_trait]
pub trait RedactionTransaction: Send {
    /// Re-read the account inside the transaction and hold it for the rest
    /// of the redaction. `false` when it is gone or no longer active.
    async fn lock_active_user(&mut self, user_id: u64) -> Result<bool, ModerationError>;

    async fn delete_comments_by(&mut self, user_id: u64) -> Result<u64, ModerationError>;

    /// Discussions whose first post belongs to the user, with their forum.
    async fn discussions_started_by(
        &mut self,
        user_id: u64,
    ) -> Result<Vec<(Discussion, Forum)>, ModerationError>;

    /// Delete a discussion and every post in it.
    async fn delete_discussion(&mut self, discussion_id: u64) -> Result<u64, ModerationError>;

    /// The user's remaining posts, with the forum each lives in.
    async fn posts_by(&mut self, user_id: u64) -> Result<Vec<(ForumPost, Forum)>, ModerationError>;

    /// Delete a post and, recursively, its replies. Missing posts delete nothing.
    async fn delete_post_tree(&mut self, post_id: u64) -> Result<u64, ModerationError>;

    /// Delete read and unread messages sent by the user and their pending deliveries.
    async fn delete_messages_from(&mut self, user_id: u64) -> Result<u64, ModerationError>;

    async fn clear_tags(&mut self, user_id: u64) -> Result<u64, ModerationError>;

    /// Suspend the account and blank its contact and profile fields,
    /// custom profile values and stored profile files.
    async fn scrub_user(&mut self, user_id: u64, scrub: &ProfileScrub)
        -> Result<(), ModerationError>;

    async fn kill_sessions(&mut self, user_id: u64) -> Result<u64, ModerationError>;

    /// Delete every vote whose accused spammer is the user.
    async fn delete_votes_against(&mut self, user_id: u64) -> Result<u64, ModerationError>;

    async fn commit(&mut self) -> Result<(), ModerationError>;

    async fn rollback(&mut self) -> Result<(), ModerationError>;
}

/// Append-only vote rows.
#[async_trait]
pub trait VoteStore: Send + Sync {
    async fn has_vote(&self, voter: Voter, target: ReportTarget) -> Result<bool, ModerationError>;

    /// Insert a vote. Returns `false` when the (voter, target) uniqueness
    /// constraint rejected it.
    async fn insert_vote(&self, vote: NewVote) -> Result<bool, ModerationError>;

    async fn votes_for_kind(&self, kind: TargetKind) -> Result<Vec<Vote>, ModerationError>;

    async fn delete_votes_for_target(&self, target: ReportTarget) -> Result<u64, ModerationError>;

    async fn delete_votes_for_spammer(&self, spammer_id: u64) -> Result<u64, ModerationError>;

    async fn count_votes(&self) -> Result<u64, ModerationError>;
}

/// Queue of content waiting to be sent to the external checker.
#[async_trait]
pub trait CandidateStore: Send + Sync {
    async fn candidate_exists(
        &self,
        original_id: u64,
        is_spam: bool,
    ) -> Result<bool, ModerationError>;

    async fn insert_candidate(&self, candidate: NewSpamCandidate) -> Result<u64, ModerationError>;

    async fn get_candidate(
        &self,
        candidate_id: u64,
    ) -> Result<Option<ExternalSpamCandidate>, ModerationError>;

    async fn list_candidates(&self) -> Result<Vec<ExternalSpamCandidate>, ModerationError>;

    async fn delete_candidate(&self, candidate_id: u64) -> Result<bool, ModerationError>;
}

/// Everything the gateway needs from one backing store.
pub trait ModerationStore: IdentityStore + ContentStore + VoteStore + CandidateStore {}

impl<T> ModerationStore for T where T: IdentityStore + ContentStore + VoteStore + CandidateStore {}

// ============================================================================
// COLLABORATOR TRAITS
// ============================================================================

/// Authorization layer answering capability and access questions.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn has_capability(
        &self,
        actor: &User,
        capability: Capability,
    ) -> Result<bool, ModerationError>;

    /// Actor may reply in the forum (enrolled and allowed to post).
    async fn can_reply_in(&self, actor: &User, forum: &Forum) -> Result<bool, ModerationError>;

    /// Actor may see comments in the area.
    async fn can_access_comments(
        &self,
        actor: &User,
        area: CommentArea,
        item_id: u64,
    ) -> Result<bool, ModerationError>;
}

/// Sink delivering spam notices to moderators.
#[async_trait]
pub trait ModeratorNotifier: Send + Sync {
    async fn notify(
        &self,
        recipient: &User,
        notice: &SpamReportNotice,
    ) -> Result<(), ModerationError>;
}
