// Moderation domain models - data structures for the spam-reporting system.
//
// These are pure domain types with no storage or HTTP dependencies.
// The infra layer maps them to rows and request payloads.

use chrono::{DateTime, Duration, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Voter id stored for votes cast by the automated profile sweep.
pub const SYSTEM_VOTER_ID: u64 = 0;

// ============================================================================
// USERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountState {
    Active,
    Suspended,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Guest,
    Ordinary,
    Moderator,
    Admin,
}

/// A site account as seen by the moderation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub state: AccountState,
    pub role: Role,
    /// `None` if the account never logged in.
    pub first_access: Option<DateTime<Utc>>,
    pub description: String,
    pub url: String,
    pub icq: String,
    pub skype: String,
    pub yahoo: String,
    pub aim: String,
    pub msn: String,
    pub phone1: String,
    pub phone2: String,
    pub department: String,
    pub institution: String,
    pub city: String,
    /// Stored profile picture file id, 0 when none.
    pub picture: u64,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn is_active(&self) -> bool {
        self.state == AccountState::Active
    }

    /// Guests and admins are never report or redaction targets.
    pub fn is_protected(&self) -> bool {
        matches!(self.role, Role::Guest | Role::Admin)
    }

    /// First access within `window` of `now`. Used by the redaction recency
    /// rail, where never-accessed accounts count as recent.
    pub fn is_recent(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.first_access {
            Some(first) => first > now - window,
            None => true,
        }
    }

    /// Account younger than `max_age_secs`. Accounts that never signed in
    /// have no age and are not young.
    pub fn is_younger_than(&self, now: DateTime<Utc>, max_age_secs: u64) -> bool {
        match (self.first_access, window_start(now, max_age_secs)) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(first), Some(since)) => first > since,
        }
    }
}

/// Start of a window of `secs` seconds ending at `now`. `None` when the
/// window reaches back further than chrono can represent, i.e. unbounded.
pub fn window_start(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).ok()?;
    now.checked_sub_signed(TimeDelta::try_seconds(secs)?)
}

// ============================================================================
// CONTENT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForumKind {
    General,
    /// Forums holding exactly one discussion. Redaction leaves these alone.
    SingleDiscussion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forum {
    pub id: u64,
    pub name: String,
    pub kind: ForumKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discussion {
    pub id: u64,
    pub forum_id: u64,
    pub name: String,
    pub first_post_id: u64,
    pub user_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumPost {
    pub id: u64,
    pub discussion_id: u64,
    /// `None` for the post that starts a discussion.
    pub parent_id: Option<u64>,
    pub user_id: u64,
    pub subject: String,
    pub message: String,
    pub created: DateTime<Utc>,
}

/// Where a comment lives. Comments in any other area cannot be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentArea {
    Blog,
    Course,
    Page,
    Wiki,
}

impl CommentArea {
    pub fn parse(component: &str) -> Option<Self> {
        match component.trim().to_ascii_lowercase().as_str() {
            "blog" | "blog_entries" => Some(CommentArea::Blog),
            "course" => Some(CommentArea::Course),
            "page" | "mod_page" => Some(CommentArea::Page),
            "wiki" | "mod_wiki" => Some(CommentArea::Wiki),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub user_id: u64,
    /// Raw component string as stored by the content store.
    pub component: String,
    pub item_id: u64,
    pub content: String,
    pub created: DateTime<Utc>,
}

/// Values written over a redacted account's profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileScrub {
    pub description: String,
    /// Placeholder stored in the city field.
    pub city: String,
}

/// Per-user record counts shown before a deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContentCounts {
    pub unread_messages: u64,
    pub read_messages: u64,
    pub forum_posts: u64,
    pub comments: u64,
    pub tags: u64,
}

// ============================================================================
// REPORT TARGETS & VOTES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    Post,
    Comment,
    Profile,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Post => "post",
            TargetKind::Comment => "comment",
            TargetKind::Profile => "profile",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "post" => Some(TargetKind::Post),
            "comment" => Some(TargetKind::Comment),
            "profile" => Some(TargetKind::Profile),
            _ => None,
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a report points at.
///
/// Profile reports use the reported user's id as their target id so the
/// one-vote-per-voter rule applies per profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportTarget {
    Post { post_id: u64 },
    Comment { comment_id: u64 },
    Profile { user_id: u64 },
}

impl ReportTarget {
    pub fn new(kind: TargetKind, target_id: u64) -> Self {
        match kind {
            TargetKind::Post => ReportTarget::Post { post_id: target_id },
            TargetKind::Comment => ReportTarget::Comment {
                comment_id: target_id,
            },
            TargetKind::Profile => ReportTarget::Profile { user_id: target_id },
        }
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            ReportTarget::Post { .. } => TargetKind::Post,
            ReportTarget::Comment { .. } => TargetKind::Comment,
            ReportTarget::Profile { .. } => TargetKind::Profile,
        }
    }

    pub fn target_id(&self) -> u64 {
        match self {
            ReportTarget::Post { post_id } => *post_id,
            ReportTarget::Comment { comment_id } => *comment_id,
            ReportTarget::Profile { user_id } => *user_id,
        }
    }
}

impl fmt::Display for ReportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.target_id())
    }
}

/// Who cast a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Voter {
    User(u64),
    /// The automated profile sweep.
    System,
}

impl Voter {
    pub fn id(&self) -> u64 {
        match self {
            Voter::User(id) => *id,
            Voter::System => SYSTEM_VOTER_ID,
        }
    }

    pub fn from_id(id: u64) -> Self {
        if id == SYSTEM_VOTER_ID {
            Voter::System
        } else {
            Voter::User(id)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub id: u64,
    pub target: ReportTarget,
    pub spammer_id: u64,
    pub voter: Voter,
    pub weighting: u32,
    pub created_at: DateTime<Utc>,
}

/// A vote before it has been stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVote {
    pub target: ReportTarget,
    pub spammer_id: u64,
    pub voter: Voter,
    pub weighting: u32,
    pub created_at: DateTime<Utc>,
}

/// Short description of reported content for the review tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSummary {
    pub author_id: u64,
    pub author_name: String,
    pub title: String,
    pub excerpt: String,
}

/// Votes grouped by (spammer, target). Never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpamReportAggregate {
    pub spammer_id: u64,
    pub target: ReportTarget,
    pub score: u64,
    pub voter_count: usize,
    pub voters: Vec<(Voter, u32)>,
    /// `None` when the reported content no longer exists.
    pub summary: Option<ContentSummary>,
}

impl SpamReportAggregate {
    pub fn is_orphaned(&self) -> bool {
        self.summary.is_none()
    }
}

/// Aggregates for one target kind, split into live and orphaned buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpamReportBuckets {
    pub live: Vec<SpamReportAggregate>,
    pub orphaned: Vec<SpamReportAggregate>,
}

// ============================================================================
// EXTERNAL CHECKER QUEUE
// ============================================================================

/// Content queued for later submission to the external checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalSpamCandidate {
    pub id: u64,
    pub original_id: u64,
    pub is_spam: bool,
    pub user_ip: String,
    pub user_agent: String,
    pub comment_author: String,
    pub comment_author_email: String,
    pub comment_content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSpamCandidate {
    pub original_id: u64,
    pub is_spam: bool,
    pub user_ip: String,
    pub user_agent: String,
    pub comment_author: String,
    pub comment_author_email: String,
    pub comment_content: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// REQUEST CONTEXT
// ============================================================================

/// Transport metadata of the request being handled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub ip: String,
    pub user_agent: String,
    pub referrer: String,
}

/// The acting user and request for one moderation operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ModerationContext {
    pub actor: User,
    pub request: RequestMeta,
    pub now: DateTime<Utc>,
}

impl ModerationContext {
    pub fn new(actor: User, request: RequestMeta) -> Self {
        Self {
            actor,
            request,
            now: Utc::now(),
        }
    }

    /// Pin the clock, mostly for tests and replays.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    ViewSpamReports,
    DeleteSpammer,
}

// ============================================================================
// SUBMISSION VERDICTS
// ============================================================================

/// Why a submission was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReason {
    ExternalChecker,
    InvalidChars(u32),
    TriggerWords,
    PostLimit,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::ExternalChecker => write!(f, "external-checker"),
            BlockReason::InvalidChars(percent) => write!(f, "invalid-chars:{}", percent),
            BlockReason::TriggerWords => write!(f, "trigger-words"),
            BlockReason::PostLimit => write!(f, "post-limit"),
        }
    }
}

/// Outcome of the pre-publish gate. The request boundary renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionVerdict {
    Allowed,
    Blocked {
        reason: BlockReason,
        account_suspended: bool,
    },
}

impl SubmissionVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, SubmissionVerdict::Allowed)
    }
}

/// Message sent to each moderator when content is flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpamReportNotice {
    pub spammer_id: u64,
    pub spammer_name: String,
    pub target: ReportTarget,
    pub review_url: String,
}

impl SpamReportNotice {
    pub fn title(&self) -> String {
        format!("{} may be a spammer.", self.spammer_name)
    }

    pub fn body(&self) -> String {
        format!(
            "{} may be a spammer.\nView spam reports at {}",
            self.spammer_name, self.review_url
        )
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Site-level moderation settings. Unset or zero values disable a check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationSettings {
    /// Site roots whose links never count towards URL density.
    pub site_urls: Vec<String>,
    /// Comma separated list of words that mark a post as spam.
    pub banned_words: Option<String>,
    pub checker_key: Option<String>,
    /// Only accounts younger than this are sent to the external checker.
    pub checker_max_account_age_secs: Option<u64>,
    pub checker_timeout_secs: u64,
    pub invalid_chars_percentage: Option<u32>,
    pub throttle_post_count: Option<u32>,
    pub throttle_duration_secs: Option<u64>,
    /// Refuse redaction of accounts first seen more than 30 days ago.
    pub require_recent_user: bool,
    pub review_queue_url: String,
    pub site_timezone: Tz,
    /// Locale to legacy charset label overrides.
    pub legacy_charsets: HashMap<String, String>,
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            site_urls: Vec::new(),
            banned_words: None,
            checker_key: None,
            checker_max_account_age_secs: None,
            checker_timeout_secs: 5,
            invalid_chars_percentage: None,
            throttle_post_count: None,
            throttle_duration_secs: None,
            require_recent_user: false,
            review_queue_url: "/spam/reports".to_string(),
            site_timezone: Tz::UTC,
            legacy_charsets: HashMap::new(),
        }
    }
}

impl ModerationSettings {
    /// Timestamp in the form "Monday 5th March 3:04 PM", in the site timezone.
    pub fn human_timestamp(&self, at: DateTime<Utc>) -> String {
        use chrono::Datelike;

        let local = at.with_timezone(&self.site_timezone);
        let day = local.day();
        let suffix = match (day % 10, day % 100) {
            (_, 11..=13) => "th",
            (1, _) => "st",
            (2, _) => "nd",
            (3, _) => "rd",
            _ => "th",
        };
        format!(
            "{} {}{} {}",
            local.format("%A"),
            day,
            suffix,
            local.format("%B %-I:%M %p")
        )
    }
}
