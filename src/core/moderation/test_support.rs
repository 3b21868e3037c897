// In-memory doubles for the moderation ports, used by the core unit tests.
//
// The redaction transaction here only records which steps ran; the real
// data effects are covered by the SQLite store tests in the infra layer.

use super::moderation_models::*;
use super::moderation_store::*;
use super::spam_checker::{ExternalSpamChecker, SpamCheckRequest};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub fn user(id: u64, role: Role) -> User {
    User {
        id,
        username: format!("user{}", id),
        email: format!("user{}@example.org", id),
        first_name: "User".to_string(),
        last_name: id.to_string(),
        state: AccountState::Active,
        role,
        first_access: Some(Utc::now() - Duration::days(365)),
        description: String::new(),
        url: String::new(),
        icq: String::new(),
        skype: String::new(),
        yahoo: String::new(),
        aim: String::new(),
        msn: String::new(),
        phone1: String::new(),
        phone2: String::new(),
        department: String::new(),
        institution: String::new(),
        city: "Perth".to_string(),
        picture: 0,
    }
}

pub fn ctx(actor: User) -> ModerationContext {
    ModerationContext::new(
        actor,
        RequestMeta {
            ip: "203.0.113.7".to_string(),
            user_agent: "test-agent".to_string(),
            referrer: "http://forum.example.org/".to_string(),
        },
    )
}

pub struct MockModerationStore {
    pub users: DashMap<u64, User>,
    pub preferences: DashMap<(u64, String), String>,
    pub forums: DashMap<u64, Forum>,
    pub discussions: DashMap<u64, Discussion>,
    pub posts: DashMap<u64, ForumPost>,
    pub comments: DashMap<u64, Comment>,
    pub votes: DashMap<(u64, ReportTarget), Vote>,
    pub candidates: DashMap<u64, ExternalSpamCandidate>,
    /// Every call made on redaction transactions, in order.
    pub redaction_calls: Arc<Mutex<Vec<String>>>,
    /// Name of the transaction method that should fail.
    pub fail_redaction_at: Mutex<Option<&'static str>>,
    /// Suspend this user as the transaction opens, as a concurrent redaction would.
    pub suspend_on_begin: Mutex<Option<u64>>,
    next_id: AtomicU64,
}

impl MockModerationStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            preferences: DashMap::new(),
            forums: DashMap::new(),
            discussions: DashMap::new(),
            posts: DashMap::new(),
            comments: DashMap::new(),
            votes: DashMap::new(),
            candidates: DashMap::new(),
            redaction_calls: Arc::new(Mutex::new(Vec::new())),
            fail_redaction_at: Mutex::new(None),
            suspend_on_begin: Mutex::new(None),
            next_id: AtomicU64::new(10_000),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn add_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn add_forum(&self, id: u64, kind: ForumKind) {
        self.forums.insert(
            id,
            Forum {
                id,
                name: format!("Forum {}", id),
                kind,
            },
        );
    }

    /// Start a discussion in `forum_id` whose first post is `post_id`.
    pub fn start_discussion(&self, forum_id: u64, post_id: u64, user_id: u64, message: &str) {
        let discussion_id = post_id;
        self.discussions.insert(
            discussion_id,
            Discussion {
                id: discussion_id,
                forum_id,
                name: format!("Discussion {}", discussion_id),
                first_post_id: post_id,
                user_id,
            },
        );
        self.posts.insert(
            post_id,
            ForumPost {
                id: post_id,
                discussion_id,
                parent_id: None,
                user_id,
                subject: format!("Subject {}", post_id),
                message: message.to_string(),
                created: Utc::now(),
            },
        );
    }

    /// Add `count` replies by `user_id`, all created at `created`.
    pub fn add_posts(&self, user_id: u64, count: u64, created: DateTime<Utc>) {
        for _ in 0..count {
            let id = self.next_id();
            self.posts.insert(
                id,
                ForumPost {
                    id,
                    discussion_id: 0,
                    parent_id: Some(0),
                    user_id,
                    subject: "Re: hello".to_string(),
                    message: "reply".to_string(),
                    created,
                },
            );
        }
    }

    pub fn redaction_calls(&self) -> Vec<String> {
        self.redaction_calls.lock().unwrap().clone()
    }

    pub fn add_comment(&self, id: u64, user_id: u64, component: &str, content: &str) {
        self.comments.insert(
            id,
            Comment {
                id,
                user_id,
                component: component.to_string(),
                item_id: 1,
                content: content.to_string(),
                created: Utc::now(),
            },
        );
    }
}

#[async_trait]
impl IdentityStore for MockModerationStore {
    async fn get_user(&self, user_id: u64) -> Result<Option<User>, ModerationError> {
        Ok(self.users.get(&user_id).map(|u| u.clone()))
    }

    async fn list_moderators(&self) -> Result<Vec<User>, ModerationError> {
        let mut moderators: Vec<User> = self
            .users
            .iter()
            .filter(|u| matches!(u.role, Role::Moderator | Role::Admin) && u.is_active())
            .map(|u| u.clone())
            .collect();
        moderators.sort_by_key(|u| u.id);
        Ok(moderators)
    }

    async fn users_first_accessed_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<User>, ModerationError> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter(|u| u.is_active() && u.first_access.is_some_and(|first| first > since))
            .map(|u| u.clone())
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn get_preference(
        &self,
        user_id: u64,
        name: &str,
    ) -> Result<Option<String>, ModerationError> {
        Ok(self
            .preferences
            .get(&(user_id, name.to_string()))
            .map(|v| v.clone()))
    }

    async fn set_preference(
        &self,
        user_id: u64,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), ModerationError> {
        let key = (user_id, name.to_string());
        match value {
            Some(value) => {
                self.preferences.insert(key, value.to_string());
            }
            None => {
                self.preferences.remove(&key);
            }
        }
        Ok(())
    }

    async fn suspend_user(&self, user_id: u64, description: &str) -> Result<(), ModerationError> {
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| ModerationError::NotFound(format!("user {}", user_id)))?;
        user.state = AccountState::Suspended;
        user.description = description.to_string();
        Ok(())
    }
}

#[async_trait]
impl ContentStore for MockModerationStore {
    async fn get_post(&self, post_id: u64) -> Result<Option<ForumPost>, ModerationError> {
        Ok(self.posts.get(&post_id).map(|p| p.clone()))
    }

    async fn get_discussion(
        &self,
        discussion_id: u64,
    ) -> Result<Option<Discussion>, ModerationError> {
        Ok(self.discussions.get(&discussion_id).map(|d| d.clone()))
    }

    async fn get_forum(&self, forum_id: u64) -> Result<Option<Forum>, ModerationError> {
        Ok(self.forums.get(&forum_id).map(|f| f.clone()))
    }

    async fn get_comment(&self, comment_id: u64) -> Result<Option<Comment>, ModerationError> {
        Ok(self.comments.get(&comment_id).map(|c| c.clone()))
    }

    async fn count_posts(
        &self,
        user_id: u64,
        filter: PostCountFilter,
    ) -> Result<u64, ModerationError> {
        Ok(self
            .posts
            .iter()
            .filter(|p| p.user_id == user_id)
            .filter(|p| match filter {
                PostCountFilter::All => true,
                PostCountFilter::CreatedBefore(at) => p.created < at,
                PostCountFilter::CreatedAfter(at) => p.created > at,
            })
            .count() as u64)
    }

    async fn content_counts(&self, user_id: u64) -> Result<UserContentCounts, ModerationError> {
        Ok(UserContentCounts {
            forum_posts: self.count_posts(user_id, PostCountFilter::All).await?,
            comments: self.comments.iter().filter(|c| c.user_id == user_id).count() as u64,
            ..Default::default()
        })
    }

    async fn begin_redaction(&self) -> Result<Box<dyn RedactionTransaction>, ModerationError> {
        if let Some(user_id) = *self.suspend_on_begin.lock().unwrap() {
            if let Some(mut user) = self.users.get_mut(&user_id) {
                user.state = AccountState::Suspended;
            }
        }
        let active_users: Vec<u64> = self
            .users
            .iter()
            .filter(|u| u.is_active())
            .map(|u| u.id)
            .collect();

        let forums: Vec<Forum> = self.forums.iter().map(|f| f.clone()).collect();
        let all_discussions: Vec<Discussion> = self.discussions.iter().map(|d| d.clone()).collect();
        let forum_of = |discussion_id: u64| {
            all_discussions
                .iter()
                .find(|d| d.id == discussion_id)
                .and_then(|d| forums.iter().find(|f| f.id == d.forum_id))
                .cloned()
        };

        let mut discussions: Vec<(Discussion, Forum)> = all_discussions
            .iter()
            .filter_map(|d| forum_of(d.id).map(|f| (d.clone(), f)))
            .collect();
        discussions.sort_by_key(|(d, _)| d.id);

        let all_posts: Vec<ForumPost> = self.posts.iter().map(|p| p.clone()).collect();
        let mut posts: Vec<(ForumPost, Forum)> = all_posts
            .into_iter()
            .filter_map(|p| forum_of(p.discussion_id).map(|f| (p, f)))
            .collect();
        posts.sort_by_key(|(p, _)| p.id);

        let fail_at = *self.fail_redaction_at.lock().unwrap();
        Ok(Box::new(ScriptedRedaction {
            calls: self.redaction_calls.clone(),
            fail_at,
            active_users,
            discussions,
            posts,
        }))
    }
}

/// Records redaction calls and fails on demand. Mutates nothing.
pub struct ScriptedRedaction {
    calls: Arc<Mutex<Vec<String>>>,
    fail_at: Option<&'static str>,
    active_users: Vec<u64>,
    discussions: Vec<(Discussion, Forum)>,
    posts: Vec<(ForumPost, Forum)>,
}

impl ScriptedRedaction {
    fn call(&self, name: &'static str, arg: u64) -> Result<(), ModerationError> {
        self.calls.lock().unwrap().push(format!("{}:{}", name, arg));
        if self.fail_at == Some(name) {
            return Err(ModerationError::StorageError(format!("{} failed", name)));
        }
        Ok(())
    }
}

#[async_trait]
impl RedactionTransaction for ScriptedRedaction {
    async fn lock_active_user(&mut self, user_id: u64) -> Result<bool, ModerationError> {
        self.call("lock_active_user", user_id)?;
        Ok(self.active_users.contains(&user_id))
    }

    async fn delete_comments_by(&mut self, user_id: u64) -> Result<u64, ModerationError> {
        self.call("delete_comments_by", user_id)?;
        Ok(1)
    }

    async fn discussions_started_by(
        &mut self,
        user_id: u64,
    ) -> Result<Vec<(Discussion, Forum)>, ModerationError> {
        self.call("discussions_started_by", user_id)?;
        Ok(self
            .discussions
            .iter()
            .filter(|(d, _)| d.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_discussion(&mut self, discussion_id: u64) -> Result<u64, ModerationError> {
        self.call("delete_discussion", discussion_id)?;
        Ok(1)
    }

    async fn posts_by(&mut self, user_id: u64) -> Result<Vec<(ForumPost, Forum)>, ModerationError> {
        self.call("posts_by", user_id)?;
        Ok(self
            .posts
            .iter()
            .filter(|(p, _)| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_post_tree(&mut self, post_id: u64) -> Result<u64, ModerationError> {
        self.call("delete_post_tree", post_id)?;
        Ok(1)
    }

    async fn delete_messages_from(&mut self, user_id: u64) -> Result<u64, ModerationError> {
        self.call("delete_messages_from", user_id)?;
        Ok(2)
    }

    async fn clear_tags(&mut self, user_id: u64) -> Result<u64, ModerationError> {
        self.call("clear_tags", user_id)?;
        Ok(0)
    }

    async fn scrub_user(
        &mut self,
        user_id: u64,
        _scrub: &ProfileScrub,
    ) -> Result<(), ModerationError> {
        self.call("scrub_user", user_id)
    }

    async fn kill_sessions(&mut self, user_id: u64) -> Result<u64, ModerationError> {
        self.call("kill_sessions", user_id)?;
        Ok(1)
    }

    async fn delete_votes_against(&mut self, user_id: u64) -> Result<u64, ModerationError> {
        self.call("delete_votes_against", user_id)?;
        Ok(0)
    }

    async fn commit(&mut self) -> Result<(), ModerationError> {
        self.call("commit", 0)
    }

    async fn rollback(&mut self) -> Result<(), ModerationError> {
        self.call("rollback", 0)
    }
}

#[async_trait]
impl VoteStore for MockModerationStore {
    async fn has_vote(&self, voter: Voter, target: ReportTarget) -> Result<bool, ModerationError> {
        Ok(self.votes.contains_key(&(voter.id(), target)))
    }

    async fn insert_vote(&self, vote: NewVote) -> Result<bool, ModerationError> {
        let key = (vote.voter.id(), vote.target);
        if self.votes.contains_key(&key) {
            return Ok(false);
        }
        let id = self.next_id();
        self.votes.insert(
            key,
            Vote {
                id,
                target: vote.target,
                spammer_id: vote.spammer_id,
                voter: vote.voter,
                weighting: vote.weighting,
                created_at: vote.created_at,
            },
        );
        Ok(true)
    }

    async fn votes_for_kind(&self, kind: TargetKind) -> Result<Vec<Vote>, ModerationError> {
        let mut votes: Vec<Vote> = self
            .votes
            .iter()
            .filter(|v| v.target.kind() == kind)
            .map(|v| v.clone())
            .collect();
        votes.sort_by_key(|v| v.id);
        Ok(votes)
    }

    async fn delete_votes_for_target(&self, target: ReportTarget) -> Result<u64, ModerationError> {
        let before = self.votes.len();
        self.votes.retain(|(_, t), _| *t != target);
        Ok((before - self.votes.len()) as u64)
    }

    async fn delete_votes_for_spammer(&self, spammer_id: u64) -> Result<u64, ModerationError> {
        let before = self.votes.len();
        self.votes.retain(|_, v| v.spammer_id != spammer_id);
        Ok((before - self.votes.len()) as u64)
    }

    async fn count_votes(&self) -> Result<u64, ModerationError> {
        Ok(self.votes.len() as u64)
    }
}

#[async_trait]
impl CandidateStore for MockModerationStore {
    async fn candidate_exists(
        &self,
        original_id: u64,
        is_spam: bool,
    ) -> Result<bool, ModerationError> {
        Ok(self
            .candidates
            .iter()
            .any(|c| c.original_id == original_id && c.is_spam == is_spam))
    }

    async fn insert_candidate(&self, candidate: NewSpamCandidate) -> Result<u64, ModerationError> {
        let id = self.next_id();
        self.candidates.insert(
            id,
            ExternalSpamCandidate {
                id,
                original_id: candidate.original_id,
                is_spam: candidate.is_spam,
                user_ip: candidate.user_ip,
                user_agent: candidate.user_agent,
                comment_author: candidate.comment_author,
                comment_author_email: candidate.comment_author_email,
                comment_content: candidate.comment_content,
                created_at: candidate.created_at,
            },
        );
        Ok(id)
    }

    async fn get_candidate(
        &self,
        candidate_id: u64,
    ) -> Result<Option<ExternalSpamCandidate>, ModerationError> {
        Ok(self.candidates.get(&candidate_id).map(|c| c.clone()))
    }

    async fn list_candidates(&self) -> Result<Vec<ExternalSpamCandidate>, ModerationError> {
        let mut candidates: Vec<_> = self.candidates.iter().map(|c| c.clone()).collect();
        candidates.sort_by_key(|c| c.id);
        Ok(candidates)
    }

    async fn delete_candidate(&self, candidate_id: u64) -> Result<bool, ModerationError> {
        Ok(self.candidates.remove(&candidate_id).is_some())
    }
}

/// Grants capabilities by role and lets everyone reply and read comments.
pub struct RoleOnlyAuthorizer;

#[async_trait]
impl Authorizer for RoleOnlyAuthorizer {
    async fn has_capability(
        &self,
        actor: &User,
        _capability: Capability,
    ) -> Result<bool, ModerationError> {
        Ok(matches!(actor.role, Role::Moderator | Role::Admin))
    }

    async fn can_reply_in(&self, actor: &User, _forum: &Forum) -> Result<bool, ModerationError> {
        Ok(actor.role != Role::Guest)
    }

    async fn can_access_comments(
        &self,
        actor: &User,
        _area: CommentArea,
        _item_id: u64,
    ) -> Result<bool, ModerationError> {
        Ok(actor.role != Role::Guest)
    }
}

/// Records every notice per recipient.
pub struct RecordingNotifier {
    pub sent: DashMap<u64, Vec<SpamReportNotice>>,
    pub fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            sent: DashMap::new(),
            fail: AtomicBool::new(false),
        }
    }

    pub fn total(&self) -> usize {
        self.sent.iter().map(|entry| entry.len()).sum()
    }
}

#[async_trait]
impl ModeratorNotifier for RecordingNotifier {
    async fn notify(
        &self,
        recipient: &User,
        notice: &SpamReportNotice,
    ) -> Result<(), ModerationError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ModerationError::StorageError("mailbox full".to_string()));
        }
        self.sent
            .entry(recipient.id)
            .or_default()
            .push(notice.clone());
        Ok(())
    }
}

/// Checker with a fixed verdict that remembers what it was asked.
pub struct FixedChecker {
    pub verdict: bool,
    pub acknowledge: bool,
    pub checked: DashMap<String, SpamCheckRequest>,
    pub reported: DashMap<u64, ExternalSpamCandidate>,
}

impl FixedChecker {
    pub fn new(verdict: bool) -> Self {
        Self {
            verdict,
            acknowledge: true,
            checked: DashMap::new(),
            reported: DashMap::new(),
        }
    }
}

#[async_trait]
impl ExternalSpamChecker for FixedChecker {
    async fn check_content(&self, request: &SpamCheckRequest) -> bool {
        self.checked
            .insert(request.content.clone(), request.clone());
        self.verdict
    }

    async fn report_missed_spam(&self, candidate: &ExternalSpamCandidate) -> bool {
        self.reported.insert(candidate.id, candidate.clone());
        self.acknowledge
    }
}
