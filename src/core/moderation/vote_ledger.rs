// Vote ledger - records spam votes, weights them and aggregates them for review.
//
// Votes are append-only. The only ways a vote disappears are clearing a report,
// clearing a spammer's reports, or redacting the spammer.

use super::moderation_models::{
    ModerationContext, NewSpamCandidate, NewVote, ReportTarget, SpamReportAggregate,
    SpamReportBuckets, TargetKind, User, Vote, Voter,
};
use super::moderation_store::{ModerationError, ModerationStore, PostCountFilter};
use super::report_subjects::resolve_subject;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Posts younger than this do not count towards a voter's trust.
pub const TRUSTED_POST_AGE_HOURS: i64 = 24;

/// Voters need this many trusted posts before their vote weighs anything.
pub const MIN_TRUSTED_POSTS: u64 = 5;

/// Authors with more posts than this are assumed legitimate.
pub const PROTECTED_AUTHOR_POSTS: u64 = 50;

pub const POSTS_PER_EXTRA_WEIGHT: u64 = 50;

/// Weight of one vote.
///
/// Weighting only orders the review tables; it never triggers anything.
pub fn vote_weighting(voter_trusted_posts: u64, spammer_total_posts: u64) -> u32 {
    if spammer_total_posts > PROTECTED_AUTHOR_POSTS || voter_trusted_posts < MIN_TRUSTED_POSTS {
        return 0;
    }
    (1 + voter_trusted_posts / POSTS_PER_EXTRA_WEIGHT) as u32
}

pub struct VoteLedger<S: ModerationStore> {
    store: Arc<S>,
}

impl<S: ModerationStore> VoteLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn has_voted(
        &self,
        voter: Voter,
        target: ReportTarget,
    ) -> Result<bool, ModerationError> {
        self.store.has_vote(voter, target).await
    }

    pub async fn vote_weight(
        &self,
        voter: Voter,
        spammer_id: u64,
        now: DateTime<Utc>,
    ) -> Result<u32, ModerationError> {
        let voter_id = match voter {
            Voter::System => return Ok(0),
            Voter::User(id) => id,
        };

        let trusted_before = now - Duration::hours(TRUSTED_POST_AGE_HOURS);
        let trusted = self
            .store
            .count_posts(voter_id, PostCountFilter::CreatedBefore(trusted_before))
            .await?;
        if trusted < MIN_TRUSTED_POSTS {
            return Ok(0);
        }

        let spammer_posts = self
            .store
            .count_posts(spammer_id, PostCountFilter::All)
            .await?;
        Ok(vote_weighting(trusted, spammer_posts))
    }

    /// Store one vote and return its weighting.
    ///
    /// Post votes also queue the post for the external checker.
    pub async fn record_vote(
        &self,
        ctx: &ModerationContext,
        spammer: &User,
        voter: Voter,
        target: ReportTarget,
        content_text: &str,
    ) -> Result<u32, ModerationError> {
        if self.store.has_vote(voter, target).await? {
            return Err(ModerationError::AlreadyVoted);
        }

        let weighting = self.vote_weight(voter, spammer.id, ctx.now).await?;
        let inserted = self
            .store
            .insert_vote(NewVote {
                target,
                spammer_id: spammer.id,
                voter,
                weighting,
                created_at: ctx.now,
            })
            .await?;
        // Lost a race with a concurrent vote from the same voter.
        if !inserted {
            return Err(ModerationError::AlreadyVoted);
        }

        tracing::info!(
            target: "audit",
            spammer_id = spammer.id,
            voter_id = voter.id(),
            report = %target,
            weighting,
            "Spam vote recorded"
        );

        if let ReportTarget::Post { post_id } = target {
            self.queue_candidate(ctx, post_id, spammer, content_text)
                .await?;
        }

        Ok(weighting)
    }

    /// Queue content as missed spam for the external checker, once per original id.
    pub async fn queue_candidate(
        &self,
        ctx: &ModerationContext,
        original_id: u64,
        author: &User,
        content_text: &str,
    ) -> Result<bool, ModerationError> {
        if self.store.candidate_exists(original_id, true).await? {
            return Ok(false);
        }

        self.store
            .insert_candidate(NewSpamCandidate {
                original_id,
                is_spam: true,
                user_ip: ctx.request.ip.clone(),
                user_agent: ctx.request.user_agent.clone(),
                comment_author: author.full_name(),
                comment_author_email: author.email.clone(),
                comment_content: content_text.to_string(),
                created_at: ctx.now,
            })
            .await?;
        Ok(true)
    }

    /// Group votes by (spammer, target), highest score first.
    pub async fn aggregate(
        &self,
        kind: TargetKind,
    ) -> Result<Vec<SpamReportAggregate>, ModerationError> {
        let votes = self.store.votes_for_kind(kind).await?;

        let mut order: Vec<(u64, ReportTarget)> = Vec::new();
        let mut groups: HashMap<(u64, ReportTarget), Vec<Vote>> = HashMap::new();
        for vote in votes {
            let key = (vote.spammer_id, vote.target);
            groups
                .entry(key)
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(vote);
        }

        let mut aggregates = Vec::with_capacity(order.len());
        for key in order {
            let votes = groups.remove(&key).unwrap_or_default();
            let (spammer_id, target) = key;
            let summary = resolve_subject(self.store.as_ref(), target)
                .await?
                .map(|subject| subject.content_summary());

            aggregates.push(SpamReportAggregate {
                spammer_id,
                target,
                score: votes.iter().map(|v| v.weighting as u64).sum(),
                voter_count: votes.len(),
                voters: votes.iter().map(|v| (v.voter, v.weighting)).collect(),
                summary,
            });
        }

        aggregates.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(b.voter_count.cmp(&a.voter_count))
        });
        Ok(aggregates)
    }

    /// Aggregates split by whether the reported content still exists.
    pub async fn aggregate_buckets(
        &self,
        kind: TargetKind,
    ) -> Result<SpamReportBuckets, ModerationError> {
        let (orphaned, live): (Vec<_>, Vec<_>) = self
            .aggregate(kind)
            .await?
            .into_iter()
            .partition(|aggregate| aggregate.is_orphaned());
        Ok(SpamReportBuckets { live, orphaned })
    }

    pub async fn clear_votes_for(&self, target: ReportTarget) -> Result<u64, ModerationError> {
        self.store.delete_votes_for_target(target).await
    }

    pub async fn clear_votes_for_spammer(&self, spammer_id: u64) -> Result<u64, ModerationError> {
        self.store.delete_votes_for_spammer(spammer_id).await
    }

    pub async fn pending_count(&self) -> Result<u64, ModerationError> {
        self.store.count_votes().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_store::CandidateStore;
    use crate::core::moderation::test_support::{ctx, user, MockModerationStore};
    use crate::core::moderation::{ForumKind, Role};

    const SPAMMER: u64 = 5;
    const VOTER: u64 = 6;

    fn setup() -> (Arc<MockModerationStore>, VoteLedger<MockModerationStore>) {
        let store = Arc::new(MockModerationStore::new());
        store.add_user(user(SPAMMER, Role::Ordinary));
        store.add_user(user(VOTER, Role::Ordinary));
        store.add_user(user(7, Role::Ordinary));
        store.add_forum(1, ForumKind::General);
        store.start_discussion(1, 100, SPAMMER, "buy now");
        store.start_discussion(1, 101, SPAMMER, "buy again");
        (store.clone(), VoteLedger::new(store))
    }

    #[test]
    fn test_weighting_rules() {
        assert_eq!(vote_weighting(0, 1), 0);
        assert_eq!(vote_weighting(4, 1), 0);
        assert_eq!(vote_weighting(5, 1), 1);
        assert_eq!(vote_weighting(49, 1), 1);
        assert_eq!(vote_weighting(50, 1), 2);
        assert_eq!(vote_weighting(150, 1), 4);
        assert_eq!(vote_weighting(150, 50), 4);
        assert_eq!(vote_weighting(150, 51), 0);
    }

    #[tokio::test]
    async fn test_new_voter_weighs_nothing() {
        let (_store, ledger) = setup();
        let weight = ledger
            .vote_weight(Voter::User(VOTER), SPAMMER, Utc::now())
            .await
            .unwrap();
        assert_eq!(weight, 0);
    }

    #[tokio::test]
    async fn test_recent_posts_do_not_earn_trust() {
        let (store, ledger) = setup();
        let now = Utc::now();
        store.add_posts(VOTER, 150, now - Duration::hours(2));

        assert_eq!(
            ledger.vote_weight(Voter::User(VOTER), SPAMMER, now).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_trusted_voter_weight() {
        let (store, ledger) = setup();
        let now = Utc::now();
        store.add_posts(VOTER, 150, now - Duration::days(3));

        assert_eq!(
            ledger.vote_weight(Voter::User(VOTER), SPAMMER, now).await.unwrap(),
            4
        );
        assert_eq!(
            ledger.vote_weight(Voter::System, SPAMMER, now).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_prolific_author_votes_weigh_nothing() {
        let (store, ledger) = setup();
        let now = Utc::now();
        store.add_posts(VOTER, 150, now - Duration::days(3));
        store.add_posts(SPAMMER, 50, now - Duration::days(3));

        assert_eq!(
            ledger.vote_weight(Voter::User(VOTER), SPAMMER, now).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_second_vote_is_rejected() {
        let (store, ledger) = setup();
        let spammer = user(SPAMMER, Role::Ordinary);
        let ctx = ctx(user(VOTER, Role::Ordinary));
        let target = ReportTarget::Post { post_id: 100 };

        assert!(!ledger.has_voted(Voter::User(VOTER), target).await.unwrap());
        ledger
            .record_vote(&ctx, &spammer, Voter::User(VOTER), target, "buy now")
            .await
            .unwrap();
        assert!(ledger.has_voted(Voter::User(VOTER), target).await.unwrap());

        let again = ledger
            .record_vote(&ctx, &spammer, Voter::User(VOTER), target, "buy now")
            .await;
        assert!(matches!(again, Err(ModerationError::AlreadyVoted)));
        assert_eq!(store.votes.len(), 1);
    }

    #[tokio::test]
    async fn test_post_votes_queue_one_candidate() {
        let (store, ledger) = setup();
        let spammer = user(SPAMMER, Role::Ordinary);
        let target = ReportTarget::Post { post_id: 100 };

        ledger
            .record_vote(&ctx(user(VOTER, Role::Ordinary)), &spammer, Voter::User(VOTER), target, "x")
            .await
            .unwrap();
        ledger
            .record_vote(&ctx(user(7, Role::Ordinary)), &spammer, Voter::User(7), target, "x")
            .await
            .unwrap();
        ledger
            .record_vote(
                &ctx(user(7, Role::Ordinary)),
                &spammer,
                Voter::User(7),
                ReportTarget::Profile { user_id: SPAMMER },
                "",
            )
            .await
            .unwrap();

        let candidates = store.list_candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].original_id, 100);
        assert!(candidates[0].is_spam);
        assert_eq!(candidates[0].comment_author_email, "user5@example.org");
    }

    #[tokio::test]
    async fn test_aggregate_orders_by_score_then_voters() {
        let (store, ledger) = setup();
        let now = Utc::now();
        store.add_posts(VOTER, 60, now - Duration::days(3));
        let spammer = user(SPAMMER, Role::Ordinary);

        // Post 100: one vote weighing 2. Post 101: two votes weighing 0.
        ledger
            .record_vote(&ctx(user(VOTER, Role::Ordinary)), &spammer, Voter::User(VOTER), ReportTarget::Post { post_id: 100 }, "")
            .await
            .unwrap();
        for voter in [7, 8] {
            ledger
                .record_vote(&ctx(user(voter, Role::Ordinary)), &spammer, Voter::User(voter), ReportTarget::Post { post_id: 101 }, "")
                .await
                .unwrap();
        }

        let aggregates = ledger.aggregate(TargetKind::Post).await.unwrap();
        assert_eq!(aggregates.len(), 2);
        assert_eq!(aggregates[0].target, ReportTarget::Post { post_id: 100 });
        assert_eq!(aggregates[0].score, 2);
        assert_eq!(aggregates[1].voter_count, 2);
        assert_eq!(aggregates[1].score, 0);
        assert!(ledger.aggregate(TargetKind::Comment).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_buckets_split_orphaned_reports() {
        let (store, ledger) = setup();
        let spammer = user(SPAMMER, Role::Ordinary);
        let ctx = ctx(user(VOTER, Role::Ordinary));
        for post_id in [100, 101] {
            ledger
                .record_vote(&ctx, &spammer, Voter::User(VOTER), ReportTarget::Post { post_id }, "")
                .await
                .unwrap();
        }
        store.posts.remove(&101);

        let buckets = ledger.aggregate_buckets(TargetKind::Post).await.unwrap();
        assert_eq!(buckets.live.len(), 1);
        assert_eq!(buckets.orphaned.len(), 1);
        assert_eq!(buckets.orphaned[0].target, ReportTarget::Post { post_id: 101 });
        assert_eq!(buckets.live[0].summary.as_ref().unwrap().excerpt, "buy now");
    }

    #[tokio::test]
    async fn test_clearing_votes() {
        let (_store, ledger) = setup();
        let spammer = user(SPAMMER, Role::Ordinary);
        let ctx = ctx(user(VOTER, Role::Ordinary));
        for post_id in [100, 101] {
            ledger
                .record_vote(&ctx, &spammer, Voter::User(VOTER), ReportTarget::Post { post_id }, "")
                .await
                .unwrap();
        }

        assert_eq!(ledger.clear_votes_for(ReportTarget::Post { post_id: 100 }).await.unwrap(), 1);
        assert_eq!(ledger.pending_count().await.unwrap(), 1);
        assert_eq!(ledger.clear_votes_for_spammer(SPAMMER).await.unwrap(), 1);
        assert_eq!(ledger.pending_count().await.unwrap(), 0);
    }
}
