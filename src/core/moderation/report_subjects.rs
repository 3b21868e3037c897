// The things a user can be reported for.
//
// Each target variant resolves to a `ReportSubject` that knows how to
// describe itself for the review tables and who is allowed to flag it.
// The vote bookkeeping itself is shared and lives in `VoteLedger`.

use super::moderation_models::{
    AccountState, Comment, CommentArea, ContentSummary, Forum, ForumPost, ReportTarget, User,
};
use super::moderation_store::{Authorizer, ContentStore, IdentityStore, ModerationError};
use async_trait::async_trait;

const EXCERPT_CHARS: usize = 200;

#[async_trait]
pub trait ReportSubject: Send + Sync {
    fn target(&self) -> ReportTarget;

    /// Id of the user accused of spamming.
    fn spammer_id(&self) -> u64;

    /// Author record, `None` once the account row is gone.
    fn author(&self) -> Option<&User>;

    /// Text sent along when the content is queued for the external checker.
    fn content_text(&self) -> String;

    fn content_summary(&self) -> ContentSummary;

    /// Fails unless `actor` may see (and so report) this content.
    async fn permission_check(
        &self,
        authorizer: &dyn Authorizer,
        actor: &User,
    ) -> Result<(), ModerationError>;
}

fn excerpt(text: &str) -> String {
    let mut chars = text.chars();
    let short: String = chars.by_ref().take(EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", short)
    } else {
        short
    }
}

fn author_name(author: Option<&User>) -> String {
    author
        .map(User::full_name)
        .unwrap_or_else(|| "Unknown user".to_string())
}

pub struct PostSubject {
    pub post: ForumPost,
    pub forum: Forum,
    pub author: Option<User>,
}

#[async_trait]
impl ReportSubject for PostSubject {
    fn target(&self) -> ReportTarget {
        ReportTarget::Post {
            post_id: self.post.id,
        }
    }

    fn spammer_id(&self) -> u64 {
        self.post.user_id
    }

    fn author(&self) -> Option<&User> {
        self.author.as_ref()
    }

    fn content_text(&self) -> String {
        format!("{}\n{}", self.post.subject, self.post.message)
    }

    fn content_summary(&self) -> ContentSummary {
        ContentSummary {
            author_id: self.post.user_id,
            author_name: author_name(self.author.as_ref()),
            title: self.post.subject.clone(),
            excerpt: excerpt(&self.post.message),
        }
    }

    async fn permission_check(
        &self,
        authorizer: &dyn Authorizer,
        actor: &User,
    ) -> Result<(), ModerationError> {
        if authorizer.can_reply_in(actor, &self.forum).await? {
            Ok(())
        } else {
            Err(ModerationError::PermissionDenied(format!(
                "cannot post in forum '{}'",
                self.forum.name
            )))
        }
    }
}

pub struct CommentSubject {
    pub comment: Comment,
    pub author: Option<User>,
}

#[async_trait]
impl ReportSubject for CommentSubject {
    fn target(&self) -> ReportTarget {
        ReportTarget::Comment {
            comment_id: self.comment.id,
        }
    }

    fn spammer_id(&self) -> u64 {
        self.comment.user_id
    }

    fn author(&self) -> Option<&User> {
        self.author.as_ref()
    }

    fn content_text(&self) -> String {
        self.comment.content.clone()
    }

    fn content_summary(&self) -> ContentSummary {
        ContentSummary {
            author_id: self.comment.user_id,
            author_name: author_name(self.author.as_ref()),
            title: format!("Comment in {}", self.comment.component),
            excerpt: excerpt(&self.comment.content),
        }
    }

    async fn permission_check(
        &self,
        authorizer: &dyn Authorizer,
        actor: &User,
    ) -> Result<(), ModerationError> {
        let area = CommentArea::parse(&self.comment.component).ok_or_else(|| {
            ModerationError::UnknownContentKind(self.comment.component.clone())
        })?;

        if authorizer
            .can_access_comments(actor, area, self.comment.item_id)
            .await?
        {
            Ok(())
        } else {
            Err(ModerationError::PermissionDenied(format!(
                "cannot view comments in {}",
                self.comment.component
            )))
        }
    }
}

pub struct ProfileSubject {
    pub user: User,
}

#[async_trait]
impl ReportSubject for ProfileSubject {
    fn target(&self) -> ReportTarget {
        ReportTarget::Profile {
            user_id: self.user.id,
        }
    }

    fn spammer_id(&self) -> u64 {
        self.user.id
    }

    fn author(&self) -> Option<&User> {
        Some(&self.user)
    }

    fn content_text(&self) -> String {
        self.user.description.clone()
    }

    fn content_summary(&self) -> ContentSummary {
        ContentSummary {
            author_id: self.user.id,
            author_name: self.user.full_name(),
            title: format!("Profile of {}", self.user.username),
            excerpt: excerpt(&self.user.description),
        }
    }

    // Profiles are public to signed-in users.
    async fn permission_check(
        &self,
        _authorizer: &dyn Authorizer,
        actor: &User,
    ) -> Result<(), ModerationError> {
        if actor.is_active() {
            Ok(())
        } else {
            Err(ModerationError::PermissionDenied(
                "inactive accounts cannot view profiles".to_string(),
            ))
        }
    }
}

/// Look up the content behind a target. `None` when it no longer exists.
pub async fn resolve_subject<S>(
    store: &S,
    target: ReportTarget,
) -> Result<Option<Box<dyn ReportSubject>>, ModerationError>
where
    S: IdentityStore + ContentStore + ?Sized,
{
    match target {
        ReportTarget::Post { post_id } => {
            let Some(post) = store.get_post(post_id).await? else {
                return Ok(None);
            };
            let Some(discussion) = store.get_discussion(post.discussion_id).await? else {
                return Ok(None);
            };
            let Some(forum) = store.get_forum(discussion.forum_id).await? else {
                return Ok(None);
            };
            let author = store.get_user(post.user_id).await?;
            Ok(Some(Box::new(PostSubject {
                post,
                forum,
                author,
            })))
        }
        ReportTarget::Comment { comment_id } => {
            let Some(comment) = store.get_comment(comment_id).await? else {
                return Ok(None);
            };
            let author = store.get_user(comment.user_id).await?;
            Ok(Some(Box::new(CommentSubject { comment, author })))
        }
        ReportTarget::Profile { user_id } => match store.get_user(user_id).await? {
            Some(user) if user.state != AccountState::Deleted => {
                Ok(Some(Box::new(ProfileSubject { user })))
            }
            _ => Ok(None),
        },
    }
}
