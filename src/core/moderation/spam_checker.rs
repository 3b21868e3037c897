// Port for the third-party spam verdict service.
//
// Implementations must never fail the caller: network problems and invalid
// credentials degrade to "not spam" / "not acknowledged" and get logged.

use super::moderation_models::{ExternalSpamCandidate, ModerationContext, User};
use async_trait::async_trait;

/// Everything the verdict service wants to know about a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SpamCheckRequest {
    pub content: String,
    pub locale: String,
    pub author_name: String,
    pub author_email: String,
    pub author_url: String,
    pub user_ip: String,
    pub user_agent: String,
    pub referrer: String,
}

impl SpamCheckRequest {
    /// Describe a submission by `author`, made through the context's request.
    pub fn for_author(
        ctx: &ModerationContext,
        author: &User,
        content: String,
        locale: &str,
    ) -> Self {
        Self {
            content,
            locale: locale.to_string(),
            author_name: author.full_name(),
            author_email: author.email.clone(),
            author_url: author.url.clone(),
            user_ip: ctx.request.ip.clone(),
            user_agent: ctx.request.user_agent.clone(),
            referrer: ctx.request.referrer.clone(),
        }
    }
}

#[async_trait]
pub trait ExternalSpamChecker: Send + Sync {
    /// `true` only when the service positively says "spam".
    async fn check_content(&self, request: &SpamCheckRequest) -> bool;

    /// Tell the service about spam it missed. `true` when acknowledged.
    async fn report_missed_spam(&self, candidate: &ExternalSpamCandidate) -> bool;
}
