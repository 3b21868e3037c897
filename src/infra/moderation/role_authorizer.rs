// Role-based authorizer.
//
// Answers from the actor's current record in the identity store rather than
// the copy carried by the request, so a suspension takes effect immediately.

use crate::core::moderation::{
    Authorizer, Capability, CommentArea, Forum, IdentityStore, ModerationError, Role, User,
};
use async_trait::async_trait;
use std::sync::Arc;

pub struct RoleAuthorizer<S: IdentityStore> {
    store: Arc<S>,
}

impl<S: IdentityStore> RoleAuthorizer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The actor as stored now, if still active and signed in.
    async fn current(&self, actor: &User) -> Result<Option<User>, ModerationError> {
        Ok(self
            .store
            .get_user(actor.id)
            .await?
            .filter(|user| user.is_active() && user.role != Role::Guest))
    }
}

fn role_grants(role: Role, capability: Capability) -> bool {
    match role {
        Role::Admin => true,
        Role::Moderator => matches!(
            capability,
            Capability::ViewSpamReports | Capability::DeleteSpammer
        ),
        Role::Ordinary | Role::Guest => false,
    }
}

#[async_trait]
impl<S: IdentityStore> Authorizer for RoleAuthorizer<S> {
    async fn has_capability(
        &self,
        actor: &User,
        capability: Capability,
    ) -> Result<bool, ModerationError> {
        Ok(self
            .current(actor)
            .await?
            .is_some_and(|user| role_grants(user.role, capability)))
    }

    async fn can_reply_in(&self, actor: &User, forum: &Forum) -> Result<bool, ModerationError> {
        let allowed = self.current(actor).await?.is_some();
        if !allowed {
            tracing::debug!(user_id = actor.id, forum_id = forum.id, "Reply permission denied");
        }
        Ok(allowed)
    }

    async fn can_access_comments(
        &self,
        actor: &User,
        area: CommentArea,
        item_id: u64,
    ) -> Result<bool, ModerationError> {
        let allowed = self.current(actor).await?.is_some();
        if !allowed {
            tracing::debug!(user_id = actor.id, ?area, item_id, "Comment access denied");
        }
        Ok(allowed)
    }
}
