// Infrastructure for moderation: SQLite storage, the Akismet checker,
// role-based authorization and moderator notification sinks.

pub mod akismet_client;
pub mod notifiers;
pub mod role_authorizer;
pub mod sqlite_moderation_store;

#[cfg(test)]
pub(crate) mod sqlite_fixtures;

pub use akismet_client::{AkismetClient, AkismetEndpoints};
pub use notifiers::{LogNotifier, WebhookNotifier};
pub use role_authorizer::RoleAuthorizer;
pub use sqlite_moderation_store::{SqliteModerationStore, SqliteRedaction};
