// Core moderation module - spam reporting, the pre-publish gate and spammer redaction.
// Ports live in moderation_store; everything else only talks to those traits.

pub mod moderation_gateway;
pub mod moderation_models;
pub mod moderation_store;
pub mod post_throttle;
pub mod redaction;
pub mod report_subjects;
pub mod spam_checker;
pub mod spam_heuristics;
pub mod vote_ledger;

#[cfg(test)]
pub(crate) mod test_support;

pub use moderation_gateway::*;
pub use moderation_models::*;
pub use moderation_store::*;
pub use post_throttle::*;
pub use redaction::*;
pub use report_subjects::*;
pub use spam_checker::*;
pub use vote_ledger::*;
