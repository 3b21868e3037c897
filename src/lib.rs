// Forum spam guard - spam reporting, pre-publish spam checks and spammer
// redaction for a forum/LMS site.
//
// - `core/` = Business logic and the ports it needs
// - `infra/` = SQLite, HTTP and logging implementations of those ports

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
pub mod core;
#[path = "infra/infra_layer.rs"]
pub mod infra;
