//! Log file monitoring
//!
//! Each followed file gets a [`LogRouter`] that offers new lines to its rules,
//! and each rule gets a [`LogWindowDetector`] applying the threshold over a
//! sliding time window.

pub mod follow;
pub mod router;
pub mod rule;
pub mod window;

pub use follow::{FileFollower, FollowError};
pub use router::LogRouter;
pub use rule::{LogEventRule, RuleError};
pub use window::{LogRecord, LogWindowDetector, RuleWindowState};
