//! Badge awarding.
//!
//! Each vote runs one evaluation pass over the static catalog. User statistics are fetched
//! lazily and at most once per pass, the caller-owned [`SessionState`] guards against awarding
//! the same badge twice, and persistence is best-effort: a failed write is logged and the award
//! still stands for the user.

pub mod catalog;
pub mod evaluator;
pub mod notify;
pub mod session;

pub use catalog::BadgeCatalog;
pub use evaluator::{AchievementEvaluator, UserSnapshot, VoteContext};
pub use notify::{BadgeNotification, ChannelNotifier};
pub use session::SessionRegistry;
