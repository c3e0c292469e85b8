use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::BackendResult;
use crate::backend::models::{
    AchievementRecord, AuthUser, BadgeRecord, FriendshipRecord, NewAchievement, NewBadge, NewVote, Profile,
    VoteRecord,
};
use crate::energy::EnergyState;

#[async_trait]
pub trait AchievementStore: Send + Sync {
    async fn get_by_user(&self, user_id: &str) -> BackendResult<Vec<AchievementRecord>>;

    async fn award(&self, record: &NewAchievement) -> BackendResult<AchievementRecord>;

    async fn update_progress(&self, id: &str, progress: i64) -> BackendResult<AchievementRecord>;
}

#[async_trait]
pub trait VoteStore: Send + Sync {
    async fn get_by_user(&self, user_id: &str) -> BackendResult<Vec<VoteRecord>>;

    async fn insert(&self, vote: &NewVote) -> BackendResult<VoteRecord>;
}

#[async_trait]
pub trait FriendshipStore: Send + Sync {
    /// Accepted friendships in either direction
    async fn get_friends(&self, user_id: &str) -> BackendResult<Vec<FriendshipRecord>>;
}

#[async_trait]
pub trait BadgeStore: Send + Sync {
    async fn award(&self, badge: &NewBadge) -> BackendResult<BadgeRecord>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> BackendResult<Profile>;

    async fn update_energy(&self, user_id: &str, state: EnergyState) -> BackendResult<Profile>;
}

/// Every store the achievement evaluator reads or writes
pub trait GameStore: AchievementStore + VoteStore + FriendshipStore + BadgeStore {}

impl<T> GameStore for T where T: AchievementStore + VoteStore + FriendshipStore + BadgeStore {}

/// Everything the HTTP layer needs: the game stores plus profile energy
pub trait AppStore: GameStore + ProfileStore {}

impl<T> AppStore for T where T: GameStore + ProfileStore {}

/// Entry point for request handling: resolves callers and hands out stores that act on their
/// behalf. Used directly, it acts with the service's anon key.
#[async_trait]
pub trait AuthStore: AppStore {
    /// The user behind an access token; a rejected token is a [`BackendErr::Rejected`] 401
    ///
    /// [`BackendErr::Rejected`]: crate::backend::BackendErr::Rejected
    async fn authenticate(&self, token: &str) -> BackendResult<AuthUser>;

    /// A store sending `token` as its bearer, so row-level security applies to the caller
    fn scoped(self: Arc<Self>, token: &str) -> BackendResult<Arc<dyn AppStore>>;
}
