use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::energy::EnergyState;

/// Row of the `achievements` table.
///
/// Terminal badges and soft progress counters share the table; progress rows carry a
/// `*_progress` badge id and a non-null `progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementRecord {
    pub id: String,
    pub user_id: String,
    pub badge_id: String,
    pub badge_name: String,
    pub earned_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAchievement {
    pub user_id: String,
    pub badge_id: String,
    pub badge_name: String,
    pub earned_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<i64>,
}

/// Denormalized copy of an earned badge, read by the profile page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBadge {
    pub user_id: String,
    pub badge_name: String,
    pub badge_icon: String,
    pub source: String,
    pub earned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeRecord {
    pub id: String,
    pub user_id: String,
    pub badge_name: String,
    pub badge_icon: String,
    pub source: String,
    pub earned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub dilemma_id: String,
    pub choice: Choice,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVote {
    /// `None` for guests; the backend fills it in as null
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub dilemma_id: String,
    pub choice: Choice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Choice {
    A,
    B,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendshipRecord {
    pub id: String,
    pub user_id: String,
    pub friend_id: String,
    pub status: String,
}

/// Caller resolved from an access token by the backend's auth endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// The slice of the `profiles` row this service reads and writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub energy: Option<i64>,
    #[serde(default)]
    pub energy_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_streak: i64,
}

impl Profile {
    pub fn energy_state(&self) -> EnergyState {
        EnergyState {
            current: self.energy,
            last_update: self.energy_updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct EnergyPatch {
    pub energy: Option<i64>,
    pub energy_updated_at: Option<DateTime<Utc>>,
}

impl From<EnergyState> for EnergyPatch {
    fn from(value: EnergyState) -> Self {
        Self {
            energy: value.current,
            energy_updated_at: value.last_update,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ProgressPatch {
    pub progress: i64,
}
