use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Local, Timelike, Utc};
use futures::future::join_all;
use tracing::instrument;

use crate::achievements::catalog::{BadgeCatalog, BadgeDefinition, Condition};
use crate::achievements::notify::{BadgeNotification, Notifier};
use crate::achievements::session::{Alignment, SessionState};
use crate::backend::BackendResult;
use crate::backend::models::{AchievementRecord, NewAchievement, NewBadge};
use crate::backend::stores::{AchievementStore, BadgeStore, FriendshipStore, GameStore, VoteStore};
use crate::constants::{
    BADGE_SOURCE_ACHIEVEMENT, BOLD_MOVE_BADGE, BOLD_MOVE_PROGRESS, TRENDSETTER_BADGE,
    TRENDSETTER_PROGRESS,
};

/// Source of the local hour used by `time_range` badges
pub trait Clock: Send + Sync {
    fn local_hour(&self) -> u32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn local_hour(&self) -> u32 {
        Local::now().hour()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSnapshot {
    pub id: String,
    pub streak: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoteContext {
    /// Share of voters (0-100) who picked the same option as this user
    pub user_pct: Option<f64>,
    /// Row id of the vote being evaluated, when it was stored before the pass
    pub vote_id: Option<String>,
}

impl VoteContext {
    fn alignment(&self) -> Option<Alignment> {
        self.user_pct.map(Alignment::from_pct)
    }
}

/// Per-call cache of user statistics; each value is fetched at most once, and only if a badge
/// actually needs it
#[derive(Debug, Default)]
struct LazyStats {
    total_votes: Option<usize>,
    friends_count: Option<usize>,
}

impl LazyStats {
    /// Votes cast before the one being evaluated
    async fn total_votes<S>(
        &mut self,
        store: &S,
        user_id: &str,
        vote_id: Option<&str>,
    ) -> BackendResult<usize>
    where
        S: GameStore + ?Sized,
    {
        if let Some(count) = self.total_votes {
            return Ok(count);
        }

        let count = VoteStore::get_by_user(store, user_id)
            .await?
            .iter()
            .filter(|v| Some(v.id.as_str()) != vote_id)
            .count();
        self.total_votes = Some(count);
        Ok(count)
    }

    async fn friends_count<S>(&mut self, store: &S, user_id: &str) -> BackendResult<usize>
    where
        S: GameStore + ?Sized,
    {
        if let Some(count) = self.friends_count {
            return Ok(count);
        }

        let count = store.get_friends(user_id).await?.len();
        self.friends_count = Some(count);
        Ok(count)
    }
}

/// Stored counter of a soft progress track, 0 when absent
fn stored_progress(records: &[AchievementRecord], progress_id: &str) -> u32 {
    records
        .iter()
        .find(|r| r.badge_id == progress_id)
        .and_then(|r| r.progress)
        .map(|p| p.clamp(0, i64::from(u32::MAX)) as u32)
        .unwrap_or(0)
}

/// Stateless apart from its catalog; the store is supplied per call so reads and writes run with
/// the caller's credentials
#[derive(Clone)]
pub struct AchievementEvaluator {
    catalog: Arc<BadgeCatalog>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl AchievementEvaluator {
    pub fn new(catalog: Arc<BadgeCatalog>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            catalog,
            notifier,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn catalog(&self) -> &BadgeCatalog {
        &self.catalog
    }

    /// Runs one evaluation pass for a vote and returns the ids of badges newly earned by it.
    ///
    /// Never fails: a missing user is a no-op and backend errors while evaluating are logged and
    /// yield an empty list, so the vote itself is never held up by badge bookkeeping.
    #[instrument(skip_all, fields(user_id = user.map(|u| u.id.as_str())))]
    pub async fn check<S>(
        &self,
        store: &S,
        session: &mut SessionState,
        user: Option<&UserSnapshot>,
        ctx: &VoteContext,
    ) -> Vec<String>
    where
        S: GameStore + ?Sized,
    {
        let Some(user) = user else {
            tracing::debug!("no authenticated user, skipping achievement check");
            return Vec::new();
        };

        match self.evaluate(store, session, user, ctx).await {
            Ok(earned) => earned,
            Err(e) => {
                tracing::error!(error = ?e, "achievement evaluation failed");
                Vec::new()
            }
        }
    }

    async fn evaluate<S>(
        &self,
        store: &S,
        session: &mut SessionState,
        user: &UserSnapshot,
        ctx: &VoteContext,
    ) -> BackendResult<Vec<String>>
    where
        S: GameStore + ?Sized,
    {
        let records = AchievementStore::get_by_user(store, &user.id).await?;

        let mut earned: HashSet<String> = records.iter().map(|r| r.badge_id.clone()).collect();
        earned.extend(session.awarded.iter().cloned());

        let alignment = ctx.alignment();
        session.record_vote(alignment);

        let majority_total = stored_progress(&records, TRENDSETTER_PROGRESS) + session.majority_count;
        let minority_total = stored_progress(&records, BOLD_MOVE_PROGRESS) + session.minority_count;
        let hour = self.clock.local_hour();

        let mut stats = LazyStats::default();
        let mut newly_earned: Vec<&BadgeDefinition> = Vec::new();

        for badge in self.catalog.iter() {
            if earned.contains(&badge.id) {
                continue;
            }

            let met = match badge.condition {
                Condition::TotalVotes { threshold } => {
                    let before = stats.total_votes(store, &user.id, ctx.vote_id.as_deref()).await?;
                    before + 1 >= threshold as usize
                }
                Condition::Streak { threshold } => user.streak >= threshold,
                Condition::FriendsCount { threshold } => {
                    stats.friends_count(store, &user.id).await? >= threshold as usize
                }
                Condition::MajorityVotes { threshold } => majority_total >= threshold,
                Condition::MinorityVotes { threshold } => minority_total >= threshold,
                Condition::SessionVotes { threshold } => session.session_votes >= threshold,
                Condition::TimeRange { start, end } => Condition::hour_in_range(start, end, hour),
            };

            if met {
                newly_earned.push(badge);
            }
        }

        // claim before any write goes out so a rapid second vote cannot award these again
        for badge in &newly_earned {
            session.awarded.insert(badge.id.clone());
            earned.insert(badge.id.clone());
        }

        tokio::join!(
            self.persist_awards(store, &user.id, &newly_earned),
            self.update_soft_progress(store, &user.id, &records, &earned, alignment),
        );

        for badge in &newly_earned {
            self.notifier.notify(&BadgeNotification::new(&user.id, badge));
        }

        if !newly_earned.is_empty() {
            tracing::info!(
                count = newly_earned.len(),
                session_votes = session.session_votes,
                "badges earned"
            );
        }

        Ok(newly_earned.into_iter().map(|b| b.id.clone()).collect())
    }

    /// Best-effort dual write for each new badge. Failures are logged only; the award stands
    /// client-side and is not retried.
    async fn persist_awards<S>(&self, store: &S, user_id: &str, badges: &[&BadgeDefinition])
    where
        S: GameStore + ?Sized,
    {
        let earned_at = Utc::now();

        let writes = badges.iter().map(|badge| async move {
            let achievement = NewAchievement {
                user_id: user_id.to_string(),
                badge_id: badge.id.clone(),
                badge_name: badge.name.clone(),
                earned_at,
                progress: None,
            };
            let denormalized = NewBadge {
                user_id: user_id.to_string(),
                badge_name: badge.name.clone(),
                badge_icon: badge.icon.clone(),
                source: BADGE_SOURCE_ACHIEVEMENT.to_string(),
                earned_at,
            };

            let (achievement_res, badge_res) = tokio::join!(
                AchievementStore::award(store, &achievement),
                BadgeStore::award(store, &denormalized),
            );

            if let Err(e) = achievement_res {
                tracing::error!(badge_id = %badge.id, error = ?e, "failed to persist achievement");
            }

            if let Err(e) = badge_res {
                tracing::error!(badge_id = %badge.id, error = ?e, "failed to persist badge");
            }
        });

        join_all(writes).await;
    }

    /// Bumps the soft counter for the track this vote landed in
    async fn update_soft_progress<S>(
        &self,
        store: &S,
        user_id: &str,
        records: &[AchievementRecord],
        earned: &HashSet<String>,
        alignment: Option<Alignment>,
    ) where
        S: GameStore + ?Sized,
    {
        let (progress_id, terminal_id) = match alignment {
            Some(Alignment::Majority) => (TRENDSETTER_PROGRESS, TRENDSETTER_BADGE),
            Some(Alignment::Minority) => (BOLD_MOVE_PROGRESS, BOLD_MOVE_BADGE),
            Some(Alignment::Neither) | None => return,
        };

        let result = match records.iter().find(|r| r.badge_id == progress_id) {
            Some(existing) => {
                let next = existing.progress.unwrap_or(0) + 1;
                store.update_progress(&existing.id, next).await.map(|_| ())
            }
            None if !earned.contains(terminal_id) => {
                let badge_name = self
                    .catalog
                    .get(terminal_id)
                    .map(|b| format!("{} Progress", b.name))
                    .unwrap_or_else(|| progress_id.to_string());

                let record = NewAchievement {
                    user_id: user_id.to_string(),
                    badge_id: progress_id.to_string(),
                    badge_name,
                    earned_at: Utc::now(),
                    progress: Some(1),
                };

                AchievementStore::award(store, &record).await.map(|_| ())
            }
            None => return,
        };

        if let Err(e) = result {
            tracing::warn!(progress_id, error = ?e, "failed to update soft badge progress");
        }
    }
}
