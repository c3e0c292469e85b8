use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::instrument;
use uuid::Uuid;

use crate::constants::{DEFAULT_SESSION_IDLE_SECS, MAJORITY_ABOVE_PCT, MINORITY_BELOW_PCT};

/// Counters for a single play session, owned by whoever drives the session and passed into the
/// evaluator on every vote. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub session_votes: u32,
    pub majority_count: u32,
    pub minority_count: u32,
    /// Badges awarded during this state's lifetime; survives [`SessionState::reset`]
    pub awarded: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Majority,
    Minority,
    /// 45-55%, too close to call
    Neither,
}

impl Alignment {
    pub fn from_pct(user_pct: f64) -> Self {
        if user_pct > MAJORITY_ABOVE_PCT {
            Alignment::Majority
        } else if user_pct < MINORITY_BELOW_PCT {
            Alignment::Minority
        } else {
            Alignment::Neither
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_vote(&mut self, alignment: Option<Alignment>) {
        self.session_votes += 1;
        match alignment {
            Some(Alignment::Majority) => self.majority_count += 1,
            Some(Alignment::Minority) => self.minority_count += 1,
            Some(Alignment::Neither) | None => (),
        }
    }

    /// Zeroes the counters for a fresh play session. Awarded badges are kept, so a badge earned
    /// earlier in the process lifetime is not handed out again.
    pub fn reset(&mut self) {
        self.session_votes = 0;
        self.majority_count = 0;
        self.minority_count = 0;
    }
}

pub type SharedSession = Arc<Mutex<SessionState>>;

#[derive(Debug)]
struct SessionEntry {
    state: SharedSession,
    last_used: Instant,
}

/// Live play sessions keyed by id. Sessions nobody has touched for `idle_timeout` are dropped
/// by [`SessionRegistry::sweep_idle`].
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    idle_timeout: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_SESSION_IDLE_SECS))
    }
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    #[instrument(skip(self))]
    pub async fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            id,
            SessionEntry {
                state: Arc::new(Mutex::new(SessionState::new())),
                last_used: Instant::now(),
            },
        );

        tracing::debug!(session_id = %id, active = sessions.len(), "session created");
        id
    }

    /// Looks a session up and marks it as used
    pub async fn get(&self, id: &Uuid) -> Option<SharedSession> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(id)?;
        entry.last_used = Instant::now();

        Some(entry.state.clone())
    }

    #[instrument(skip(self))]
    pub async fn reset(&self, id: &Uuid) -> bool {
        match self.get(id).await {
            Some(session) => {
                session.lock().await.reset();
                true
            }
            None => false,
        }
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, id: &Uuid) -> Option<SharedSession> {
        self.sessions.write().await.remove(id).map(|entry| entry.state)
    }

    /// Drops every session idle for longer than the timeout, returning how many went
    pub async fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();

        sessions.retain(|_, entry| now.duration_since(entry.last_used) <= self.idle_timeout);
        before - sessions.len()
    }
}

/// Periodically sweeps idle sessions. Exits once the registry itself has been dropped.
pub fn spawn_session_sweeper(registry: Weak<SessionRegistry>, every: Duration) -> JoinHandle<()> {
    tokio::task::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(registry) = registry.upgrade() else {
                tracing::debug!("session registry dropped, stopping sweeper");
                break;
            };

            let expired = registry.sweep_idle().await;
            if expired > 0 {
                tracing::info!(expired, "expired idle sessions");
            }
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_alignment_bands() {
        assert_eq!(Alignment::from_pct(55.1), Alignment::Majority);
        assert_eq!(Alignment::from_pct(55.0), Alignment::Neither);
        assert_eq!(Alignment::from_pct(45.0), Alignment::Neither);
        assert_eq!(Alignment::from_pct(44.9), Alignment::Minority);
    }

    #[test]
    fn test_reset_keeps_awarded() {
        let mut state = SessionState::new();
        state.record_vote(Some(Alignment::Majority));
        state.record_vote(Some(Alignment::Minority));
        state.record_vote(None);
        state.awarded.insert(String::from("marathon"));

        assert_eq!(state.session_votes, 3);
        assert_eq!((state.majority_count, state.minority_count), (1, 1));

        state.reset();
        assert_eq!(state.session_votes, 0);
        assert_eq!((state.majority_count, state.minority_count), (0, 0));
        assert!(state.awarded.contains("marathon"));
    }

    #[tokio::test]
    async fn test_registry_lifecycle() {
        let registry = SessionRegistry::default();
        let id = registry.create().await;

        let session = registry.get(&id).await.unwrap();
        session.lock().await.record_vote(None);

        assert!(registry.reset(&id).await);
        assert_eq!(session.lock().await.session_votes, 0);

        assert!(!registry.reset(&Uuid::new_v4()).await);
        assert!(registry.remove(&id).await.is_some());
        assert!(registry.get(&id).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sessions_expire() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let idle = registry.create().await;
        let active = registry.create().await;

        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(registry.get(&active).await.is_some());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(registry.sweep_idle().await, 1);
        assert!(registry.get(&idle).await.is_none());
        assert!(registry.get(&active).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_with_registry() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        let id = registry.create().await;
        let sweeper = spawn_session_sweeper(Arc::downgrade(&registry), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(75)).await;
        assert!(registry.get(&id).await.is_none());

        drop(registry);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(sweeper.await.is_ok());
    }
}
