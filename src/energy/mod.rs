//! Energy regeneration.
//!
//! A user's energy is stored as a point count plus the timestamp at which that count was last
//! authoritative. Nothing ticks on the server: the current value is always rebuilt from those two
//! fields and the wall clock, regenerating linearly at a fixed rate and capped at a maximum.
//! Fractional progress toward the next point is never stored, only recomputed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{DEFAULT_ENERGY_MAX, DEFAULT_ENERGY_REGEN_PER_HOUR, MS_PER_HOUR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergyModel {
    pub max: u32,
    pub regen_per_hour: u32,
}

/// Stored energy snapshot. Either field may be missing for users who have never spent energy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyState {
    pub current: Option<i64>,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnergyReading {
    pub current: u32,
    pub max: u32,
    pub ms_until_next: u64,
}

impl Default for EnergyModel {
    fn default() -> Self {
        Self::new(DEFAULT_ENERGY_MAX, DEFAULT_ENERGY_REGEN_PER_HOUR)
    }
}

impl EnergyModel {
    pub const fn new(max: u32, regen_per_hour: u32) -> Self {
        Self { max, regen_per_hour }
    }

    #[inline]
    pub fn ms_per_point(&self) -> i64 {
        MS_PER_HOUR / i64::from(self.regen_per_hour.max(1))
    }

    /// Energy available at `now`, always within `[0, max]`
    pub fn compute_energy(
        &self,
        current: Option<i64>,
        last_update: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> u32 {
        let (Some(current), Some(last_update)) = (current, last_update) else {
            return self.max;
        };

        let max = i64::from(self.max);
        if current >= max {
            return self.max;
        }

        let current = current.max(0);
        let elapsed_ms = (now - last_update).num_milliseconds();
        if elapsed_ms <= 0 {
            return current as u32;
        }

        let accumulated = elapsed_ms / self.ms_per_point();
        current.saturating_add(accumulated).min(max) as u32
    }

    /// Milliseconds until the next point regenerates, or 0 when already full
    pub fn time_until_next_point(
        &self,
        current: Option<i64>,
        last_update: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> u64 {
        if self.compute_energy(current, last_update, now) >= self.max {
            return 0;
        }

        // compute_energy only reports < max when both fields are present
        let Some(last_update) = last_update else {
            return 0;
        };

        let ms_per_point = self.ms_per_point();
        let elapsed_ms = (now - last_update).num_milliseconds().max(0);
        let into_current_point = elapsed_ms % ms_per_point;

        (ms_per_point - into_current_point).max(0) as u64
    }

    pub fn read(&self, state: &EnergyState, now: DateTime<Utc>) -> EnergyReading {
        EnergyReading {
            current: self.compute_energy(state.current, state.last_update, now),
            max: self.max,
            ms_until_next: self.time_until_next_point(state.current, state.last_update, now),
        }
    }

    pub fn read_now(&self, state: &EnergyState) -> EnergyReading {
        self.read(state, Utc::now())
    }

    /// Spends a single point, returning the state to store.
    ///
    /// When the pool is below max at `now`, the new timestamp is the old one advanced by the whole
    /// points already regenerated, which keeps partial progress toward the next point. A pool that
    /// has regenerated to max starts its clock over at `now`.
    pub fn spend(&self, state: &EnergyState, now: DateTime<Utc>) -> EnergyResult<EnergyState> {
        let available = self.compute_energy(state.current, state.last_update, now);
        if available == 0 {
            return Err(EnergyError::Exhausted {
                retry_in_ms: self.time_until_next_point(state.current, state.last_update, now),
            });
        }

        let last_update = match state.last_update {
            Some(last_update) if available < self.max => {
                let elapsed_ms = (now - last_update).num_milliseconds();
                if elapsed_ms <= 0 {
                    last_update
                } else {
                    let regenerated = elapsed_ms / self.ms_per_point();
                    last_update + Duration::milliseconds(regenerated * self.ms_per_point())
                }
            }
            _ => now,
        };

        Ok(EnergyState {
            current: Some(i64::from(available) - 1),
            last_update: Some(last_update),
        })
    }
}

pub type EnergyResult<T> = core::result::Result<T, EnergyError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnergyError {
    #[error("out of energy, next point in {retry_in_ms}ms")]
    Exhausted { retry_in_ms: u64 },
}
