use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CheckpointError, StoreError};
use crate::store::{CYCLE_META_KEY, DurableStore};

/// Length of one payout cycle.
pub const CYCLE_SECONDS: u32 = 900;

/// The persisted checkpoint shared by every process on a data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleMeta {
    pub remaining_seconds: u32,
    pub last_observed_at: DateTime<Utc>,
}

impl CycleMeta {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            remaining_seconds: CYCLE_SECONDS,
            last_observed_at: now,
        }
    }

    pub fn decode(raw: &str) -> Result<Self, CheckpointError> {
        let meta: CycleMeta = serde_json::from_str(raw)?;
        if !(1..=CYCLE_SECONDS).contains(&meta.remaining_seconds) {
            return Err(CheckpointError::OutOfRange(meta.remaining_seconds));
        }
        Ok(meta)
    }
}

/// Checkpoint access as seen by the clock and the scheduler.
pub trait CycleStore {
    fn load_checkpoint(&self) -> Result<CycleMeta, CheckpointError>;
    fn save_checkpoint(&self, meta: &CycleMeta) -> Result<(), StoreError>;
}

impl<S: DurableStore + ?Sized> CycleStore for S {
    fn load_checkpoint(&self) -> Result<CycleMeta, CheckpointError> {
        match self.load(CYCLE_META_KEY)? {
            Some(raw) => CycleMeta::decode(&raw),
            None => Err(CheckpointError::Missing),
        }
    }

    fn save_checkpoint(&self, meta: &CycleMeta) -> Result<(), StoreError> {
        let raw = serde_json::to_string(meta).map_err(|source| StoreError::Encode {
            key: CYCLE_META_KEY.to_string(),
            source,
        })?;
        self.save(CYCLE_META_KEY, &raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Counted,
    CycleDue,
}

/// Result of reading the checkpoint at startup or reconciliation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loaded {
    Restored(CycleClock),
    ColdStart(CycleClock),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleClock {
    remaining: u32,
    last_observed_at: DateTime<Utc>,
}

impl CycleClock {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self::from_meta(CycleMeta::fresh(now))
    }

    pub fn from_meta(meta: CycleMeta) -> Self {
        Self {
            remaining: meta.remaining_seconds.clamp(1, CYCLE_SECONDS),
            last_observed_at: meta.last_observed_at,
        }
    }

    /// Reads the checkpoint. Anything missing or untrustworthy becomes a
    /// fresh cycle so that a bad record can never be replayed into payouts.
    pub fn load<S: CycleStore + ?Sized>(store: &S, now: DateTime<Utc>) -> Loaded {
        match store.load_checkpoint() {
            Ok(meta) => Loaded::Restored(Self::from_meta(meta)),
            Err(CheckpointError::Missing) => {
                debug!("no checkpoint found, starting a fresh cycle");
                Loaded::ColdStart(Self::fresh(now))
            }
            Err(err) => {
                warn!(error = %err, "discarding unreadable checkpoint");
                Loaded::ColdStart(Self::fresh(now))
            }
        }
    }

    pub fn meta(&self) -> CycleMeta {
        CycleMeta {
            remaining_seconds: self.remaining,
            last_observed_at: self.last_observed_at,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn last_observed_at(&self) -> DateTime<Utc> {
        self.last_observed_at
    }

    pub fn elapsed_in_cycle(&self) -> u32 {
        CYCLE_SECONDS - self.remaining
    }

    pub fn completion_ratio(&self) -> f64 {
        (self.elapsed_in_cycle() as f64 / CYCLE_SECONDS as f64).clamp(0.0, 1.0)
    }

    /// Counts one second down. Reaching zero reports a due cycle and rolls
    /// the countdown over to a full cycle. The caller only ticks while it is
    /// the foregrounded writer.
    pub fn tick(&mut self) -> TickOutcome {
        if self.remaining <= 1 {
            self.remaining = CYCLE_SECONDS;
            TickOutcome::CycleDue
        } else {
            self.remaining -= 1;
            TickOutcome::Counted
        }
    }

    pub(crate) fn set_remaining(&mut self, remaining: u32) {
        self.remaining = remaining.clamp(1, CYCLE_SECONDS);
    }

    pub fn persist<S: CycleStore + ?Sized>(
        &mut self,
        store: &S,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.last_observed_at = now;
        store.save_checkpoint(&self.meta())
    }
}

pub fn format_countdown(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
