use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, trace};

use crate::clock::{CYCLE_SECONDS, CycleClock, CycleStore, Loaded, TickOutcome};
use crate::error::StoreError;
use crate::ledger::update_app_state;
use crate::payout::{PayoutEngine, PayoutLedger, PayoutRng};
use crate::store::DurableStore;

/// Outcome of the clock math for one observation gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUp {
    pub cycles_to_run: u64,
    pub remaining_seconds: u32,
}

/// Whole seconds from `last` to `now`. Clock skew that puts `now` first
/// counts as no time at all.
pub fn elapsed_seconds(last: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - last).num_seconds().max(0) as u64
}

pub fn catch_up(remaining_seconds: u32, delta: u64) -> CatchUp {
    let cycle = CYCLE_SECONDS as u64;
    let remaining = remaining_seconds as u64;
    let (cycles_to_run, remaining) = if delta < remaining {
        (0, remaining - delta)
    } else {
        let after_first = delta - remaining;
        (1 + after_first / cycle, cycle - after_first % cycle)
    };
    CatchUp {
        cycles_to_run,
        remaining_seconds: remaining.clamp(1, cycle) as u32,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciliation {
    pub clock: CycleClock,
    pub catch_up: CatchUp,
    pub cold_start: bool,
    pub cycles_paid: u64,
    pub profit: f64,
}

/// Projects the persisted clock to `now` without writing anything. Used by
/// processes that do not hold the writer lease.
pub fn observe<S: CycleStore + ?Sized>(store: &S, now: DateTime<Utc>) -> CycleClock {
    match store.load_checkpoint() {
        Ok(meta) => {
            let mut clock = CycleClock::from_meta(meta);
            let projected = catch_up(clock.remaining(), elapsed_seconds(meta.last_observed_at, now));
            clock.set_remaining(projected.remaining_seconds);
            clock
        }
        Err(_) => CycleClock::fresh(now),
    }
}

#[derive(Debug)]
pub struct CatchUpScheduler<R> {
    engine: PayoutEngine<R>,
}

impl<R: PayoutRng> CatchUpScheduler<R> {
    pub fn new(engine: PayoutEngine<R>) -> Self {
        Self { engine }
    }

    /// Brings the checkpoint up to `now` and replays every cycle that
    /// completed in between.
    ///
    /// Payouts land before the checkpoint advances. A crash between the two
    /// writes replays the same cycle boundaries from the old checkpoint, and
    /// `run_cycles` skips the ones already settled, so each cycle is paid
    /// exactly once.
    pub fn reconcile<S: DurableStore + ?Sized>(
        &mut self,
        store: &S,
        now: DateTime<Utc>,
    ) -> Result<Reconciliation, StoreError> {
        let mut clock = match CycleClock::load(store, now) {
            Loaded::Restored(clock) => clock,
            Loaded::ColdStart(mut clock) => {
                clock.persist(store, now)?;
                info!(remaining = clock.remaining(), "cold start, fresh cycle");
                return Ok(Reconciliation {
                    clock,
                    catch_up: CatchUp {
                        cycles_to_run: 0,
                        remaining_seconds: clock.remaining(),
                    },
                    cold_start: true,
                    cycles_paid: 0,
                    profit: 0.0,
                });
            }
        };

        let delta = elapsed_seconds(clock.last_observed_at(), now);
        let first_due = clock.last_observed_at() + Duration::seconds(clock.remaining() as i64);
        let step = catch_up(clock.remaining(), delta);
        let (cycles_paid, profit) = if step.cycles_to_run > 0 {
            self.run_cycles(store, step.cycles_to_run, first_due)?
        } else {
            (0, 0.0)
        };
        clock.set_remaining(step.remaining_seconds);
        clock.persist(store, now)?;

        if step.cycles_to_run > 0 {
            info!(
                delta,
                cycles = step.cycles_to_run,
                paid = cycles_paid,
                profit,
                remaining = step.remaining_seconds,
                "caught up missed cycles"
            );
        } else {
            debug!(delta, remaining = step.remaining_seconds, "reconciled clock");
        }

        Ok(Reconciliation {
            clock,
            catch_up: step,
            cold_start: false,
            cycles_paid,
            profit,
        })
    }

    /// One foreground second. Persists the clock and pays out when the
    /// countdown rolls over. Returns the number of cycles paid.
    pub fn tick<S: DurableStore + ?Sized>(
        &mut self,
        store: &S,
        clock: &mut CycleClock,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let paid = match clock.tick() {
            TickOutcome::Counted => 0,
            TickOutcome::CycleDue => self.run_cycles(store, 1, now)?.0,
        };
        clock.persist(store, now)?;
        trace!(remaining = clock.remaining(), "tick");
        Ok(paid)
    }

    /// Executes `count` consecutive cycles, the first completing at
    /// `first_at`, inside one locked update of the application state.
    /// Boundaries at or before `last_paid_cycle_at` were already credited and
    /// are skipped; the marker moves in the same write as the credits.
    pub fn run_cycles<S: DurableStore + ?Sized>(
        &mut self,
        store: &S,
        count: u64,
        first_at: DateTime<Utc>,
    ) -> Result<(u64, f64), StoreError> {
        let engine = &mut self.engine;
        let (_, totals) = update_app_state(store, |state| {
            if !state.is_any_plan_active() {
                return (0, 0.0);
            }
            let mut paid = 0;
            let mut settled = 0;
            let mut bonuses = 0;
            let mut profit = 0.0;
            for k in 0..count {
                let at = first_at + Duration::seconds((k * CYCLE_SECONDS as u64) as i64);
                if state.last_paid_cycle_at.is_some_and(|last| at <= last) {
                    settled += 1;
                    continue;
                }
                state.last_paid_cycle_at = Some(at);
                if let Some(report) = engine.execute_cycle(state, at) {
                    trace!(entry = %report.entry_id, plans = report.plans, "cycle applied");
                    paid += 1;
                    bonuses += usize::from(report.team_bonus.is_some());
                    profit += report.profit;
                }
            }
            if settled > 0 {
                info!(settled, "skipped cycles already credited");
            }
            if count > 1 {
                debug!(count, paid, bonuses, "replayed cycles");
            }
            (paid, profit)
        })?;
        Ok(totals)
    }
}
