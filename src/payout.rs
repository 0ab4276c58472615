use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::ledger::{
    HistoryLine, LineStatus, MiningHistoryEntry, NotificationCategory, Plan, new_id,
};

/// Cycles per day at 900 seconds each.
pub const CYCLES_PER_DAY: f64 = 96.0;
pub const VARIATION_MIN: f64 = -0.10;
pub const VARIATION_MAX: f64 = 0.15;
pub const TEAM_BONUS_CHANCE: f64 = 0.20;
pub const TEAM_BONUS_RATE: f64 = 0.05;

/// What the engine needs from the application state. The engine only adds
/// to it.
pub trait PayoutLedger {
    fn is_any_plan_active(&self) -> bool;
    fn list_active_plans(&self) -> Vec<Plan>;
    fn credit_wallet(&mut self, amount: f64);
    fn append_history(&mut self, entry: MiningHistoryEntry);
    fn emit_notification(
        &mut self,
        message: String,
        category: NotificationCategory,
        now: DateTime<Utc>,
    );
}

/// Source of the two random decisions in a cycle.
pub trait PayoutRng {
    /// Uniform in `[VARIATION_MIN, VARIATION_MAX)`.
    fn variation(&mut self) -> f64;
    fn team_bonus(&mut self) -> bool;
}

#[derive(Debug)]
pub struct RandSource<R>(R);

impl RandSource<StdRng> {
    pub fn seeded(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => RandSource(StdRng::seed_from_u64(seed)),
            None => RandSource(StdRng::from_entropy()),
        }
    }
}

impl<R: Rng> PayoutRng for RandSource<R> {
    fn variation(&mut self) -> f64 {
        self.0.gen_range(VARIATION_MIN..VARIATION_MAX)
    }

    fn team_bonus(&mut self) -> bool {
        self.0.gen_bool(TEAM_BONUS_CHANCE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub entry_id: String,
    pub profit: f64,
    pub team_bonus: Option<f64>,
    pub plans: usize,
}

#[derive(Debug)]
pub struct PayoutEngine<R> {
    rng: R,
}

impl<R: PayoutRng> PayoutEngine<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    pub fn base_return(plan: &Plan) -> f64 {
        plan.principal * plan.kind.daily_rate() / CYCLES_PER_DAY
    }

    /// One plan's yield for one cycle. Positive whenever the principal is,
    /// since the variation never reaches -1.
    pub fn plan_return(&mut self, plan: &Plan) -> f64 {
        Self::base_return(plan) * (1.0 + self.rng.variation())
    }

    /// Computes and applies one cycle across every active plan. `at` is the
    /// moment the cycle completed, which for replayed cycles lies in the past.
    pub fn execute_cycle<L: PayoutLedger + ?Sized>(
        &mut self,
        ledger: &mut L,
        at: DateTime<Utc>,
    ) -> Option<CycleReport> {
        if !ledger.is_any_plan_active() {
            return None;
        }
        let plans = ledger.list_active_plans();
        let entry_id = new_id(at);

        let mut lines = Vec::with_capacity(plans.len());
        let mut cycle_profit = 0.0;
        for plan in &plans {
            let profit = self.plan_return(plan);
            cycle_profit += profit;
            lines.push(HistoryLine {
                plan_id: plan.id.clone(),
                profit,
                synthetic_hash: synthetic_hash(&entry_id, &plan.id, profit),
                status: LineStatus::Profit,
            });
        }

        if cycle_profit <= 0.0 {
            return None;
        }

        let mut team_bonus = None;
        if self.rng.team_bonus() {
            let bonus = cycle_profit * TEAM_BONUS_RATE;
            cycle_profit += bonus;
            team_bonus = Some(bonus);
            ledger.emit_notification(
                format!("Team bonus: +${:.4} received.", bonus),
                NotificationCategory::TeamBonus,
                at,
            );
        }

        ledger.credit_wallet(cycle_profit);
        ledger.append_history(MiningHistoryEntry {
            id: entry_id.clone(),
            occurred_at: at,
            lines,
        });
        ledger.emit_notification(
            format!("Hash yield: +${:.4} credited.", cycle_profit),
            NotificationCategory::Profit,
            at,
        );
        info!(
            entry = %entry_id,
            plans = plans.len(),
            profit = cycle_profit,
            bonus = team_bonus.unwrap_or(0.0),
            "cycle paid out"
        );

        Some(CycleReport {
            entry_id,
            profit: cycle_profit,
            team_bonus,
            plans: plans.len(),
        })
    }
}

fn synthetic_hash(entry_id: &str, plan_id: &str, profit: f64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(entry_id.as_bytes());
    hasher.update(plan_id.as_bytes());
    hasher.update(&profit.to_le_bytes());
    let digest = hasher.finalize();
    let hex = digest.to_hex();
    format!("HX-{}", hex.as_str()[..10].to_ascii_uppercase())
}

#[cfg(test)]
pub(crate) mod scripted {
    use std::collections::VecDeque;

    use super::PayoutRng;

    /// Replays fixed decisions. An exhausted script yields no variation and
    /// no bonus.
    #[derive(Debug, Default)]
    pub struct ScriptedRng {
        variations: VecDeque<f64>,
        bonuses: VecDeque<bool>,
    }

    impl ScriptedRng {
        pub fn new(variations: &[f64], bonuses: &[bool]) -> Self {
            Self {
                variations: variations.iter().copied().collect(),
                bonuses: bonuses.iter().copied().collect(),
            }
        }
    }

    impl PayoutRng for ScriptedRng {
        fn variation(&mut self) -> f64 {
            self.variations.pop_front().unwrap_or(0.0)
        }

        fn team_bonus(&mut self) -> bool {
            self.bonuses.pop_front().unwrap_or(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::scripted::ScriptedRng;
    use super::*;
    use crate::ledger::{AppState, MINING_HISTORY_CAP, PlanKind};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn plan(id: &str, kind: PlanKind, principal: f64, active: bool) -> Plan {
        Plan {
            id: id.to_string(),
            kind,
            principal,
            active,
            started_at: now(),
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn no_active_plans_is_a_noop() {
        let mut state = AppState::default();
        state.plans.push(plan("p1", PlanKind::Standard, 1000.0, false));
        let mut engine = PayoutEngine::new(ScriptedRng::new(&[], &[true]));

        assert_eq!(engine.execute_cycle(&mut state, now()), None);
        assert_eq!(state.wallet.available, 0.0);
        assert!(state.mining_history.is_empty());
        assert!(state.notifications.is_empty());
    }

    #[test]
    fn exact_payout_without_bonus() {
        let mut state = AppState::default();
        state.plans.push(plan("p1", PlanKind::Standard, 960.0, true));
        state.plans.push(plan("p2", PlanKind::Premium, 1920.0, true));
        state.plans.push(plan("off", PlanKind::Premium, 5000.0, false));
        let mut engine = PayoutEngine::new(ScriptedRng::new(&[0.1, -0.1], &[false]));

        let report = engine.execute_cycle(&mut state, now()).unwrap();

        // 960 * 0.01 / 96 = 0.1 -> 0.11 ; 1920 * 0.013 / 96 = 0.26 -> 0.234
        assert!(close(report.profit, 0.11 + 0.234));
        assert_eq!(report.team_bonus, None);
        assert_eq!(report.plans, 2);
        assert!(close(state.wallet.available, report.profit));
        assert!(close(state.wallet.total_earnings, report.profit));

        let entry = state.mining_history.front().unwrap();
        assert_eq!(entry.lines.len(), 2);
        assert_eq!(entry.lines[0].plan_id, "p1");
        assert!(close(entry.lines[0].profit, 0.11));
        assert!(entry.lines.iter().all(|l| l.status == LineStatus::Profit));
        assert!(entry.lines[0].synthetic_hash.starts_with("HX-"));
        assert_ne!(entry.lines[0].synthetic_hash, entry.lines[1].synthetic_hash);

        assert_eq!(state.notifications.len(), 1);
        assert_eq!(
            state.notifications[0].category,
            NotificationCategory::Profit
        );
        assert_eq!(state.notifications[0].message, "Hash yield: +$0.3440 credited.");
    }

    #[test]
    fn team_bonus_adds_five_percent_and_its_own_notice() {
        let mut state = AppState::default();
        state.plans.push(plan("p1", PlanKind::Standard, 960.0, true));
        let mut engine = PayoutEngine::new(ScriptedRng::new(&[0.0], &[true]));

        let report = engine.execute_cycle(&mut state, now()).unwrap();

        assert!(close(report.team_bonus.unwrap(), 0.005));
        assert!(close(report.profit, 0.105));
        assert!(close(state.wallet.total_earnings, 0.105));
        // history lines keep the per-plan return without the bonus
        assert!(close(state.mining_history[0].total(), 0.1));

        let categories: Vec<_> = state.notifications.iter().map(|n| n.category).collect();
        assert_eq!(
            categories,
            vec![NotificationCategory::Profit, NotificationCategory::TeamBonus]
        );
        assert_eq!(state.notifications[1].message, "Team bonus: +$0.0050 received.");
    }

    #[test]
    fn non_positive_principal_is_never_paid_or_bonused() {
        let mut state = AppState::default();
        state.plans.push(plan("bad", PlanKind::Standard, -500.0, true));
        state.plans.push(plan("zero", PlanKind::Premium, 0.0, true));
        let mut engine = PayoutEngine::new(ScriptedRng::new(&[0.0, 0.0], &[true]));

        assert_eq!(engine.execute_cycle(&mut state, now()), None);
        assert!(state.notifications.is_empty());
        assert!(state.mining_history.is_empty());
        assert_eq!(state.wallet.available, 0.0);

        state.plans.push(plan("p1", PlanKind::Standard, 960.0, true));
        let report = engine.execute_cycle(&mut state, now()).unwrap();
        assert_eq!(report.plans, 1);
        assert!(state.mining_history[0].lines.iter().all(|l| l.profit > 0.0));
    }

    #[test]
    fn return_stays_positive_at_the_lower_bound() {
        let p = plan("p1", PlanKind::Standard, 0.01, true);
        let mut engine = PayoutEngine::new(ScriptedRng::new(&[VARIATION_MIN], &[]));
        assert!(engine.plan_return(&p) > 0.0);
    }

    #[test]
    fn history_cap_holds_over_many_cycles() {
        let mut state = AppState::default();
        state.plans.push(plan("p1", PlanKind::Premium, 100.0, true));
        let mut engine = PayoutEngine::new(RandSource::seeded(Some(7)));

        let mut last_id = String::new();
        for i in 0..(MINING_HISTORY_CAP as i64 + 25) {
            let report = engine
                .execute_cycle(&mut state, now() + chrono::Duration::seconds(900 * i))
                .unwrap();
            last_id = report.entry_id;
        }

        assert_eq!(state.mining_history.len(), MINING_HISTORY_CAP);
        assert_eq!(state.mining_history[0].id, last_id);
        assert!(
            state
                .mining_history
                .iter()
                .zip(state.mining_history.iter().skip(1))
                .all(|(newer, older)| newer.occurred_at > older.occurred_at)
        );
    }

    #[test]
    fn seeded_variation_stays_in_bounds_and_mean_converges() {
        let p = plan("p1", PlanKind::Standard, 1000.0, true);
        let base = PayoutEngine::<ScriptedRng>::base_return(&p);
        assert!(close(base, 1000.0 * 0.01 / 96.0));

        let mut engine = PayoutEngine::new(RandSource::seeded(Some(42)));
        let cycles = 1_000_000;
        let mut sum = 0.0;
        for _ in 0..cycles {
            let r = engine.plan_return(&p);
            assert!(r >= base * (1.0 + VARIATION_MIN) && r <= base * (1.0 + VARIATION_MAX));
            sum += r;
        }
        let mean = sum / cycles as f64;
        let expected = base * 1.025;
        assert!((mean - expected).abs() / expected < 1e-3);
    }
}
