use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{LedgerError, StoreError};
use crate::payout::PayoutLedger;
use crate::store::{APP_STATE_KEY, DurableStore};

pub const MINING_HISTORY_CAP: usize = 50;
pub const NOTIFICATION_CAP: usize = 100;

const ID_ALPHABET: &[char] = &[
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'J',
    'K', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'V', 'W', 'X', 'Y', 'Z',
];

/// Time-prefixed id: lexical order follows creation order.
pub fn new_id(now: DateTime<Utc>) -> String {
    format!("{:013}-{}", now.timestamp_millis(), nanoid!(6, ID_ALPHABET))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
    Standard,
    Premium,
}

impl PlanKind {
    pub fn daily_rate(self) -> f64 {
        match self {
            PlanKind::Standard => 0.01,
            PlanKind::Premium => 0.013,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PlanKind::Standard => "standard",
            PlanKind::Premium => "premium",
        }
    }
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for PlanKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(PlanKind::Standard),
            "premium" => Ok(PlanKind::Premium),
            other => Err(format!("unknown plan kind `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub kind: PlanKind,
    pub principal: f64,
    pub active: bool,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Wallet {
    pub available: f64,
    pub total_earnings: f64,
    pub deposited: f64,
    pub withdrawn: f64,
    pub secondary: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStatus {
    Profit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryLine {
    pub plan_id: String,
    pub profit: f64,
    pub synthetic_hash: String,
    pub status: LineStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiningHistoryEntry {
    pub id: String,
    pub occurred_at: DateTime<Utc>,
    pub lines: Vec<HistoryLine>,
}

impl MiningHistoryEntry {
    pub fn total(&self) -> f64 {
        self.lines.iter().map(|l| l.profit).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationCategory {
    Info,
    Support,
    Plan,
    Profit,
    TeamBonus,
    Success,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub message: String,
    pub category: NotificationCategory,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Everything stored under `app-state`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppState {
    pub plans: Vec<Plan>,
    pub wallet: Wallet,
    pub mining_history: VecDeque<MiningHistoryEntry>,
    pub notifications: VecDeque<Notification>,
    /// Boundary of the newest cycle already settled. Cycles at or before it
    /// are never paid again.
    pub last_paid_cycle_at: Option<DateTime<Utc>>,
}

impl AppState {
    /// Plans that earn each cycle. A hand-edited record with a non-positive
    /// principal never pays.
    pub fn active_plans(&self) -> impl Iterator<Item = &Plan> {
        self.plans.iter().filter(|p| p.active && p.principal > 0.0)
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.read).count()
    }

    pub fn notify(
        &mut self,
        message: impl Into<String>,
        category: NotificationCategory,
        now: DateTime<Utc>,
    ) {
        self.notifications.push_front(Notification {
            id: new_id(now),
            message: message.into(),
            category,
            read: false,
            created_at: now,
        });
        self.notifications.truncate(NOTIFICATION_CAP);
    }

    pub fn ensure_welcome(&mut self, now: DateTime<Utc>) -> bool {
        if !self.notifications.is_empty() {
            return false;
        }
        self.notify(
            "Welcome to hashcycle! Open a plan to start earning every cycle.",
            NotificationCategory::Support,
            now,
        );
        true
    }

    pub fn deposit(&mut self, amount: f64, now: DateTime<Utc>) -> Result<(), LedgerError> {
        validate_amount(amount)?;
        self.wallet.available += amount;
        self.wallet.deposited += amount;
        self.notify(
            format!("Deposit of ${:.2} confirmed.", amount),
            NotificationCategory::Success,
            now,
        );
        Ok(())
    }

    /// Debits `amount` from the available balance into a new active plan.
    pub fn open_plan(
        &mut self,
        kind: PlanKind,
        amount: f64,
        now: DateTime<Utc>,
    ) -> Result<&Plan, LedgerError> {
        validate_amount(amount)?;
        if self.wallet.available < amount {
            self.notify(
                "Insufficient balance to open this plan.",
                NotificationCategory::Danger,
                now,
            );
            return Err(LedgerError::InsufficientFunds {
                needed: amount,
                available: self.wallet.available,
            });
        }

        self.wallet.available -= amount;
        self.plans.push(Plan {
            id: new_id(now),
            kind,
            principal: amount,
            active: true,
            started_at: now,
        });
        self.notify(
            format!("{} plan activated: -${:.2}", kind.label().to_uppercase(), amount),
            NotificationCategory::Plan,
            now,
        );
        Ok(&self.plans[self.plans.len() - 1])
    }

    pub fn mark_all_notifications_read(&mut self) {
        for notification in self.notifications.iter_mut() {
            notification.read = true;
        }
    }

    pub fn clear_notifications(&mut self) {
        self.notifications.clear();
    }
}

fn validate_amount(amount: f64) -> Result<(), LedgerError> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(LedgerError::InvalidAmount(amount))
    }
}

impl PayoutLedger for AppState {
    fn is_any_plan_active(&self) -> bool {
        self.active_plans().next().is_some()
    }

    fn list_active_plans(&self) -> Vec<Plan> {
        self.active_plans().cloned().collect()
    }

    fn credit_wallet(&mut self, amount: f64) {
        self.wallet.available += amount;
        self.wallet.total_earnings += amount;
    }

    fn append_history(&mut self, entry: MiningHistoryEntry) {
        self.mining_history.push_front(entry);
        self.mining_history.truncate(MINING_HISTORY_CAP);
    }

    fn emit_notification(
        &mut self,
        message: String,
        category: NotificationCategory,
        now: DateTime<Utc>,
    ) {
        self.notify(message, category, now);
    }
}

/// Reads `app-state`. A record that fails to parse is replaced by the
/// initial state.
pub fn load_app_state<S: DurableStore + ?Sized>(store: &S) -> Result<AppState, StoreError> {
    let Some(raw) = store.load(APP_STATE_KEY)? else {
        return Ok(AppState::default());
    };
    match serde_json::from_str(&raw) {
        Ok(state) => Ok(state),
        Err(err) => {
            warn!(error = %err, "app state unreadable, starting from initial state");
            Ok(AppState::default())
        }
    }
}

pub fn save_app_state<S: DurableStore + ?Sized>(
    store: &S,
    state: &AppState,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(state).map_err(|source| StoreError::Encode {
        key: APP_STATE_KEY.to_string(),
        source,
    })?;
    store.save(APP_STATE_KEY, &raw)
}

/// Read-modify-write of `app-state` while holding its key lock, so a CLI
/// command and the clock writer never overwrite each other.
pub fn update_app_state<S, T>(
    store: &S,
    apply: impl FnOnce(&mut AppState) -> T,
) -> Result<(AppState, T), StoreError>
where
    S: DurableStore + ?Sized,
{
    let _lock = store.lock(APP_STATE_KEY)?;
    let mut state = load_app_state(store)?;
    let out = apply(&mut state);
    save_app_state(store, &state)?;
    Ok((state, out))
}
