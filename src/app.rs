use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use crossterm::event::{KeyCode, KeyEvent};
use rand::rngs::StdRng;
use tracing::{error, info};

use crate::clock::{CycleClock, CycleStore};
use crate::ledger::{AppState, load_app_state, update_app_state};
use crate::lease::WriterLease;
use crate::payout::{PayoutRng, RandSource};
use crate::phase::MiningPhase;
use crate::scheduler::{CatchUpScheduler, elapsed_seconds, observe};
use crate::store::DurableStore;

const MAX_MESSAGES: usize = 5;
/// A writer tick that finds this much wall clock since the last checkpoint
/// reconciles instead of counting a single second.
const STALL_SECONDS: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneFocus {
    History,
    Notifications,
}

impl PaneFocus {
    fn next(self) -> Self {
        match self {
            PaneFocus::History => PaneFocus::Notifications,
            PaneFocus::Notifications => PaneFocus::History,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Writer,
    Observer,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::Writer => "writer",
            Role::Observer => "observer",
        }
    }
}

/// One client process. Every mutation happens on the event-loop thread that
/// calls these handlers, so a reconcile always finishes before the next tick.
pub struct App<R = RandSource<StdRng>> {
    pub focus: PaneFocus,
    pub should_quit: bool,
    pub role: Role,
    pub foreground: bool,
    pub clock: CycleClock,
    pub state: AppState,
    pub messages: VecDeque<String>,
    pub history_scroll: usize,
    pub notification_scroll: usize,
    store: Box<dyn DurableStore>,
    lease: Box<dyn WriterLease>,
    scheduler: CatchUpScheduler<R>,
}

impl<R: PayoutRng> App<R> {
    pub fn new(
        store: Box<dyn DurableStore>,
        lease: Box<dyn WriterLease>,
        scheduler: CatchUpScheduler<R>,
        now: DateTime<Utc>,
    ) -> Self {
        let clock = observe(store.as_ref(), now);
        Self {
            focus: PaneFocus::History,
            should_quit: false,
            role: Role::Observer,
            foreground: true,
            clock,
            state: AppState::default(),
            messages: VecDeque::new(),
            history_scroll: 0,
            notification_scroll: 0,
            store,
            lease,
            scheduler,
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        if let Err(e) = update_app_state(self.store.as_ref(), |s| s.ensure_welcome(now)) {
            error!(error = %e, "failed to seed welcome notification");
        }
        self.claim_or_observe(now);
        self.refresh_state();
    }

    pub fn phase(&self) -> MiningPhase {
        MiningPhase::from_remaining(self.clock.remaining())
    }

    pub fn on_tick(&mut self, now: DateTime<Utc>) {
        if !self.foreground {
            return;
        }
        match self.role {
            Role::Writer => {
                if !self.checkpoint_is_ours() {
                    info!("checkpoint changed under the writer, reconciling");
                    self.reconcile(now);
                } else if elapsed_seconds(self.clock.last_observed_at(), now) >= STALL_SECONDS {
                    self.reconcile(now);
                } else {
                    match self
                        .scheduler
                        .tick(self.store.as_ref(), &mut self.clock, now)
                    {
                        Ok(0) => {}
                        Ok(_) => self.push_message("Cycle complete, yield credited"),
                        Err(e) => error!(error = %e, "failed to persist tick"),
                    }
                }
            }
            Role::Observer => self.claim_or_observe(now),
        }
        self.refresh_state();
    }

    /// A backgrounded session stops ticking and hands the clock to whichever
    /// foreground session claims it next.
    pub fn on_focus_lost(&mut self) {
        self.foreground = false;
        if self.role == Role::Writer {
            self.lease.release();
            self.role = Role::Observer;
        }
        info!("moved to background, ticking paused");
    }

    pub fn on_focus_gained(&mut self, now: DateTime<Utc>) {
        self.foreground = true;
        self.claim_or_observe(now);
        self.refresh_state();
    }

    /// Another process (or a CLI command) touched the checkpoint file.
    pub fn on_store_changed(&mut self, now: DateTime<Utc>) {
        match self.role {
            Role::Writer => {
                if !self.checkpoint_is_ours() {
                    info!("checkpoint rewritten externally, reconciling");
                    self.reconcile(now);
                }
            }
            Role::Observer => self.clock = observe(self.store.as_ref(), now),
        }
        self.refresh_state();
    }

    pub fn on_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q' | 'Q') => self.should_quit = true,
            KeyCode::Tab | KeyCode::BackTab => self.focus = self.focus.next(),
            KeyCode::Up => self.scroll_up(),
            KeyCode::Down => self.scroll_down(),
            KeyCode::Char('r') => {
                self.edit_state(|s| s.mark_all_notifications_read());
            }
            KeyCode::Char('c') => {
                self.edit_state(|s| s.clear_notifications());
                self.notification_scroll = 0;
                self.push_message("Notifications cleared");
            }
            _ => {}
        }
    }

    pub fn shutdown(&mut self) {
        if self.lease.is_held() {
            info!("releasing the clock");
            self.lease.release();
        }
    }

    /// True when the stored checkpoint is the one this writer last persisted.
    fn checkpoint_is_ours(&self) -> bool {
        matches!(
            self.store.load_checkpoint(),
            Ok(meta) if meta == self.clock.meta()
        )
    }

    fn claim_or_observe(&mut self, now: DateTime<Utc>) {
        if self.lease.try_acquire() {
            if self.role == Role::Observer {
                self.role = Role::Writer;
                self.push_message("Holding the clock: this session pays out");
            }
            self.reconcile(now);
        } else {
            self.role = Role::Observer;
            self.clock = observe(self.store.as_ref(), now);
        }
    }

    fn reconcile(&mut self, now: DateTime<Utc>) {
        match self.scheduler.reconcile(self.store.as_ref(), now) {
            Ok(rec) => {
                self.clock = rec.clock;
                if rec.cold_start {
                    self.push_message("Fresh cycle started");
                } else if rec.cycles_paid > 0 {
                    self.push_message(format!(
                        "Caught up {} cycle(s): +${:.4}",
                        rec.cycles_paid, rec.profit
                    ));
                } else if rec.catch_up.cycles_to_run > 0 {
                    self.push_message(format!(
                        "Skipped {} cycle(s) with no active plan",
                        rec.catch_up.cycles_to_run
                    ));
                }
            }
            Err(e) => error!(error = %e, "reconciliation failed"),
        }
    }

    fn refresh_state(&mut self) {
        match load_app_state(self.store.as_ref()) {
            Ok(state) => {
                self.state = state;
                self.history_scroll = self
                    .history_scroll
                    .min(self.state.mining_history.len().saturating_sub(1));
                self.notification_scroll = self
                    .notification_scroll
                    .min(self.state.notifications.len().saturating_sub(1));
            }
            Err(e) => error!(error = %e, "failed to load app state"),
        }
    }

    fn edit_state(&mut self, apply: impl FnOnce(&mut AppState)) {
        match update_app_state(self.store.as_ref(), apply) {
            Ok((state, ())) => self.state = state,
            Err(e) => error!(error = %e, "failed to update app state"),
        }
    }

    fn push_message(&mut self, msg: impl Into<String>) {
        self.messages.push_front(msg.into());
        while self.messages.len() > MAX_MESSAGES {
            self.messages.pop_back();
        }
    }

    fn scroll_up(&mut self) {
        let scroll = match self.focus {
            PaneFocus::History => &mut self.history_scroll,
            PaneFocus::Notifications => &mut self.notification_scroll,
        };
        *scroll = scroll.saturating_sub(1);
    }

    fn scroll_down(&mut self) {
        let (scroll, len) = match self.focus {
            PaneFocus::History => (&mut self.history_scroll, self.state.mining_history.len()),
            PaneFocus::Notifications => {
                (&mut self.notification_scroll, self.state.notifications.len())
            }
        };
        if *scroll + 1 < len {
            *scroll += 1;
        }
    }
}

pub fn format_money(amount: f64) -> String {
    format!("${:.4}", amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{CYCLE_SECONDS, CycleMeta};
    use crate::ledger::{Plan, PlanKind, save_app_state};
    use crate::lease::FileLease;
    use crate::payout::PayoutEngine;
    use crate::payout::scripted::ScriptedRng;
    use crate::store::{APP_STATE_KEY, CYCLE_META_KEY, MemoryStore};
    use chrono::TimeZone;
    use crossterm::event::KeyModifiers;
    use std::path::Path;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn seeded_store(remaining: u32) -> MemoryStore {
        let store = MemoryStore::default();
        store
            .save_checkpoint(&CycleMeta {
                remaining_seconds: remaining,
                last_observed_at: at(0),
            })
            .unwrap();
        let mut state = AppState::default();
        state.plans.push(Plan {
            id: "p1".to_string(),
            kind: PlanKind::Standard,
            principal: 960.0,
            active: true,
            started_at: at(0),
        });
        save_app_state(&store, &state).unwrap();
        store
    }

    fn client(store: &MemoryStore, lease_dir: &Path, now: DateTime<Utc>) -> App<ScriptedRng> {
        let mut app = App::new(
            Box::new(store.clone()),
            Box::new(FileLease::new(lease_dir)),
            CatchUpScheduler::new(PayoutEngine::new(ScriptedRng::default())),
            now,
        );
        app.start(now);
        app
    }

    fn history_len(store: &MemoryStore) -> usize {
        load_app_state(store).unwrap().mining_history.len()
    }

    #[test]
    fn two_processes_never_double_credit() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(CYCLE_SECONDS);

        let mut first = client(&store, dir.path(), at(1000));
        let mut second = client(&store, dir.path(), at(1000));
        assert_eq!(first.role, Role::Writer);
        assert_eq!(second.role, Role::Observer);
        assert_eq!(history_len(&store), 1);

        second.on_store_changed(at(1000));
        second.on_focus_gained(at(1000));
        second.on_tick(at(1001));
        assert_eq!(history_len(&store), 1);
        assert_eq!(second.clock.remaining(), 799);

        drop(first);
        second.on_tick(at(1900));
        assert_eq!(second.role, Role::Writer);
        assert_eq!(history_len(&store), 2);
        assert_eq!(second.clock.remaining(), 800);
    }

    #[test]
    fn startup_seeds_a_single_welcome() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        let mut app = client(&store, dir.path(), at(0));
        app.start(at(0));
        assert_eq!(app.state.notifications.len(), 1);
        assert_eq!(app.role, Role::Writer);
        assert_eq!(app.clock.remaining(), CYCLE_SECONDS);
    }

    #[test]
    fn background_pauses_ticks_and_foreground_catches_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(10);
        let mut app = client(&store, dir.path(), at(0));

        app.on_tick(at(1));
        assert_eq!(app.clock.remaining(), 9);

        app.on_focus_lost();
        assert_eq!(app.role, Role::Observer);
        app.on_tick(at(2));
        assert_eq!(app.clock.remaining(), 9);
        assert_eq!(store.load_checkpoint().unwrap().last_observed_at, at(1));

        app.on_focus_gained(at(1500));
        // 9 seconds to the first cycle, one full cycle, then 590s into the next
        assert_eq!(history_len(&store), 2);
        assert_eq!(app.clock.remaining(), 310);
        assert!(app.foreground);
    }

    #[test]
    fn backgrounded_writer_hands_the_clock_to_the_foreground_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(CYCLE_SECONDS);
        let mut hidden = client(&store, dir.path(), at(0));
        let mut visible = client(&store, dir.path(), at(0));
        assert_eq!(hidden.role, Role::Writer);
        assert_eq!(visible.role, Role::Observer);

        hidden.on_focus_lost();
        for t in 1..=1800 {
            hidden.on_tick(at(t));
            visible.on_tick(at(t));
        }

        assert_eq!(hidden.role, Role::Observer);
        assert_eq!(visible.role, Role::Writer);
        assert_eq!(history_len(&store), 2);
        assert_eq!(visible.clock.remaining(), CYCLE_SECONDS);

        hidden.on_focus_gained(at(1801));
        assert_eq!(hidden.role, Role::Observer);
        assert_eq!(hidden.clock.remaining(), CYCLE_SECONDS - 1);
        assert_eq!(history_len(&store), 2);
    }

    #[test]
    fn reset_between_ticks_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(300);
        let mut app = client(&store, dir.path(), at(0));
        app.on_tick(at(1));

        store.remove(CYCLE_META_KEY).unwrap();
        store.remove(APP_STATE_KEY).unwrap();
        app.on_tick(at(2));
        app.on_store_changed(at(2));

        assert_eq!(store.load_checkpoint().unwrap(), CycleMeta::fresh(at(2)));
        assert_eq!(app.clock.remaining(), CYCLE_SECONDS);
        assert_eq!(history_len(&store), 0);
    }

    #[test]
    fn stalled_loop_reconciles_instead_of_ticking() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(CYCLE_SECONDS);
        let mut app = client(&store, dir.path(), at(0));

        app.on_tick(at(1800));
        assert_eq!(history_len(&store), 2);
        assert_eq!(app.clock.remaining(), CYCLE_SECONDS);
    }

    #[test]
    fn writer_ignores_its_own_write_but_follows_a_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(300);
        let mut app = client(&store, dir.path(), at(0));
        app.on_tick(at(1));

        app.on_store_changed(at(1));
        assert_eq!(app.clock.remaining(), 299);

        store.remove(CYCLE_META_KEY).unwrap();
        app.on_store_changed(at(1));
        assert_eq!(app.clock.remaining(), CYCLE_SECONDS);
        assert_eq!(store.load_checkpoint().unwrap(), CycleMeta::fresh(at(1)));
        assert_eq!(history_len(&store), 0);
    }

    #[test]
    fn keys_edit_notifications_and_quit() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        let mut app = client(&store, dir.path(), at(0));
        assert_eq!(app.state.unread_count(), 1);

        app.on_key(KeyEvent::new(KeyCode::Char('r'), KeyModifiers::NONE));
        assert_eq!(load_app_state(&store).unwrap().unread_count(), 0);

        app.on_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE));
        assert!(app.state.notifications.is_empty());

        app.on_key(KeyEvent::new(KeyCode::Tab, KeyModifiers::NONE));
        assert_eq!(app.focus, PaneFocus::Notifications);

        app.on_key(KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE));
        assert!(app.should_quit);
    }
}
