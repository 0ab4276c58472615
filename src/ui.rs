use chrono::Local;
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Wrap};

use crate::app::{App, PaneFocus, Role, format_money};
use crate::clock::format_countdown;
use crate::ledger::{MiningHistoryEntry, Notification, NotificationCategory};
use crate::payout::PayoutRng;
use crate::phase::MiningPhase;

pub fn draw<R: PayoutRng>(f: &mut Frame<'_>, app: &App<R>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(7)])
        .split(f.size());

    let main_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(chunks[0]);

    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(8), Constraint::Min(0)])
        .split(main_chunks[0]);

    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(main_chunks[1]);

    draw_cycle(f, left_chunks[0], app);
    draw_wallet(f, left_chunks[1], app);
    draw_history(f, right_chunks[0], app);
    draw_notifications(f, right_chunks[1], app);
    draw_footer(f, chunks[1], app);
}

fn draw_cycle<R: PayoutRng>(f: &mut Frame<'_>, area: Rect, app: &App<R>) {
    let block = pane_block("Mining Cycle", false);
    f.render_widget(block.clone(), area);
    let inner = block.inner(area);
    let segments = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(inner);

    let gauge = Gauge::default()
        .block(Block::default().title("Next payout"))
        .ratio(app.clock.completion_ratio())
        .gauge_style(
            Style::default()
                .fg(Color::Green)
                .bg(Color::Black)
                .add_modifier(Modifier::BOLD),
        )
        .label(format_countdown(app.clock.remaining()));
    f.render_widget(gauge, segments[0]);

    let role_style = match app.role {
        Role::Writer => Style::default().fg(Color::LightGreen),
        Role::Observer => Style::default().fg(Color::Yellow),
    };
    let lines = vec![
        Line::from(vec![
            Span::styled("Status ", Style::default().fg(Color::Gray)),
            Span::styled(app.phase().label(), phase_style(app.phase())),
        ]),
        Line::from(vec![
            Span::styled("Session ", Style::default().fg(Color::Gray)),
            Span::styled(app.role.label(), role_style),
            Span::raw(if app.foreground { "" } else { " (background)" }),
        ]),
    ];
    f.render_widget(Paragraph::new(lines), segments[1]);
}

fn phase_style(phase: MiningPhase) -> Style {
    match phase {
        MiningPhase::Searching => Style::default().fg(Color::LightBlue),
        MiningPhase::Analyzing => Style::default().fg(Color::Yellow),
        MiningPhase::Executing => Style::default()
            .fg(Color::LightGreen)
            .add_modifier(Modifier::BOLD),
    }
}

fn draw_wallet<R: PayoutRng>(f: &mut Frame<'_>, area: Rect, app: &App<R>) {
    let block = pane_block("Wallet & Plans", false);
    f.render_widget(block.clone(), area);
    let inner = block.inner(area);

    let wallet = &app.state.wallet;
    let mut lines = vec![
        Line::from(vec![
            Span::styled("Available ", Style::default().fg(Color::Gray)),
            Span::styled(
                format_money(wallet.available),
                Style::default().fg(Color::LightGreen),
            ),
        ]),
        Line::from(vec![
            Span::styled("Earned    ", Style::default().fg(Color::Gray)),
            Span::styled(
                format_money(wallet.total_earnings),
                Style::default().fg(Color::LightCyan),
            ),
        ]),
        Line::from(vec![
            Span::styled("Deposited ", Style::default().fg(Color::Gray)),
            Span::raw(format!("${:.2}", wallet.deposited)),
        ]),
        Line::from(""),
    ];

    let active: Vec<_> = app.state.active_plans().collect();
    if active.is_empty() {
        lines.push(Line::from(Span::styled(
            "No active plans. Run `hashcycle invest` to open one.",
            Style::default().fg(Color::DarkGray),
        )));
    }
    for plan in active {
        lines.push(Line::from(vec![
            Span::styled(
                format!("{:<9}", plan.kind.label()),
                Style::default().fg(Color::White),
            ),
            Span::styled(
                format!("${:>10.2}", plan.principal),
                Style::default().fg(Color::LightCyan),
            ),
            Span::styled(
                format!("  {:.1}%/day", plan.kind.daily_rate() * 100.0),
                Style::default().fg(Color::Gray),
            ),
        ]));
    }

    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: true });
    f.render_widget(paragraph, inner);
}

fn draw_history<R: PayoutRng>(f: &mut Frame<'_>, area: Rect, app: &App<R>) {
    let block = pane_block("Mining History", app.focus == PaneFocus::History);
    f.render_widget(block.clone(), area);
    let inner = block.inner(area);

    if app.state.mining_history.is_empty() {
        let paragraph = Paragraph::new("No cycles paid yet. Yield lands every 15 minutes.")
            .wrap(Wrap { trim: true });
        f.render_widget(paragraph, inner);
        return;
    }

    let items: Vec<ListItem> = app
        .state
        .mining_history
        .iter()
        .map(build_history_item)
        .collect();
    let list = List::new(items).highlight_style(
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    );
    let mut state = ListState::default();
    state.select(Some(app.history_scroll));
    f.render_stateful_widget(list, inner, &mut state);
}

fn build_history_item(entry: &MiningHistoryEntry) -> ListItem<'static> {
    let timestamp = entry.occurred_at.with_timezone(&Local).format("%m-%d %H:%M");
    let hash = entry
        .lines
        .first()
        .map(|l| l.synthetic_hash.clone())
        .unwrap_or_default();
    let line = Line::from(vec![
        Span::styled(timestamp.to_string(), Style::default().fg(Color::Gray)),
        Span::raw("  "),
        Span::styled(hash, Style::default().fg(Color::LightCyan)),
        Span::raw(format!("  ×{}", entry.lines.len())),
        Span::raw("  "),
        Span::styled(
            format!("+{}", format_money(entry.total())),
            Style::default().fg(Color::LightGreen),
        ),
    ]);
    ListItem::new(vec![line])
}

fn draw_notifications<R: PayoutRng>(f: &mut Frame<'_>, area: Rect, app: &App<R>) {
    let title = format!("Notifications ({} unread)", app.state.unread_count());
    let block = pane_block(&title, app.focus == PaneFocus::Notifications);
    f.render_widget(block.clone(), area);
    let inner = block.inner(area);

    if app.state.notifications.is_empty() {
        f.render_widget(Paragraph::new("Nothing new."), inner);
        return;
    }

    let items: Vec<ListItem> = app
        .state
        .notifications
        .iter()
        .map(build_notification_item)
        .collect();
    let list = List::new(items).highlight_style(Style::default().add_modifier(Modifier::BOLD));
    let mut state = ListState::default();
    state.select(Some(app.notification_scroll));
    f.render_stateful_widget(list, inner, &mut state);
}

fn build_notification_item(notification: &Notification) -> ListItem<'static> {
    let color = match notification.category {
        NotificationCategory::Profit => Color::LightGreen,
        NotificationCategory::TeamBonus => Color::LightMagenta,
        NotificationCategory::Danger => Color::LightRed,
        NotificationCategory::Plan | NotificationCategory::Success => Color::LightCyan,
        NotificationCategory::Info | NotificationCategory::Support => Color::White,
    };
    let mut style = Style::default().fg(color);
    if notification.read {
        style = style.add_modifier(Modifier::DIM);
    }
    let line = Line::from(vec![
        Span::styled(
            notification
                .created_at
                .with_timezone(&Local)
                .format("%H:%M ")
                .to_string(),
            Style::default().fg(Color::Gray),
        ),
        Span::styled(notification.message.clone(), style),
    ]);
    ListItem::new(vec![line])
}

fn draw_footer<R: PayoutRng>(f: &mut Frame<'_>, area: Rect, app: &App<R>) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Ops & Feed")
        .border_style(Style::default().fg(Color::Gray));
    f.render_widget(block.clone(), area);
    let inner = block.inner(area);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(inner);

    let instruction_lines = vec![
        Line::from("Tab switch pane | Q quit"),
        Line::from("↑↓ scroll focused pane"),
        Line::from("R mark notifications read | C clear notifications"),
    ];
    let instruction = Paragraph::new(instruction_lines).wrap(Wrap { trim: true });
    f.render_widget(instruction, columns[0]);

    let mut message_lines: Vec<Line> = Vec::new();
    for msg in app.messages.iter() {
        message_lines.push(Line::from(Span::raw(msg.clone())));
    }
    if message_lines.is_empty() {
        message_lines.push(Line::from(Span::styled(
            "Awaiting signal...",
            Style::default().fg(Color::DarkGray),
        )));
    }
    let feed = Paragraph::new(message_lines).wrap(Wrap { trim: true });
    f.render_widget(feed, columns[1]);
}

fn pane_block<'a>(title: &'a str, focused: bool) -> Block<'a> {
    let border_style = if focused {
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    };
    Block::default()
        .title(Span::styled(title, Style::default().fg(Color::White)))
        .borders(Borders::ALL)
        .border_style(border_style)
}
