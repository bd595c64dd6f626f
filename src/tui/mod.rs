// src/tui/mod.rs
use crate::types::{PositionView, Signal, Tier, UiEvent};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Terminal,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};
use std::{io, time::Duration};
use tokio::sync::mpsc;

const MAX_EVENTS: usize = 50;

pub struct App {
    pub signals: BTreeMap<String, Signal>,
    pub positions: Vec<PositionView>,
    pub daily_pnl: Decimal,
    pub events: VecDeque<String>,
}

impl App {
    pub fn new() -> Self {
        Self {
            signals: BTreeMap::new(),
            positions: Vec::new(),
            daily_pnl: Decimal::ZERO,
            events: VecDeque::new(),
        }
    }

    fn push_event(&mut self, line: String) {
        self.events.push_back(line);
        while self.events.len() > MAX_EVENTS {
            self.events.pop_front();
        }
    }

    pub fn on_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::Signal(s) => {
                self.signals.insert(s.market.clone(), s);
            }
            UiEvent::Entered(t) => self.push_event(format!(
                "BUY  {} {} @ {} ({})",
                t.market, t.quantity, t.entry_price, t.reason
            )),
            UiEvent::Exited(t) => self.push_event(format!(
                "{:?} {} {} @ {} pnl {} ({:+.2}%) [{}]",
                t.kind,
                t.market,
                t.quantity,
                t.exit_price.unwrap_or_default(),
                t.pnl.round_dp(0),
                t.pnl_percent,
                t.reason
            )),
            UiEvent::Denied { market, reason } => {
                self.push_event(format!("skip {}: {}", market, reason))
            }
            UiEvent::Portfolio {
                positions,
                daily_pnl,
            } => {
                self.positions = positions;
                self.daily_pnl = daily_pnl;
            }
            UiEvent::Log(msg) => self.push_event(msg),
        }
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn run(mut rx: mpsc::Receiver<UiEvent>) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new();

    loop {
        terminal.draw(|f| ui(f, &app))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if let KeyCode::Char('q') = key.code {
                    break;
                }
            }
        }

        while let Ok(event) = rx.try_recv() {
            app.on_event(event);
        }
        tokio::task::yield_now().await;
    }

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    Ok(())
}

fn tier_color(tier: Tier) -> Color {
    match tier {
        Tier::StrongBuy => Color::Green,
        Tier::Buy => Color::LightGreen,
        Tier::Hold => Color::Yellow,
        Tier::Avoid => Color::LightRed,
        Tier::StrongAvoid => Color::Red,
    }
}

fn ui(f: &mut ratatui::Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Min(8),
                Constraint::Length(12),
            ]
            .as_ref(),
        )
        .split(f.size());

    let pnl_color = if app.daily_pnl < Decimal::ZERO {
        Color::Red
    } else {
        Color::Green
    };
    let header = Paragraph::new(Line::from(vec![
        Span::styled("coin_pilot", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(format!(" | open: {} | today: ", app.positions.len())),
        Span::styled(
            format!("{}", app.daily_pnl.round_dp(0)),
            Style::default().fg(pnl_color).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | q to quit"),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(header, chunks[0]);

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)].as_ref())
        .split(chunks[1]);

    let mut ranked: Vec<&Signal> = app.signals.values().collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    let signals: Vec<ListItem> = ranked
        .iter()
        .map(|s| {
            ListItem::new(Line::from(Span::styled(
                format!("{:<12} {:>3.0}  {:?}", s.market, s.score, s.tier),
                Style::default().fg(tier_color(s.tier)),
            )))
        })
        .collect();
    let signals_list =
        List::new(signals).block(Block::default().borders(Borders::ALL).title("Signals"));
    f.render_widget(signals_list, middle[0]);

    let positions: Vec<ListItem> = app
        .positions
        .iter()
        .map(|p| {
            let color = if p.pnl_percent < 0.0 {
                Color::Red
            } else {
                Color::Green
            };
            ListItem::new(Line::from(Span::styled(
                format!(
                    "{:<12} {:>+6.2}%  entry {}  stop {}  {}",
                    p.market, p.pnl_percent, p.entry_price, p.stop_loss_price, p.phase
                ),
                Style::default().fg(color),
            )))
        })
        .collect();
    let positions_list =
        List::new(positions).block(Block::default().borders(Borders::ALL).title("Positions"));
    f.render_widget(positions_list, middle[1]);

    let events: Vec<ListItem> = app
        .events
        .iter()
        .rev()
        .map(|s| ListItem::new(Line::from(Span::raw(s.as_str()))))
        .collect();
    let events_list =
        List::new(events).block(Block::default().borders(Borders::ALL).title("Events"));
    f.render_widget(events_list, chunks[2]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TradeKind, TradeRecord};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn signal(market: &str, score: f64) -> Signal {
        Signal {
            market: market.into(),
            score,
            total_score: 0.0,
            tier: Tier::from_score(score),
            factors: Vec::new(),
        }
    }

    #[test]
    fn latest_signal_per_market_wins() {
        let mut app = App::new();
        app.on_event(UiEvent::Signal(signal("KRW-BTC", 40.0)));
        app.on_event(UiEvent::Signal(signal("KRW-BTC", 77.0)));
        app.on_event(UiEvent::Signal(signal("KRW-ETH", 55.0)));
        assert_eq!(app.signals.len(), 2);
        assert_eq!(app.signals["KRW-BTC"].tier, Tier::StrongBuy);
    }

    #[test]
    fn event_log_is_bounded() {
        let mut app = App::new();
        for i in 0..(MAX_EVENTS + 10) {
            app.on_event(UiEvent::Log(format!("line {}", i)));
        }
        assert_eq!(app.events.len(), MAX_EVENTS);
        assert_eq!(app.events.front().map(String::as_str), Some("line 10"));
    }

    #[test]
    fn exits_are_logged_and_portfolio_replaced() {
        let mut app = App::new();
        app.on_event(UiEvent::Exited(TradeRecord {
            kind: TradeKind::Sell,
            market: "KRW-SOL".into(),
            entry_price: dec!(200_000),
            exit_price: Some(dec!(190_000)),
            quantity: dec!(0.5),
            amount: dec!(95_000),
            pnl: dec!(-5_000),
            pnl_percent: -5.0,
            reason: "stop-loss".into(),
            order_id: "1".into(),
            timestamp: Utc::now(),
        }));
        app.on_event(UiEvent::Portfolio {
            positions: Vec::new(),
            daily_pnl: dec!(-5_000),
        });
        assert!(app.events[0].contains("stop-loss"));
        assert_eq!(app.daily_pnl, dec!(-5_000));
    }
}
