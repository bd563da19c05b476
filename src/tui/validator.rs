//! Live terminal view of a validation run

use crate::proxy::{CandidateSet, ProbeResult, ProxyChecker, ResultSink, RunReport};
use crate::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use std::collections::VecDeque;
use std::io;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::Duration;

/// Maximum number of recent results kept per pane
const MAX_RECENT: usize = 100;

/// Which results pane has focus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pane {
    Working,
    Failed,
}

/// Terminal UI that drives a run and records it through a [`ResultSink`]
pub struct ValidatorApp<'a> {
    checker: &'a ProxyChecker,
    candidates: &'a CandidateSet,
    sink: &'a ResultSink,
    report: RunReport,
    recent_working: VecDeque<ProbeResult>,
    recent_failed: VecDeque<ProbeResult>,
    focus: Pane,
    list_state: ListState,
    is_complete: bool,
    should_quit: bool,
}

impl<'a> ValidatorApp<'a> {
    pub fn new(checker: &'a ProxyChecker, candidates: &'a CandidateSet, sink: &'a ResultSink) -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));

        Self {
            checker,
            candidates,
            sink,
            report: RunReport::new(candidates.len()),
            recent_working: VecDeque::new(),
            recent_failed: VecDeque::new(),
            focus: Pane::Working,
            list_state,
            is_complete: false,
            should_quit: false,
        }
    }

    /// Run the checker under the TUI and return the final report.
    ///
    /// Quitting before the run is over cancels it; working proxies found
    /// up to that point stay in the output file.
    pub async fn run(mut self) -> Result<RunReport> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let outcome = self.run_app(&mut terminal).await;

        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        terminal.show_cursor()?;

        outcome?;
        self.sink.finish().await?;
        self.report.finish();
        Ok(self.report)
    }

    async fn run_app<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        let mut rx = self.checker.check_proxies_stream(self.candidates);

        while !self.should_quit {
            terminal.draw(|f| self.ui(f))?;

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_input(key.code);
                    }
                }
            }

            // Drain everything that completed since the last frame.
            while !self.is_complete {
                match rx.try_recv() {
                    Ok(result) => self.record(result).await?,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => self.is_complete = true,
                }
            }
        }

        if !self.is_complete {
            self.stop_and_drain(&mut rx).await?;
        }
        Ok(())
    }

    /// Cancel the run and record every result that was already emitted
    async fn stop_and_drain(&mut self, rx: &mut mpsc::Receiver<ProbeResult>) -> Result<()> {
        self.checker.cancel();
        while let Some(result) = rx.recv().await {
            self.record(result).await?;
        }
        self.is_complete = true;
        Ok(())
    }

    /// Persist one result, then show it
    async fn record(&mut self, result: ProbeResult) -> Result<()> {
        if let Err(e) = self.sink.on_result(&result).await {
            self.checker.cancel();
            return Err(e.into());
        }
        self.push_result(result);
        Ok(())
    }

    fn push_result(&mut self, result: ProbeResult) {
        let recent = if result.is_success() {
            &mut self.recent_working
        } else {
            &mut self.recent_failed
        };
        recent.push_back(result.clone());
        if recent.len() > MAX_RECENT {
            recent.pop_front();
        }
        self.report.record(result);
    }

    fn status_message(&self) -> String {
        let failures: Vec<String> = self
            .report
            .failures_by_kind()
            .iter()
            .map(|(kind, count)| format!("{kind}: {count}"))
            .collect();
        let failures = if failures.is_empty() {
            String::new()
        } else {
            format!(" | {}", failures.join(", "))
        };

        if self.is_complete {
            format!(
                "Complete! Working: {} | Failed: {}{} | Saved to {} | Press 'q' to quit",
                self.report.succeeded(),
                self.report.failed(),
                failures,
                self.sink.path().display()
            )
        } else {
            format!(
                "Checking... Working: {} | Failed: {}{} | 'q' cancels",
                self.report.succeeded(),
                self.report.failed(),
                failures
            )
        }
    }

    fn focused_len(&self) -> usize {
        match self.focus {
            Pane::Working => self.recent_working.len(),
            Pane::Failed => self.recent_failed.len(),
        }
    }

    fn handle_input(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
            }
            KeyCode::Tab => {
                self.focus = match self.focus {
                    Pane::Working => Pane::Failed,
                    Pane::Failed => Pane::Working,
                };
                self.list_state.select(Some(0));
            }
            KeyCode::Down => {
                let last = self.focused_len().saturating_sub(1);
                let i = match self.list_state.selected() {
                    Some(i) if i < last => i + 1,
                    _ => 0,
                };
                self.list_state.select(Some(i));
            }
            KeyCode::Up => {
                let last = self.focused_len().saturating_sub(1);
                let i = match self.list_state.selected() {
                    Some(0) | None => last,
                    Some(i) => i - 1,
                };
                self.list_state.select(Some(i));
            }
            _ => {}
        }
    }

    fn ui(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Min(0),
                Constraint::Length(3),
            ])
            .split(f.size());

        let title = Paragraph::new(format!(
            "SOCKS5 Proxy Validator | {} | {} concurrent",
            self.checker.config().test_url,
            self.checker.config().effective_concurrency()
        ))
        .style(Style::default().fg(Color::Cyan))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
        f.render_widget(title, chunks[0]);

        let total = self.report.total;
        let checked = self.report.attempted();
        let percent = if total > 0 {
            (checked as f64 / total as f64 * 100.0) as u16
        } else {
            100
        };
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Progress"))
            .gauge_style(Style::default().fg(Color::Green).bg(Color::Black))
            .percent(percent.min(100))
            .label(format!("{checked}/{total} ({percent}%)"));
        f.render_widget(gauge, chunks[1]);

        let panes = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(chunks[2]);

        let working_state = (self.focus == Pane::Working).then_some(&mut self.list_state);
        render_results(
            f,
            panes[0],
            format!("Working ({})", self.report.succeeded()),
            &self.recent_working,
            Color::Green,
            working_state,
        );

        let failed_state = (self.focus == Pane::Failed).then_some(&mut self.list_state);
        render_results(
            f,
            panes[1],
            format!("Failed ({})", self.report.failed()),
            &self.recent_failed,
            Color::Red,
            failed_state,
        );

        let status = Paragraph::new(self.status_message())
            .style(if self.is_complete {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Yellow)
            })
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Status"));
        f.render_widget(status, chunks[3]);
    }
}

fn render_results(
    f: &mut Frame,
    area: Rect,
    title: String,
    results: &VecDeque<ProbeResult>,
    color: Color,
    list_state: Option<&mut ListState>,
) {
    let items: Vec<ListItem> = results
        .iter()
        .rev()
        .map(|result| ListItem::new(result.to_string()).style(Style::default().fg(color)))
        .collect();

    let border_style = if list_state.is_some() {
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(border_style),
        )
        .highlight_style(Style::default().bg(Color::DarkGray))
        .highlight_symbol(">> ");

    match list_state {
        Some(state) => f.render_stateful_widget(list, area, state),
        None => f.render_widget(list, area),
    }
}
