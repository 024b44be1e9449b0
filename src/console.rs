//! # Console Monitor
//!
//! Terminal front end for a running board: engine status, component states,
//! committed pin values and a command line.
//!
//! Keys: `space` run/pause, `s` single step, `r` reset, `Tab` switch pane,
//! `h` help, `q` quit, `:` enter a command (`step N`, `run`, `pause`,
//! `reset`, `quit`).

use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame, Terminal,
};
use serde::{Deserialize, Serialize};
use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::engine::{Engine, EngineState};
use crate::runner::SharedEngine;

/// Console configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub refresh_rate_ms: u64,
    /// Ticks advanced per frame while running.
    pub ticks_per_frame: u64,
    pub max_pin_rows: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            refresh_rate_ms: 100,
            ticks_per_frame: 1,
            max_pin_rows: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Run,
    Pause,
    Step(u64),
    Reset,
    Help,
    Quit,
}

/// Parse a command line. Returns `None` for anything unrecognised.
pub fn parse_command(input: &str) -> Option<ConsoleCommand> {
    let mut words = input.split_whitespace();
    let command = words.next()?.to_lowercase();
    let argument = words.next();
    if words.next().is_some() {
        return None;
    }
    match (command.as_str(), argument) {
        ("run" | "r", None) => Some(ConsoleCommand::Run),
        ("pause" | "p", None) => Some(ConsoleCommand::Pause),
        ("step" | "s", None) => Some(ConsoleCommand::Step(1)),
        ("step" | "s", Some(n)) => n.parse().ok().map(ConsoleCommand::Step),
        ("reset", None) => Some(ConsoleCommand::Reset),
        ("help" | "h", None) => Some(ConsoleCommand::Help),
        ("quit" | "exit" | "q", None) => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

/// One line summarising the engine.
pub fn status_line(engine: &Engine) -> String {
    let state = match engine.state() {
        EngineState::Idle => "IDLE",
        EngineState::Running => "RUNNING",
        EngineState::Paused => "PAUSED",
        EngineState::Halted => "HALTED",
    };
    let mut line = format!("{} tick={}", state, engine.tick());
    if let Some(fault) = engine.fault() {
        line.push_str(&format!(" fault: {}", fault));
    }
    line
}

/// `NAME (model): description` for every component in registration order.
pub fn component_lines(engine: &Engine) -> Vec<String> {
    engine
        .components()
        .map(|c| format!("{:<10} ({}) {}", c.name(), c.descriptor.model, c.describe()))
        .collect()
}

/// `COMPONENT.PIN = value` for every pin, at most `limit` lines.
pub fn pin_lines(engine: &Engine, limit: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for component in engine.components() {
        for (name, pin) in component.pins() {
            if lines.len() >= limit {
                return lines;
            }
            let width = engine.connections().pin(pin).map_or(1, |p| p.width);
            let value = engine.read_pin(pin).unwrap_or_default();
            lines.push(format!(
                "{}.{:<6} {}",
                component.name(),
                name,
                value.format_width(width)
            ));
        }
    }
    lines
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pane {
    Components,
    Pins,
}

/// Console UI application state
pub struct ConsoleApp {
    engine: SharedEngine,
    config: ConsoleConfig,
    open: bool,
    running: bool,
    command_buffer: Option<String>,
    message: String,
    show_help: bool,
    pane: Pane,
}

impl ConsoleApp {
    pub fn new(engine: SharedEngine, config: ConsoleConfig) -> Self {
        Self {
            engine,
            config,
            open: false,
            running: false,
            command_buffer: None,
            message: String::new(),
            show_help: false,
            pane: Pane::Components,
        }
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        self.open = true;
        let refresh = Duration::from_millis(self.config.refresh_rate_ms.max(1));
        let mut last_draw: Option<Instant> = None;
        let result = loop {
            if !self.open {
                break Ok(());
            }
            if event::poll(Duration::from_millis(10))? {
                if let Event::Key(key) = event::read()? {
                    self.handle_key_event(key.code);
                }
            }
            if last_draw.map_or(true, |at| at.elapsed() >= refresh) {
                if self.running {
                    self.advance();
                }
                if let Err(err) = terminal.draw(|f| self.draw_ui(f)) {
                    break Err(err);
                }
                last_draw = Some(Instant::now());
            }
        };

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        Ok(result?)
    }

    fn advance(&mut self) {
        let ticks = self.config.ticks_per_frame.max(1);
        if let Err(err) = self.engine.lock().step(ticks) {
            warn!(error = %err, "console run stopped");
            self.message = err.to_string();
            self.running = false;
        }
    }

    fn handle_key_event(&mut self, key: KeyCode) {
        if let Some(buffer) = self.command_buffer.as_mut() {
            match key {
                KeyCode::Enter => {
                    let line = buffer.clone();
                    self.command_buffer = None;
                    match parse_command(&line) {
                        Some(command) => self.execute(command),
                        None => self.message = format!("unknown command '{}'", line.trim()),
                    }
                }
                KeyCode::Esc => self.command_buffer = None,
                KeyCode::Backspace => {
                    buffer.pop();
                }
                KeyCode::Char(c) => buffer.push(c),
                _ => {}
            }
            return;
        }

        if self.show_help {
            self.show_help = false;
            return;
        }

        match key {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => self.execute(ConsoleCommand::Quit),
            KeyCode::Char(' ') => {
                let command = if self.running {
                    ConsoleCommand::Pause
                } else {
                    ConsoleCommand::Run
                };
                self.execute(command);
            }
            KeyCode::Char('s') | KeyCode::Char('S') => self.execute(ConsoleCommand::Step(1)),
            KeyCode::Char('r') | KeyCode::Char('R') => self.execute(ConsoleCommand::Reset),
            KeyCode::Char('h') | KeyCode::Char('H') => self.execute(ConsoleCommand::Help),
            KeyCode::Char(':') => self.command_buffer = Some(String::new()),
            KeyCode::Tab => {
                self.pane = match self.pane {
                    Pane::Components => Pane::Pins,
                    Pane::Pins => Pane::Components,
                };
            }
            _ => {}
        }
    }

    fn execute(&mut self, command: ConsoleCommand) {
        debug!(?command, "console command");
        match command {
            ConsoleCommand::Run => {
                self.running = self.engine.lock().state() != EngineState::Halted;
                if !self.running {
                    self.message = "engine halted, reset first".to_string();
                }
            }
            ConsoleCommand::Pause => self.running = false,
            ConsoleCommand::Step(n) => {
                self.running = false;
                let result = self.engine.lock().step(n);
                self.message = match result {
                    Ok(summary) => format!("stepped {} ticks ({:?})", summary.ticks, summary.reason),
                    Err(err) => err.to_string(),
                };
            }
            ConsoleCommand::Reset => {
                self.running = false;
                self.engine.lock().reset();
                self.message = "reset".to_string();
            }
            ConsoleCommand::Help => self.show_help = !self.show_help,
            ConsoleCommand::Quit => {
                self.running = false;
                self.open = false;
            }
        }
    }

    fn draw_ui(&self, f: &mut Frame) {
        let size = f.size();
        if self.show_help {
            self.draw_help_screen(f);
            return;
        }

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(4),
                Constraint::Min(8),
                Constraint::Length(3),
            ])
            .split(size);

        let engine = self.engine.lock();
        let title_text = vec![
            Line::from(vec![Span::styled(
                status_line(&engine),
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            )]),
            Line::from(vec![
                Span::styled("space", Style::default().fg(Color::Yellow)),
                Span::raw("=run/pause, "),
                Span::styled("s", Style::default().fg(Color::Yellow)),
                Span::raw("=step, "),
                Span::styled("r", Style::default().fg(Color::Yellow)),
                Span::raw("=reset, "),
                Span::styled(":", Style::default().fg(Color::Yellow)),
                Span::raw("=command, "),
                Span::styled("q", Style::default().fg(Color::Yellow)),
                Span::raw("=quit"),
            ]),
        ];
        let title = Paragraph::new(title_text)
            .block(Block::default().borders(Borders::ALL).title("Status"))
            .wrap(Wrap { trim: true });
        f.render_widget(title, chunks[0]);

        let content = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(chunks[1]);
        self.draw_lines(f, content[0], "Components", component_lines(&engine), self.pane == Pane::Components);
        self.draw_lines(
            f,
            content[1],
            "Pins",
            pin_lines(&engine, self.config.max_pin_rows),
            self.pane == Pane::Pins,
        );
        drop(engine);

        let command_text = match &self.command_buffer {
            Some(buffer) => format!(":{}", buffer),
            None if self.message.is_empty() => "Press ':' to enter a command, 'h' for help".to_string(),
            None => self.message.clone(),
        };
        let command_bar = Paragraph::new(command_text)
            .style(Style::default().fg(Color::White))
            .block(Block::default().borders(Borders::ALL).title("Command"));
        f.render_widget(command_bar, chunks[2]);
    }

    fn draw_lines(&self, f: &mut Frame, area: Rect, title: &str, lines: Vec<String>, selected: bool) {
        let border = if selected {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        let text: Vec<Line> = lines.into_iter().map(Line::from).collect();
        let widget = Paragraph::new(text)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(border)
                    .title(title.to_string()),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(widget, area);
    }

    fn draw_help_screen(&self, f: &mut Frame) {
        let size = f.size();
        let entry = |keys: &'static str, text: &'static str| {
            Line::from(vec![
                Span::styled(keys, Style::default().fg(Color::Yellow)),
                Span::raw(text),
            ])
        };
        let help_text = vec![
            Line::from(vec![Span::styled(
                "Board Monitor Help",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            )]),
            Line::from(""),
            entry("  space", " - Run or pause"),
            entry("  s", " - Advance one tick"),
            entry("  r", " - Reset to power-on"),
            entry("  Tab", " - Switch between panes"),
            entry("  :step N", " - Advance N ticks"),
            entry("  q", " - Quit"),
            Line::from(""),
            Line::from("Press any key to return to main view..."),
        ];
        let help = Paragraph::new(help_text)
            .style(Style::default().fg(Color::White))
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Help"));
        f.render_widget(help, size);
    }
}

/// Public interface for launching the console
pub fn run_console(engine: SharedEngine, config: ConsoleConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut app = ConsoleApp::new(engine, config);
    app.run()
}
