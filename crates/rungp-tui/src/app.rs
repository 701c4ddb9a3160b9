//! Interactive draw loop.

use crate::model::SharedModel;
use crate::widgets::{logs, phases};
use anyhow::Result;
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    crossterm::{
        event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
        execute,
        terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
    },
    layout::{Constraint, Direction, Layout},
};
use std::io;
use tokio::time::{Duration, interval};
use tracing::debug;

/// Full-screen boot view.
///
/// Draws the shared model every 100ms. Returns when the operator presses
/// `q` or Ctrl+C, or once the model has received `Quit`.
pub struct App {
    model: SharedModel,
}

impl App {
    pub fn new(model: SharedModel) -> Self {
        Self { model }
    }

    /// Runs until the operator quits or the session ends.
    ///
    /// The terminal is restored on every exit path.
    pub async fn run(self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        scopeguard::defer! {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen);
        }
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let mut tick = interval(Duration::from_millis(100));
        let mut frame = 0usize;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    frame = frame.wrapping_add(1);
                    let model = self.model.snapshot();
                    if model.quit {
                        debug!("Renderer received quit");
                        break;
                    }
                    terminal.draw(|f| {
                        let chunks = Layout::default()
                            .direction(Direction::Vertical)
                            .constraints([
                                Constraint::Min(3),
                                Constraint::Length(crate::LOG_TAIL as u16 + 1),
                                Constraint::Length(3),
                            ])
                            .split(f.area());

                        f.render_widget(phases::render(&model, frame), chunks[0]);
                        f.render_widget(logs::render(&model), chunks[1]);
                        f.render_widget(logs::render_access(&model), chunks[2]);
                    })?;

                    if event::poll(Duration::from_millis(0))?
                        && let Event::Key(key) = event::read()?
                        && key.kind == KeyEventKind::Press
                        && is_quit_key(key.code, key.modifiers)
                    {
                        debug!("Operator quit");
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    break;
                }
            }
        }

        Ok(())
    }
}

fn is_quit_key(code: KeyCode, modifiers: KeyModifiers) -> bool {
    match code {
        KeyCode::Char('q') => true,
        KeyCode::Char('c') => modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quit_keys() {
        assert!(is_quit_key(KeyCode::Char('q'), KeyModifiers::NONE));
        assert!(is_quit_key(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(!is_quit_key(KeyCode::Char('c'), KeyModifiers::NONE));
        assert!(!is_quit_key(KeyCode::Enter, KeyModifiers::NONE));
    }
}
