//! Keyboard sampler over a raw-mode terminal.
//!
//! Terminals report key presses (and auto-repeats), rarely releases. A key is
//! treated as held while presses keep arriving within `hold_window` of each
//! other, which bridges the gap between the first press and the start of
//! auto-repeat. An explicit release event, when the terminal sends one, ends
//! the hold immediately.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;

use super::{ControlEvent, InputSampler};

/// Default hold window; slightly longer than the usual auto-repeat delay.
pub const DEFAULT_HOLD_WINDOW: Duration = Duration::from_millis(600);

pub struct TerminalSampler {
    hold_window: Duration,
    last_seen: HashMap<ControlEvent, Instant>,
    raw_mode: bool,
}

impl TerminalSampler {
    pub fn new(hold_window: Duration) -> Self {
        Self {
            hold_window,
            last_seen: HashMap::new(),
            raw_mode: false,
        }
    }

    /// Put the terminal into raw mode so single key presses are delivered.
    pub fn connect(&mut self) -> Result<()> {
        terminal::enable_raw_mode().context("enable terminal raw mode")?;
        self.raw_mode = true;
        log::info!(
            "TerminalSampler: arrows steer/throttle, r=record, s=stop, g=go, k=quit (hold window {} ms)",
            self.hold_window.as_millis()
        );
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent, now: Instant) {
        // Ctrl-C arrives as a key in raw mode.
        let event = if key.modifiers.contains(KeyModifiers::CONTROL)
            && key.code == KeyCode::Char('c')
        {
            Some(ControlEvent::Quit)
        } else {
            map_key(key.code)
        };
        let Some(event) = event else {
            return;
        };
        match key.kind {
            KeyEventKind::Press | KeyEventKind::Repeat => {
                self.last_seen.insert(event, now);
            }
            KeyEventKind::Release => {
                self.last_seen.remove(&event);
            }
        }
    }
}

impl Default for TerminalSampler {
    fn default() -> Self {
        Self::new(DEFAULT_HOLD_WINDOW)
    }
}

impl InputSampler for TerminalSampler {
    fn poll(&mut self) -> Result<()> {
        let now = Instant::now();
        while event::poll(Duration::ZERO).context("poll terminal events")? {
            if let Event::Key(key) = event::read().context("read terminal event")? {
                self.handle_key(key, now);
            }
        }
        let window = self.hold_window;
        self.last_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) <= window);
        Ok(())
    }

    fn sample(&mut self, event: ControlEvent) -> bool {
        self.last_seen.contains_key(&event)
    }

    fn release(&mut self) {
        self.last_seen.clear();
        if self.raw_mode {
            self.raw_mode = false;
            if let Err(err) = terminal::disable_raw_mode() {
                log::warn!("TerminalSampler: failed to restore terminal: {}", err);
            }
        }
    }
}

impl Drop for TerminalSampler {
    fn drop(&mut self) {
        self.release();
    }
}

fn map_key(code: KeyCode) -> Option<ControlEvent> {
    match code {
        KeyCode::Right => Some(ControlEvent::SteerRight),
        KeyCode::Left => Some(ControlEvent::SteerLeft),
        KeyCode::Up => Some(ControlEvent::Accelerate),
        KeyCode::Down => Some(ControlEvent::Decelerate),
        KeyCode::Char(c) => ControlEvent::from_key_name(&c.to_string()),
        _ => None,
    }
}
