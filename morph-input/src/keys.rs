//! Key bindings for the terminal front end

use crate::commands::{InputAction, UserCommand};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// Handles keyboard input and converts to actions
#[derive(Debug, Clone, Default)]
pub struct InputHandler {
    /// Number of known gestures; digit keys beyond it are ignored
    gesture_count: Option<usize>,
}

impl InputHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gesture_count(mut self, count: usize) -> Self {
        self.gesture_count = Some(count);
        self
    }

    /// Handle a key event and return an action if applicable
    pub fn handle_key(&self, key: KeyEvent) -> Option<InputAction> {
        if key.kind == KeyEventKind::Release {
            return None;
        }

        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(InputAction::Quit),
            KeyCode::Esc | KeyCode::Char('q') => Some(InputAction::Quit),

            KeyCode::Char('r') => Some(InputAction::Command(UserCommand::StartRecording)),
            KeyCode::Char('s') => Some(InputAction::Command(UserCommand::StopRecording)),
            KeyCode::Char('p') => Some(InputAction::Command(UserCommand::Play)),
            KeyCode::Char(' ') => Some(InputAction::Command(UserCommand::Pause)),
            KeyCode::Char('c') => Some(InputAction::Command(UserCommand::Clear)),

            KeyCode::Char(d @ '0'..='9') => {
                let index = d.to_digit(10)? as usize;
                match self.gesture_count {
                    Some(count) if index >= count => None,
                    _ => Some(InputAction::Gesture(index)),
                }
            }
            _ => None,
        }
    }

    /// One line of key help for the terminal
    pub fn help() -> &'static str {
        "r: record  s: stop & process  p: play  space: pause  c: clear  0-9: gesture  q: quit"
    }
}
