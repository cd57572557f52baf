//! Keyboard input handling for Morph

mod commands;
mod keys;

pub use commands::{InputAction, UnknownCommand, UserCommand};
pub use keys::InputHandler;
