//! Command definitions for Morph

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// User operations on the record / process / play cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserCommand {
    StartRecording,
    StopRecording,
    Play,
    Pause,
    Clear,
}

impl UserCommand {
    pub const ALL: [UserCommand; 5] = [
        UserCommand::StartRecording,
        UserCommand::StopRecording,
        UserCommand::Play,
        UserCommand::Pause,
        UserCommand::Clear,
    ];

    /// Button label
    pub fn label(&self) -> &'static str {
        match self {
            UserCommand::StartRecording => "Start Rec",
            UserCommand::StopRecording => "Stop Rec",
            UserCommand::Play => "Play",
            UserCommand::Pause => "Pause",
            UserCommand::Clear => "Clear",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            UserCommand::StartRecording => "start-recording",
            UserCommand::StopRecording => "stop-recording",
            UserCommand::Play => "play",
            UserCommand::Pause => "pause",
            UserCommand::Clear => "clear",
        }
    }
}

impl fmt::Display for UserCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for UserCommand {
    type Err = UnknownCommand;

    /// Accepts button labels ("Start Rec") and names ("start-recording")
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        UserCommand::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(input) || c.name() == input)
            .ok_or_else(|| UnknownCommand(input.to_string()))
    }
}

/// What a key press asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    Command(UserCommand),
    /// Act out gesture `n` without a camera
    Gesture(usize),
    Quit,
}
