//! JSON-line protocol between the core and its UI shell.
//!
//! Events go out on stdout as `{"event": "<name>", "data": {...}}`;
//! commands come in on stdin as `{"command": "<name>", ...}`.

pub mod bridge;

use serde::{Deserialize, Serialize};

use crate::transcript::Message;

/// Events emitted to the UI shell.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum UiEvent {
    Starting {},
    Ready {},
    StateChange { state: String },
    MessageAppended { message: Message },
    MessageUpdated { message: Message },
    Transcript { messages: Vec<Message> },
    ReplyAudio { url: String },
    Pong {},
    Error { message: String },
    Stopping {},
}

/// Commands received from the UI shell.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum UiCommand {
    ToggleRecording {},
    StartRecording {},
    StopRecording {},
    SubmitText { text: String },
    GetTranscript {},
    Ping {},
    Stop {},
}
