//! Assistant interaction core.
//!
//! Library surface behind the `majordome` binary: microphone capture
//! sessions, the conversation transcript, HTTP dispatch against the
//! assistant backend service, spoken-reply playback, and the interaction
//! controller that ties them together.

pub mod audio;
pub mod backend;
pub mod config;
pub mod controller;
pub mod ipc;
pub mod playback;
pub mod transcript;
