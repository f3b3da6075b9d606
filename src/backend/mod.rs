//! Response dispatch against the assistant backend service.
//!
//! One request/response cycle per call, no retries; retry policy, if any,
//! belongs to the caller.

pub mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::audio::capture::RecordedAudio;

/// Normalized outcome of a voice dispatch.
#[derive(Debug, Clone)]
pub struct VoiceReply {
    /// What the backend recognized in the uploaded utterance.
    pub recognized: String,
    /// The assistant's reply text.
    pub message: String,
    /// Optional URL of the synthesized spoken reply.
    pub audio_url: Option<String>,
}

/// Normalized outcome of a text dispatch. The input was already text, so
/// there is no recognized field.
#[derive(Debug, Clone)]
pub struct TextReply {
    pub message: String,
    pub audio_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("assistant backend unreachable: {0}")]
    Network(#[from] reqwest::Error),
    #[error("assistant backend error ({status}): {message}")]
    Backend { status: u16, message: String },
    #[error("assistant backend did not answer in time")]
    Timeout,
}

/// Seam between the controller and the remote assistant service.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// Upload a captured utterance; returns the recognized text plus the
    /// assistant's reply.
    async fn send_audio(&self, audio: RecordedAudio) -> Result<VoiceReply, DispatchError>;

    /// Submit typed input; returns the assistant's reply.
    async fn send_text(&self, text: &str) -> Result<TextReply, DispatchError>;
}
