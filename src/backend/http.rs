//! HTTP dispatcher for the assistant backend service.
//!
//! Voice goes up as a multipart WAV upload to `/api/process_voice`, text
//! as JSON to `/api/process_text`. Both answer with the same envelope:
//! `{"status": ..., "text"?: ..., "response": {"message": ...}, "audio_url"?: ...}`.

use async_trait::async_trait;
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AssistantBackend, DispatchError, TextReply, VoiceReply};
use crate::audio::capture::RecordedAudio;

pub struct HttpBackend {
    base_url: String,
    voice_response: bool,
    client: reqwest::Client,
}

impl HttpBackend {
    /// `voice_response` asks the backend to also synthesize spoken replies
    /// for text input.
    pub fn new(base_url: &str, voice_response: bool) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            voice_response,
            client: reqwest::Client::new(),
        }
    }

    /// Health probe against `/api/ping`. Used for a startup connectivity
    /// check; failures are for the caller to log, nothing more.
    pub async fn ping(&self) -> Result<(), DispatchError> {
        let resp = self
            .client
            .get(format!("{}/api/ping", self.base_url))
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ReplyPayload {
    message: String,
    /// Side-effect actions the backend extracted from the reply. The
    /// backend executes them itself; this client only renders `message`.
    #[serde(default)]
    #[allow(dead_code)]
    actions: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct VoiceResponseBody {
    text: String,
    response: ReplyPayload,
    #[serde(default)]
    audio_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextResponseBody {
    response: ReplyPayload,
    #[serde(default)]
    audio_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Serialize)]
struct TextRequestBody<'a> {
    text: &'a str,
    voice_response: bool,
}

#[async_trait]
impl AssistantBackend for HttpBackend {
    async fn send_audio(&self, audio: RecordedAudio) -> Result<VoiceReply, DispatchError> {
        let wav = encode_wav(&audio.samples, audio.sample_rate);
        debug!(
            bytes = wav.len(),
            duration_secs = audio.duration_seconds(),
            "uploading utterance"
        );

        let part = multipart::Part::bytes(wav)
            .file_name("recording.wav")
            .mime_str("audio/wav")?;
        let form = multipart::Form::new().part("audio", part);

        let resp = self
            .client
            .post(format!("{}/api/process_voice", self.base_url))
            .multipart(form)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let body: VoiceResponseBody = resp.json().await?;
        Ok(VoiceReply {
            recognized: body.text,
            message: body.response.message,
            audio_url: body.audio_url,
        })
    }

    async fn send_text(&self, text: &str) -> Result<TextReply, DispatchError> {
        debug!(chars = text.len(), "submitting text input");

        let resp = self
            .client
            .post(format!("{}/api/process_text", self.base_url))
            .json(&TextRequestBody {
                text,
                voice_response: self.voice_response,
            })
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let body: TextResponseBody = resp.json().await?;
        Ok(TextReply {
            message: body.response.message,
            audio_url: body.audio_url,
        })
    }
}

/// Map non-2xx responses to `DispatchError::Backend`, extracting the
/// backend's `{"status": "error", "message": ...}` body when it parses.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, DispatchError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|e| e.message)
        .unwrap_or(body);
    Err(DispatchError::Backend {
        status: status.as_u16(),
        message,
    })
}

/// Encode f32 samples as a 16-bit PCM mono WAV file.
fn encode_wav(audio: &[f32], sample_rate: u32) -> Vec<u8> {
    let num_samples = audio.len() as u32;
    let bytes_per_sample: u16 = 2;
    let num_channels: u16 = 1;
    let data_size = num_samples * bytes_per_sample as u32;
    let file_size = 36 + data_size;

    let mut buf = Vec::with_capacity(44 + data_size as usize);

    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&num_channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    let byte_rate = sample_rate * num_channels as u32 * bytes_per_sample as u32;
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    let block_align = num_channels * bytes_per_sample;
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&(bytes_per_sample * 8).to_le_bytes());

    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for &sample in audio {
        let clamped = sample.clamp(-1.0, 1.0);
        let pcm = (clamped * 32767.0) as i16;
        buf.extend_from_slice(&pcm.to_le_bytes());
    }

    buf
}
