//! Spoken-reply playback through a single shared output sink.
//!
//! The backend serves reply audio as URLs (relative ones resolve against
//! the configured endpoint). Fetched bytes are handed to a worker thread
//! owning the rodio output stream; a new reply stops whatever is playing
//! and takes over the sink. No queueing: only the most recent reply is
//! ever audible.

use std::io::Cursor;

use async_trait::async_trait;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("failed to fetch reply audio: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("audio output unavailable: {0}")]
    Output(String),
    #[error("could not decode reply audio: {0}")]
    Decode(String),
}

/// Seam between the controller and the platform audio output.
///
/// Failures are non-fatal by contract: the caller logs them and the
/// transcript stays untouched.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    async fn play(&self, url: &str) -> Result<(), PlaybackError>;
}

struct PlayCmd {
    bytes: Vec<u8>,
    volume: f32,
    reply: oneshot::Sender<Result<(), PlaybackError>>,
}

/// Production sink backed by rodio. The output stream is opened lazily on
/// the worker thread at first playback, so construction never fails and a
/// machine without audio output degrades to logged playback errors.
pub struct SpeechPlayer {
    base_url: String,
    volume: f32,
    client: reqwest::Client,
    cmd_tx: std::sync::mpsc::Sender<PlayCmd>,
}

impl SpeechPlayer {
    pub fn new(base_url: &str, volume: f32) -> Self {
        let (cmd_tx, cmd_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || playback_worker(cmd_rx));
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            volume: volume.clamp(0.0, 1.0),
            client: reqwest::Client::new(),
            cmd_tx,
        }
    }

    /// The backend serves relative URLs like `/static/audio/<id>.mp3`.
    fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl PlaybackSink for SpeechPlayer {
    async fn play(&self, url: &str) -> Result<(), PlaybackError> {
        let absolute = self.resolve(url);
        debug!(url = %absolute, "fetching reply audio");

        let resp = self.client.get(&absolute).send().await?.error_for_status()?;
        let bytes = resp.bytes().await?.to_vec();

        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(PlayCmd {
                bytes,
                volume: self.volume,
                reply,
            })
            .map_err(|_| PlaybackError::Output("playback worker is gone".into()))?;
        rx.await
            .map_err(|_| PlaybackError::Output("playback worker is gone".into()))?
    }
}

/// Worker loop owning the sole output stream and the current sink.
fn playback_worker(cmd_rx: std::sync::mpsc::Receiver<PlayCmd>) {
    let mut output: Option<(OutputStream, OutputStreamHandle)> = None;
    let mut current: Option<Sink> = None;

    while let Ok(cmd) = cmd_rx.recv() {
        let (stream, handle) = match output.take() {
            Some(opened) => opened,
            None => match OutputStream::try_default() {
                Ok(opened) => opened,
                Err(e) => {
                    let _ = cmd.reply.send(Err(PlaybackError::Output(e.to_string())));
                    continue;
                }
            },
        };
        let sink_handle = handle.clone();
        output = Some((stream, handle));

        // Replace whatever is playing; the newest reply wins.
        if let Some(sink) = current.take() {
            sink.stop();
        }

        let result = Decoder::new(Cursor::new(cmd.bytes))
            .map_err(|e| PlaybackError::Decode(e.to_string()))
            .and_then(|source| {
                let sink = Sink::try_new(&sink_handle)
                    .map_err(|e| PlaybackError::Output(e.to_string()))?;
                sink.set_volume(cmd.volume);
                sink.append(source);
                info!("reply playback started");
                current = Some(sink);
                Ok(())
            });
        let _ = cmd.reply.send(result);
    }
    debug!("playback worker exiting");
}
