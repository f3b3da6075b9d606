//! Ordered conversation transcript with stable message identities.
//!
//! Every message gets a uuid at append time; later mutation addresses the
//! message by id, never by position, so reconciliation of asynchronous
//! dispatch results cannot hit the wrong entry. Messages are mutated in
//! place and never removed during a session.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle of a transcript entry.
///
/// `Pending` only ever applies to a user voice message whose transcription
/// is still in flight; everything else is `Final` on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Final,
    Pending,
    Error,
}

/// One conversation entry.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub status: MessageStatus,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Clonable handle to the shared conversation log.
///
/// Insertion order is display order. The handle is cheap to clone and safe
/// to share with the dispatch tasks that reconcile late results.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    inner: Arc<Mutex<Vec<Message>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message at the end and return the stored entry.
    pub fn append(&self, role: Role, status: MessageStatus, text: impl Into<String>) -> Message {
        let message = Message {
            id: Uuid::new_v4(),
            role,
            status,
            text: text.into(),
            timestamp: Utc::now(),
        };
        self.inner.lock().unwrap().push(message.clone());
        message
    }

    /// Replace status and text of the message with the given id, in place.
    ///
    /// Silently a no-op (returns `None`) if the id no longer exists.
    pub fn update(
        &self,
        id: Uuid,
        status: MessageStatus,
        text: impl Into<String>,
    ) -> Option<Message> {
        let mut messages = self.inner.lock().unwrap();
        let entry = messages.iter_mut().find(|m| m.id == id)?;
        entry.status = status;
        entry.text = text.into();
        Some(entry.clone())
    }

    /// Like [`update`](Self::update), but applies only while the message is
    /// still `Pending`.
    ///
    /// This is the staleness guard for dispatch results: once a timeout has
    /// resolved the placeholder, a late response finds it non-pending and is
    /// discarded instead of double-applied.
    pub fn resolve_pending(
        &self,
        id: Uuid,
        status: MessageStatus,
        text: impl Into<String>,
    ) -> Option<Message> {
        let mut messages = self.inner.lock().unwrap();
        let entry = messages
            .iter_mut()
            .find(|m| m.id == id && m.status == MessageStatus::Pending)?;
        entry.status = status;
        entry.text = text.into();
        Some(entry.clone())
    }

    /// Ordered read-only view for rendering.
    pub fn snapshot(&self) -> Vec<Message> {
        self.inner.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}
