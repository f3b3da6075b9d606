//! Atomic controller state machine.
//!
//! Three states, one `AtomicU8`. Overlapping triggers are rejected by a
//! failed compare-exchange instead of being queued, which gives a defined
//! no-op behavior to every stray button press or duplicate command.

use std::sync::atomic::{AtomicU8, Ordering};

/// Interaction phases of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControllerState {
    /// Nothing in flight; voice and text input are both accepted.
    Idle = 0,
    /// A capture session holds the microphone.
    Recording = 1,
    /// A dispatch against the assistant backend is outstanding.
    Dispatching = 2,
}

impl ControllerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Recording,
            2 => Self::Dispatching,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Recording => write!(f, "recording"),
            Self::Dispatching => write!(f, "dispatching"),
        }
    }
}

#[derive(Debug)]
pub struct StateCell {
    state: AtomicU8,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ControllerState::Idle as u8),
        }
    }

    pub fn current(&self) -> ControllerState {
        ControllerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Idle -> Recording. False if anything is already in flight.
    pub fn try_begin_recording(&self) -> bool {
        self.compare_exchange(ControllerState::Idle, ControllerState::Recording)
    }

    /// Idle -> Dispatching (text input path).
    pub fn try_begin_dispatch(&self) -> bool {
        self.compare_exchange(ControllerState::Idle, ControllerState::Dispatching)
    }

    /// Recording -> Dispatching (stop-and-send path).
    pub fn try_take_recording(&self) -> bool {
        self.compare_exchange(ControllerState::Recording, ControllerState::Dispatching)
    }

    /// Recording -> Idle, after a failed microphone acquisition.
    pub fn abort_recording(&self) {
        let _ = self.compare_exchange(ControllerState::Recording, ControllerState::Idle);
    }

    /// Back to Idle once a dispatch has settled, success or failure.
    pub fn finish_dispatch(&self) {
        self.state
            .store(ControllerState::Idle as u8, Ordering::Release);
    }

    fn compare_exchange(&self, from: ControllerState, to: ControllerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_reaches_only_recording_or_dispatching() {
        let cell = StateCell::new();
        assert!(cell.try_begin_recording());
        assert_eq!(cell.current(), ControllerState::Recording);

        let cell = StateCell::new();
        assert!(cell.try_begin_dispatch());
        assert_eq!(cell.current(), ControllerState::Dispatching);
    }

    #[test]
    fn recording_and_dispatching_are_exclusive() {
        let cell = StateCell::new();
        assert!(cell.try_begin_recording());
        // No transition into a second concurrent phase.
        assert!(!cell.try_begin_recording());
        assert!(!cell.try_begin_dispatch());

        assert!(cell.try_take_recording());
        assert_eq!(cell.current(), ControllerState::Dispatching);
        assert!(!cell.try_begin_recording());
        assert!(!cell.try_take_recording());
    }

    #[test]
    fn abort_recording_returns_to_idle() {
        let cell = StateCell::new();
        assert!(cell.try_begin_recording());
        cell.abort_recording();
        assert_eq!(cell.current(), ControllerState::Idle);
        // Aborting when not recording changes nothing.
        cell.abort_recording();
        assert_eq!(cell.current(), ControllerState::Idle);
    }

    #[test]
    fn finish_dispatch_always_lands_on_idle() {
        let cell = StateCell::new();
        assert!(cell.try_begin_dispatch());
        cell.finish_dispatch();
        assert_eq!(cell.current(), ControllerState::Idle);
    }
}
