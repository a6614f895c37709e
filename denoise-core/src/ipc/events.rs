//! Session status events.
//!
//! Broadcast through `SessionController::subscribe_status` on every lifecycle
//! transition and every load progress step.

use serde::{Deserialize, Serialize};

/// Current state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No session; `start()` may be called.
    #[default]
    Idle,
    /// Bridge allocated, worker spawned, audio host opening.
    Starting,
    /// Audio is flowing but the engine is still loading; output is silence.
    Loading,
    /// Engine loaded and processing chunks.
    Running,
    /// Teardown in progress.
    Stopping,
    /// A fatal error ended the session; state has returned to idle.
    Error,
}

impl SessionStatus {
    /// `Starting`, `Loading` and `Running` all count as an active session.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Loading | Self::Running)
    }
}

/// Emitted whenever the session status changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message, load step).
    pub detail: Option<String>,
    /// Engine load progress in percent, while loading.
    pub progress: Option<u8>,
}

impl SessionStatusEvent {
    pub fn new(status: SessionStatus) -> Self {
        Self {
            status,
            detail: None,
            progress: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_lowercase_status() {
        let event = SessionStatusEvent::new(SessionStatus::Loading)
            .with_detail("model loaded")
            .with_progress(50);

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "loading");
        assert_eq!(json["detail"], "model loaded");
        assert_eq!(json["progress"], 50);

        let round_trip: SessionStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip, event);
    }

    #[test]
    fn status_rejects_non_lowercase_values() {
        let err = serde_json::from_str::<SessionStatus>(r#""Running""#);
        assert!(err.is_err(), "expected invalid casing to fail");
    }

    #[test]
    fn only_starting_loading_running_are_active() {
        let active: Vec<_> = [
            SessionStatus::Idle,
            SessionStatus::Starting,
            SessionStatus::Loading,
            SessionStatus::Running,
            SessionStatus::Stopping,
            SessionStatus::Error,
        ]
        .into_iter()
        .filter(|s| s.is_active())
        .collect();
        assert_eq!(
            active,
            [
                SessionStatus::Starting,
                SessionStatus::Loading,
                SessionStatus::Running
            ]
        );
    }
}
