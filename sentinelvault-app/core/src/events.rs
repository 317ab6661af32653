//! Semantic notification events handed to the presentation layer.
//!
//! The core never renders anything. Every user-visible outcome is pushed as a
//! `Notification` onto a channel that the UI drains and displays.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Default on-screen lifetime of a notification.
pub const DEFAULT_DISPLAY_MS: u64 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    pub display_duration_ms: u64,
}

/// Sending half of the notification channel.
///
/// Cloning is cheap; every component that reports to the user holds one.
/// A closed receiver is not an error: the UI may have gone away.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Notification>>,
    default_duration_ms: u64,
}

impl Notifier {
    /// Create a notifier and the receiver the UI layer drains.
    pub fn channel(default_duration_ms: u64) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                default_duration_ms,
            },
            rx,
        )
    }

    /// A notifier that drops everything (headless tools).
    pub fn silent() -> Self {
        Self {
            tx: None,
            default_duration_ms: DEFAULT_DISPLAY_MS,
        }
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(NotificationKind::Success, message.into(), self.default_duration_ms);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(NotificationKind::Error, message.into(), self.default_duration_ms);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(NotificationKind::Info, message.into(), self.default_duration_ms);
    }

    /// Emit with an explicit display duration (long-lived notices).
    pub fn emit(&self, kind: NotificationKind, message: String, display_duration_ms: u64) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx
            .send(Notification {
                kind,
                message,
                display_duration_ms,
            })
            .is_err()
        {
            debug!("Notification dropped: receiver closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifier_delivers_in_order() {
        let (notifier, mut rx) = Notifier::channel(DEFAULT_DISPLAY_MS);
        notifier.info("Refreshing credentials...");
        notifier.error("Incorrect PIN.");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, NotificationKind::Info);
        assert_eq!(first.display_duration_ms, 3000);

        let second = rx.try_recv().unwrap();
        assert_eq!(second.kind, NotificationKind::Error);
        assert_eq!(second.message, "Incorrect PIN.");
    }

    #[test]
    fn test_notification_wire_shape() {
        let n = Notification {
            kind: NotificationKind::Success,
            message: "ok".into(),
            display_duration_ms: 10_000,
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["kind"], "success");
        assert_eq!(json["displayDurationMs"], 10_000);
    }

    #[test]
    fn test_silent_notifier_is_noop() {
        Notifier::silent().error("nobody listening");
    }
}
