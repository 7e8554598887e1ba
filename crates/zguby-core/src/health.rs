//! Health and readiness signal for the consumer.

use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Logging in and resolving the dataset.
    Starting,
    /// Consuming messages.
    Ready,
    /// A fatal error stopped consumption; the process needs attention.
    Halted { reason: String },
    /// Shut down cooperatively.
    Stopped,
}

impl HealthStatus {
    /// Liveness: only a halted consumer is unhealthy.
    pub fn is_healthy(&self) -> bool {
        !matches!(self, HealthStatus::Halted { .. })
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, HealthStatus::Ready)
    }

    pub fn label(&self) -> &'static str {
        match self {
            HealthStatus::Starting => "starting",
            HealthStatus::Ready => "ready",
            HealthStatus::Halted { .. } => "halted",
            HealthStatus::Stopped => "stopped",
        }
    }
}

/// Cloneable handle publishing the current [`HealthStatus`].
#[derive(Debug, Clone)]
pub struct HealthHandle {
    sender: watch::Sender<HealthStatus>,
}

impl Default for HealthHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(HealthStatus::Starting);
        Self { sender }
    }

    pub fn status(&self) -> HealthStatus {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.sender.subscribe()
    }

    pub fn set_ready(&self) {
        self.transition(HealthStatus::Ready);
    }

    /// Halted is sticky: later `set_ready`/`set_stopped` calls do not clear it.
    pub fn set_halted(&self, reason: impl Into<String>) {
        self.sender.send_replace(HealthStatus::Halted {
            reason: reason.into(),
        });
    }

    pub fn set_stopped(&self) {
        self.transition(HealthStatus::Stopped);
    }

    fn transition(&self, next: HealthStatus) {
        self.sender.send_if_modified(|status| {
            if matches!(status, HealthStatus::Halted { .. }) {
                false
            } else {
                *status = next;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_not_ready_but_healthy() {
        let health = HealthHandle::new();
        assert_eq!(health.status(), HealthStatus::Starting);
        assert!(health.status().is_healthy());
        assert!(!health.status().is_ready());
    }

    #[test]
    fn test_halted_is_unhealthy_and_sticky() {
        let health = HealthHandle::new();
        health.set_ready();
        assert!(health.status().is_ready());

        health.set_halted("login failed");
        health.set_stopped();
        health.set_ready();
        let status = health.status();
        assert!(!status.is_healthy());
        assert_eq!(status.label(), "halted");
    }

    #[test]
    fn test_stopped_after_ready() {
        let health = HealthHandle::new();
        health.set_ready();
        health.set_stopped();
        assert_eq!(health.status(), HealthStatus::Stopped);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let health = HealthHandle::new();
        let mut rx = health.subscribe();
        health.set_ready();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), HealthStatus::Ready);
    }
}
