//! Container lifecycle events.
//!
//! A [`ContainerEvent`] is the engine's view of one Docker daemon event:
//! subject kind, action string and subject id. Events are transient; they
//! exist only on the wire between the watcher and a pipeline's debounce
//! coordinator and are never persisted.

use std::fmt;

/// Subject kind of a daemon event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A container lifecycle event.
    Container,
    /// A network attachment event.
    Network,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container => write!(f, "container"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// One daemon event as forwarded to pipelines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    /// Subject kind.
    pub kind: EventKind,
    /// Daemon action, e.g. `start` or `die`.
    pub action: String,
    /// Subject id (container or network id).
    pub id: String,
}

impl ContainerEvent {
    /// Creates an event.
    pub fn new(kind: EventKind, action: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind,
            action: action.into(),
            id: id.into(),
        }
    }

    /// Whether this event is on the forwarding allow-list.
    ///
    /// Only lifecycle transitions that can change rendered output are fanned
    /// out: container start/stop/die/health_status and network
    /// connect/disconnect. Everything else (exec, attach, prune, ...) is
    /// dropped at the watcher.
    pub fn is_watched(&self) -> bool {
        match self.kind {
            EventKind::Container => {
                matches!(self.action.as_str(), "start" | "stop" | "die" | "health_status")
            }
            EventKind::Network => matches!(self.action.as_str(), "connect" | "disconnect"),
        }
    }

    /// Short id for log lines (first 12 characters).
    pub fn short_id(&self) -> &str {
        let end = self.id.len().min(12);
        &self.id[..end]
    }
}

impl fmt::Display for ContainerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.action, self.kind, self.short_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_lifecycle_actions_are_watched() {
        for action in ["start", "stop", "die", "health_status"] {
            let event = ContainerEvent::new(EventKind::Container, action, "abc");
            assert!(event.is_watched(), "{action} should be watched");
        }
    }

    #[test]
    fn container_noise_is_dropped() {
        for action in ["create", "exec_start", "attach", "destroy"] {
            let event = ContainerEvent::new(EventKind::Container, action, "abc");
            assert!(!event.is_watched(), "{action} should be dropped");
        }
    }

    #[test]
    fn network_attachment_actions_are_watched() {
        assert!(ContainerEvent::new(EventKind::Network, "connect", "n1").is_watched());
        assert!(ContainerEvent::new(EventKind::Network, "disconnect", "n1").is_watched());
        assert!(!ContainerEvent::new(EventKind::Network, "create", "n1").is_watched());
    }

    #[test]
    fn short_id_truncates_long_ids() {
        let event = ContainerEvent::new(
            EventKind::Container,
            "start",
            "0123456789abcdef0123456789abcdef",
        );
        assert_eq!(event.short_id(), "0123456789ab");
    }

    #[test]
    fn short_id_keeps_short_ids() {
        let event = ContainerEvent::new(EventKind::Container, "start", "abc");
        assert_eq!(event.short_id(), "abc");
    }

    #[test]
    fn display_format() {
        let event = ContainerEvent::new(EventKind::Container, "start", "abcdef");
        assert_eq!(event.to_string(), "start container abcdef");
    }
}
