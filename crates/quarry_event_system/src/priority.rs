//! Priority ranks, owner tokens and the per-invocation cancellation flag.

use crate::events::EventError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A numeric rank in `[0, 100]` controlling handler execution order.
///
/// Lower runs earlier. Two priorities form a reserved band for the host:
/// [`Priority::INTERNAL_INITIAL`] (0) and [`Priority::INTERNAL_FINAL`] (100).
/// Plugins subscribing through a [`ScopedRegistrar`](crate::ScopedRegistrar)
/// cannot use them, guaranteeing the core always runs strictly first and
/// strictly last on any event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    /// Host-only: runs before every plugin handler.
    pub const INTERNAL_INITIAL: Priority = Priority(0);
    /// Runs early.
    pub const HIGH: Priority = Priority(25);
    /// Default rank for handlers with no ordering requirement.
    pub const NORMAL: Priority = Priority(50);
    /// Runs late.
    pub const LOW: Priority = Priority(75);
    /// Host-only: runs after every plugin handler.
    pub const INTERNAL_FINAL: Priority = Priority(100);

    /// Creates a priority, rejecting values above 100.
    pub fn new(value: u8) -> Result<Self, EventError> {
        if value > 100 {
            return Err(EventError::InvalidPriority(value));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Whether this rank belongs to the host-only band.
    pub fn is_reserved(self) -> bool {
        matches!(self.0, 0 | 100)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Explicit owner token recorded on every registration.
///
/// Replaces call-site inspection: the subscriber states who owns the handler,
/// and [`EventSystem::unsubscribe_all`](crate::EventSystem::unsubscribe_all)
/// purges by this token when a plugin is disabled or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerOwner(Arc<str>);

impl HandlerOwner {
    const CORE: &'static str = "core";

    /// The host's own token. Only the host may subscribe in the reserved
    /// priority band, and it does so under this owner.
    pub fn core() -> Self {
        Self(Arc::from(Self::CORE))
    }

    /// Token for a plugin, keyed by its metadata identifier.
    pub fn plugin(identifier: &str) -> Self {
        Self(Arc::from(identifier))
    }

    pub fn id(&self) -> &str {
        &self.0
    }

    pub fn is_core(&self) -> bool {
        self.id() == Self::CORE
    }
}

impl std::fmt::Display for HandlerOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Per-registration options.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerConfig {
    pub priority: Priority,
    /// Run even after an earlier handler cancelled the event.
    pub ignore_cancelled: bool,
}

/// Identifier returned by subscribe, usable for a single unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);

/// Shared cancellation flag threaded through one event invocation.
///
/// Cancellation filters rather than halts: later handlers with
/// `ignore_cancelled == false` are skipped, but the walk continues so
/// monitoring handlers still observe the event.
#[derive(Debug, Clone, Default)]
pub struct EventFlow {
    cancelled: Arc<AtomicBool>,
}

impl EventFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the event cancelled for subsequent handlers.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_bounds() {
        assert!(Priority::new(0).unwrap().is_reserved());
        assert!(Priority::new(100).unwrap().is_reserved());
        assert!(!Priority::new(50).unwrap().is_reserved());
        assert!(matches!(
            Priority::new(101),
            Err(EventError::InvalidPriority(101))
        ));
    }

    #[test]
    fn flow_cancellation_is_shared() {
        let flow = EventFlow::new();
        let observer = flow.clone();
        assert!(!observer.is_cancelled());
        flow.cancel();
        assert!(observer.is_cancelled());
    }
}
