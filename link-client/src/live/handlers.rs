//! Handler registrations keyed by subject id.

use crate::error::HandlerError;
use dashmap::DashMap;
use fieldlink_types::{Command, Pulse};
use std::sync::Arc;

/// Callback for one command id. Receives the session MID and the command.
///
/// Handlers are synchronous. To answer with
/// `publish_command_response`, share the session through an `Arc` and
/// `tokio::spawn` the publish from the handler.
pub type CommandHandler = Arc<dyn Fn(&str, &Command) -> Result<(), HandlerError> + Send + Sync>;

/// Callback for one pulse id. Receives the session MID and the pulse.
pub type PulseHandler = Arc<dyn Fn(&str, &Pulse) -> Result<(), HandlerError> + Send + Sync>;

/// Subject id to handler list. The first registration for an id is the one
/// that runs.
pub(crate) struct HandlerRegistry<H> {
    entries: DashMap<i32, Vec<H>>,
}

impl<H: Clone> HandlerRegistry<H> {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub(crate) fn register(&self, subject_id: i32, handler: H) {
        self.entries.entry(subject_id).or_default().push(handler);
    }

    /// Remove every handler for `subject_id`, returning how many there were.
    pub(crate) fn unregister(&self, subject_id: i32) -> usize {
        self.entries
            .remove(&subject_id)
            .map(|(_, handlers)| handlers.len())
            .unwrap_or(0)
    }

    /// The handler to run. Cloned out so no map guard is held while it runs.
    pub(crate) fn first(&self, subject_id: i32) -> Option<H> {
        self.entries
            .get(&subject_id)
            .and_then(|handlers| handlers.first().cloned())
    }

    #[cfg(test)]
    pub(crate) fn count(&self, subject_id: i32) -> usize {
        self.entries
            .get(&subject_id)
            .map(|handlers| handlers.len())
            .unwrap_or(0)
    }
}

pub(crate) struct HandlerTable {
    pub(crate) commands: HandlerRegistry<CommandHandler>,
    pub(crate) pulses: HandlerRegistry<PulseHandler>,
}

impl HandlerTable {
    pub(crate) fn new() -> Self {
        Self {
            commands: HandlerRegistry::new(),
            pulses: HandlerRegistry::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_registration_wins() {
        let registry: HandlerRegistry<&'static str> = HandlerRegistry::new();
        registry.register(5, "first");
        registry.register(5, "second");

        assert_eq!(registry.first(5), Some("first"));
        assert_eq!(registry.count(5), 2);
        assert_eq!(registry.first(6), None);
    }

    #[test]
    fn unregister_removes_all_duplicates() {
        let registry: HandlerRegistry<&'static str> = HandlerRegistry::new();
        for _ in 0..3 {
            registry.register(5, "h");
        }
        registry.register(6, "other");

        assert_eq!(registry.unregister(5), 3);
        assert_eq!(registry.first(5), None);
        assert_eq!(registry.unregister(5), 0);
        assert_eq!(registry.first(6), Some("other"));
    }
}
