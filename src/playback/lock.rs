//! Named render locks over the shared display.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

/// Registry of named locks held over the physical output device.
///
/// Adding a held name and removing an absent one are both no-ops. Callers
/// check [`is_locked`](Self::is_locked) instead of blocking.
#[derive(Debug, Clone, Default)]
pub struct RenderLocks {
    held: Arc<Mutex<Vec<String>>>,
}

impl RenderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<String>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds `name`. Returns false if it was already held.
    pub fn append_lock(&self, name: &str) -> bool {
        let mut held = self.entries();
        if held.iter().any(|n| n == name) {
            return false;
        }
        held.push(name.to_string());
        debug!(lock = name, "Render lock added");
        true
    }

    /// Removes `name`. Returns false if it was not held.
    pub fn remove_lock(&self, name: &str) -> bool {
        let mut held = self.entries();
        let before = held.len();
        held.retain(|n| n != name);
        let removed = held.len() != before;
        if removed {
            debug!(lock = name, "Render lock removed");
        }
        removed
    }

    /// True while any lock is held; the renderer should stay off the display.
    pub fn is_locked(&self) -> bool {
        !self.entries().is_empty()
    }

    pub fn holds(&self, name: &str) -> bool {
        self.entries().iter().any(|n| n == name)
    }

    pub fn held(&self) -> Vec<String> {
        self.entries().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_are_idempotent() {
        let locks = RenderLocks::new();
        assert!(locks.append_lock("video"));
        assert!(!locks.append_lock("video"));
        assert_eq!(locks.held(), vec!["video".to_string()]);

        assert!(locks.remove_lock("video"));
        assert!(!locks.remove_lock("video"));
        assert!(!locks.is_locked());
    }

    #[test]
    fn clones_share_state() {
        let locks = RenderLocks::new();
        let other = locks.clone();
        other.append_lock("text");
        assert!(locks.holds("text"));
        assert!(locks.is_locked());
    }
}
