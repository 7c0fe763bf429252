//! Process-scoped state shared by every request of one application tree.
//!
//! # Responsibilities
//! - Own the compiled-template cache
//! - Own the in-memory session table
//!
//! # Design Decisions
//! - Constructed explicitly and shared via `Arc`; nothing is global, so
//!   tests get isolated state by building a fresh runtime
//! - Both tables are concurrent maps; no teardown beyond drop

use crate::session::SessionStore;
use crate::views::TemplateCache;

/// Caches owned by one application tree.
#[derive(Debug, Default)]
pub struct Runtime {
    templates: TemplateCache,
    sessions: SessionStore,
}

impl Runtime {
    /// Create a runtime with empty caches.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn templates(&self) -> &TemplateCache {
        &self.templates
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRecord;
    use std::time::Duration;

    #[test]
    fn test_fresh_runtime_is_empty() {
        let runtime = Runtime::new();
        assert!(runtime.templates().is_empty());
        assert!(runtime.sessions().is_empty());
    }

    #[test]
    fn test_runtimes_do_not_share_state() {
        let a = Runtime::new();
        let b = Runtime::new();
        let record = SessionRecord::new(Default::default(), Duration::from_secs(60));
        a.sessions().insert("abc".into(), record);
        assert_eq!(a.sessions().len(), 1);
        assert!(b.sessions().is_empty());
    }
}
