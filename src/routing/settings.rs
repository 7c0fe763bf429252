//! Application settings with parent fallback.
//!
//! A mounted router consults its own settings first and then each
//! enclosing application's, innermost to outermost.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// Setting key for the directory holding view templates.
pub const VIEWS: &str = "views";
/// Setting key for the template file extension.
pub const VIEW_ENGINE: &str = "view engine";
/// Setting key toggling the identifying response header.
pub const X_POWERED_BY: &str = "x-powered-by";

/// One application's settings.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: HashMap<String, Value>,
}

impl Settings {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }
}

/// Settings of every application enclosing the current layer.
#[derive(Debug, Clone, Default)]
pub struct SettingsChain {
    levels: Vec<Arc<Settings>>,
}

impl SettingsChain {
    pub(crate) fn push(&mut self, settings: Arc<Settings>) {
        self.levels.push(settings);
    }

    pub(crate) fn pop(&mut self) {
        self.levels.pop();
    }

    /// Resolve a key, innermost application first.
    pub fn resolve(&self, key: &str) -> Option<&Value> {
        self.levels.iter().rev().find_map(|settings| settings.get(key))
    }

    /// Resolve a key holding a string.
    pub fn resolve_str(&self, key: &str) -> Option<&str> {
        self.resolve(key).and_then(Value::as_str)
    }

    /// A setting is enabled when present and neither `false` nor `null`.
    pub fn enabled(&self, key: &str) -> bool {
        !matches!(self.resolve(key), None | Some(Value::Bool(false)) | Some(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inner_settings_shadow_outer() {
        let mut outer = Settings::default();
        outer.set(VIEWS, "/srv/views");
        outer.set(VIEW_ENGINE, "ejs");
        let mut inner = Settings::default();
        inner.set(VIEW_ENGINE, "html");

        let mut chain = SettingsChain::default();
        chain.push(Arc::new(outer));
        chain.push(Arc::new(inner));

        assert_eq!(chain.resolve_str(VIEW_ENGINE), Some("html"));
        assert_eq!(chain.resolve_str(VIEWS), Some("/srv/views"));

        chain.pop();
        assert_eq!(chain.resolve_str(VIEW_ENGINE), Some("ejs"));
    }

    #[test]
    fn test_enabled() {
        let mut settings = Settings::default();
        settings.set(X_POWERED_BY, false);
        let mut chain = SettingsChain::default();
        assert!(!chain.enabled(X_POWERED_BY));
        chain.push(Arc::new(settings));
        assert!(!chain.enabled(X_POWERED_BY));

        let mut inner = Settings::default();
        inner.set(X_POWERED_BY, true);
        chain.push(Arc::new(inner));
        assert!(chain.enabled(X_POWERED_BY));
    }
}
