//! Per-request session view with explicit mutation tracking.
//!
//! Every mutation flags the view dirty and writes through to the store,
//! allocating an id on the first write to an anonymous session. Cookie
//! emission is queued in a single slot drained at commit, so one request
//! produces at most one session `Set-Cookie` reflecting the final state.
//!
//! Only the request that allocated an id inserts its record. Every other
//! access updates or renews the stored record in place, so a view whose
//! record was destroyed by another request goes stale instead of
//! recreating it, and a view that only reads never writes data back.

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::SessionConfig;
use crate::session::cookie;
use crate::session::store::{SessionRecord, SessionStore};

/// Cookie action queued for commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingCookie {
    Issue,
    Expire,
}

/// The session bound to one request.
#[derive(Debug)]
pub struct Session {
    id: Option<String>,
    data: Map<String, Value>,
    dirty: bool,
    pending: Option<PendingCookie>,
    store: SessionStore,
    config: Arc<SessionConfig>,
}

impl Session {
    /// A session with no id and no data.
    pub(crate) fn anonymous(store: SessionStore, config: Arc<SessionConfig>) -> Self {
        Self {
            id: None,
            data: Map::new(),
            dirty: false,
            pending: None,
            store,
            config,
        }
    }

    /// Resume a stored session. Its expiry is renewed and its cookie re-issued.
    pub(crate) fn resume(
        id: String,
        record: SessionRecord,
        store: SessionStore,
        config: Arc<SessionConfig>,
    ) -> Self {
        let mut session = Self {
            id: Some(id),
            data: record.data,
            dirty: false,
            pending: None,
            store,
            config,
        };
        session.ensure_record();
        if session.id.is_some() {
            session.pending = Some(PendingCookie::Issue);
        }
        session
    }

    /// The session id, once one has been issued.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Whether a mutation happened since the last `save`.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Deserialize a stored value; `None` when absent or of another shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    /// Store a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
        self.mark_dirty();
    }

    /// Store any serializable value.
    pub fn insert<T: Serialize + ?Sized>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.set(key, value);
        Ok(())
    }

    /// Delete a key. Counts as a mutation even when the key was absent.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.data.remove(key);
        self.mark_dirty();
        removed
    }

    /// Renew expiry and re-issue the cookie.
    pub fn touch(&mut self) {
        self.ensure_record();
        if self.id.is_some() {
            self.pending = Some(PendingCookie::Issue);
        }
    }

    /// Persist now. The cookie is re-issued when dirty or when `resave` is set.
    pub fn save(&mut self) {
        self.ensure_record();
        if self.id.is_some() && (self.config.resave || self.dirty) {
            self.pending = Some(PendingCookie::Issue);
        }
        self.dirty = false;
    }

    /// Evict the record, clear all data and expire the cookie.
    pub fn destroy(&mut self) {
        if let Some(id) = self.id.take() {
            self.store.remove(&id);
            self.pending = Some(PendingCookie::Expire);
            tracing::debug!(session_id = %id, "Session destroyed");
        }
        self.data.clear();
        self.dirty = false;
    }

    /// Replace the session with a fresh, stored, empty one under a new id.
    pub fn regenerate(&mut self) {
        if let Some(old) = self.id.take() {
            self.store.remove(&old);
        }
        self.data.clear();
        self.dirty = false;
        self.allocate();
    }

    /// Final persistence before the response is flushed. Returns the
    /// session `Set-Cookie` value, if one is due.
    pub(crate) fn commit(&mut self) -> Option<String> {
        if self.id.is_some() || self.config.save_uninitialized {
            self.ensure_record();
        }

        match self.pending.take()? {
            PendingCookie::Issue => {
                let id = self.id.as_deref()?;
                Some(cookie::serialize(&self.config.name, id, &self.config.cookie))
            }
            PendingCookie::Expire => Some(cookie::expire(&self.config.name)),
        }
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        let Some(id) = self.id.clone() else {
            self.allocate();
            return;
        };
        if self.store.update(&id, &self.data, self.config.ttl()) {
            if self.config.rolling {
                self.pending = Some(PendingCookie::Issue);
            }
        } else {
            self.detach(&id);
        }
    }

    /// Allocate a record for an anonymous view, or renew the existing one.
    fn ensure_record(&mut self) {
        let Some(id) = self.id.clone() else {
            self.allocate();
            return;
        };
        if self.store.renew(&id, self.config.ttl()) {
            if self.config.rolling {
                self.pending = Some(PendingCookie::Issue);
            }
        } else {
            self.detach(&id);
        }
    }

    /// Issue a fresh id and insert the current data under it.
    fn allocate(&mut self) {
        let id = generate_id();
        tracing::debug!(session_id = %id, "Session issued");
        self.store.insert(
            id.clone(),
            SessionRecord::new(self.data.clone(), self.config.ttl()),
        );
        self.id = Some(id);
        self.pending = Some(PendingCookie::Issue);
    }

    /// The stored record vanished under this view (destroyed, rotated or
    /// expired elsewhere). Drop everything it still holds.
    fn detach(&mut self, id: &str) {
        tracing::debug!(session_id = %id, "Session record gone; dropping stale view");
        self.id = None;
        self.data.clear();
        self.dirty = false;
        self.pending = None;
    }
}

/// 128 random bits from the OS, lowercase hex.
pub(crate) fn generate_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> Arc<SessionConfig> {
        Arc::new(SessionConfig::default())
    }

    fn anonymous(store: &SessionStore) -> Session {
        Session::anonymous(store.clone(), config())
    }

    #[test]
    fn test_generate_id_shape() {
        let id = generate_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, generate_id());
    }

    #[test]
    fn test_untouched_anonymous_session_emits_nothing() {
        let store = SessionStore::new();
        let mut session = anonymous(&store);
        assert!(session.get("user").is_none());
        assert!(session.commit().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_first_write_issues_id() {
        let store = SessionStore::new();
        let mut session = anonymous(&store);
        session.set("user", "ana");

        let id = session.id().unwrap().to_string();
        assert!(session.is_dirty());
        assert_eq!(store.get(&id).unwrap().data["user"], "ana");

        let cookie = session.commit().unwrap();
        assert!(cookie.starts_with(&format!("sid={id}; Path=/; Max-Age=1800")));
        assert!(session.commit().is_none());
    }

    #[test]
    fn test_touch_twice_queues_one_cookie() {
        let store = SessionStore::new();
        let mut session = anonymous(&store);
        session.set("user", "ana");
        session.touch();
        session.touch();
        assert!(session.commit().is_some());
        assert!(session.commit().is_none());
    }

    #[test]
    fn test_insert_and_get_as() {
        #[derive(Serialize, serde::Deserialize, Debug, PartialEq)]
        struct User {
            name: String,
            admin: bool,
        }

        let store = SessionStore::new();
        let mut session = anonymous(&store);
        let user = User { name: "Ana".into(), admin: true };
        session.insert("user", &user).unwrap();

        assert_eq!(session.get_as::<User>("user"), Some(user));
        assert_eq!(session.get_as::<u32>("user"), None);
        assert!(session.contains("user"));
        assert_eq!(session.keys().collect::<Vec<_>>(), vec!["user"]);
    }

    #[test]
    fn test_remove_marks_dirty() {
        let store = SessionStore::new();
        let mut session = anonymous(&store);
        assert!(session.remove("missing").is_none());
        assert!(session.is_dirty());
        assert!(session.id().is_some());
    }

    #[test]
    fn test_save_clears_dirty() {
        let store = SessionStore::new();
        let mut session = anonymous(&store);
        session.set("a", 1);
        session.save();
        assert!(!session.is_dirty());
        assert!(session.commit().is_some());
    }

    #[test]
    fn test_destroy_expires_cookie() {
        let store = SessionStore::new();
        let mut session = anonymous(&store);
        session.set("user", "ana");
        let id = session.id().unwrap().to_string();

        session.destroy();
        assert!(session.id().is_none());
        assert!(session.is_empty());
        assert!(!store.contains(&id));
        assert_eq!(session.commit().as_deref(), Some("sid=; Path=/; Max-Age=0"));
    }

    #[test]
    fn test_write_after_destroy_issues_new_id() {
        let store = SessionStore::new();
        let mut session = anonymous(&store);
        session.set("user", "ana");
        let first = session.id().unwrap().to_string();
        session.destroy();
        session.set("user", "bo");

        let second = session.id().unwrap().to_string();
        assert_ne!(first, second);
        let cookie = session.commit().unwrap();
        assert!(cookie.starts_with(&format!("sid={second};")));
    }

    #[test]
    fn test_regenerate_stores_fresh_record() {
        let store = SessionStore::new();
        let mut session = anonymous(&store);
        session.set("state", "xyz");
        let old = session.id().unwrap().to_string();

        session.regenerate();
        let new = session.id().unwrap().to_string();
        assert_ne!(old, new);
        assert!(!store.contains(&old));
        assert!(store.get(&new).unwrap().data.is_empty());
        assert!(session.get("state").is_none());

        session.set("user", json!({ "name": "Ana" }));
        assert_eq!(store.get(&new).unwrap().data["user"]["name"], "Ana");
    }

    #[test]
    fn test_resume_reissues_cookie() {
        let store = SessionStore::new();
        let mut data = Map::new();
        data.insert("user".into(), json!("ana"));
        store.insert("abc".into(), SessionRecord::new(data, std::time::Duration::from_secs(5)));

        let record = store.load("abc").unwrap();
        let mut session = Session::resume("abc".into(), record, store.clone(), config());
        assert_eq!(session.get("user").unwrap(), "ana");
        assert!(session.commit().unwrap().starts_with("sid=abc;"));
    }

    fn resumed(store: &SessionStore, id: &str) -> Session {
        let record = store.load(id).unwrap();
        Session::resume(id.into(), record, store.clone(), config())
    }

    fn stored(store: &SessionStore, id: &str, user: &str) {
        let mut data = Map::new();
        data.insert("user".into(), json!(user));
        store.insert(id.into(), SessionRecord::new(data, std::time::Duration::from_secs(60)));
    }

    #[test]
    fn test_stale_view_does_not_recreate_destroyed_record() {
        let store = SessionStore::new();
        stored(&store, "abc", "ana");
        let mut logout = resumed(&store, "abc");
        let mut slow = resumed(&store, "abc");

        logout.destroy();
        assert!(logout.commit().is_some());

        assert!(slow.commit().is_none());
        assert!(!store.contains("abc"));
        assert!(slow.id().is_none());
        assert!(slow.get("user").is_none());
    }

    #[test]
    fn test_write_to_destroyed_record_is_dropped() {
        let store = SessionStore::new();
        stored(&store, "abc", "ana");
        let mut logout = resumed(&store, "abc");
        let mut slow = resumed(&store, "abc");

        logout.destroy();
        slow.set("cart", 3);
        assert!(slow.id().is_none());
        assert!(store.is_empty());
        assert!(slow.commit().is_none());
    }

    #[test]
    fn test_read_only_view_keeps_concurrent_write() {
        let store = SessionStore::new();
        stored(&store, "abc", "ana");
        let mut writer = resumed(&store, "abc");
        let mut reader = resumed(&store, "abc");

        writer.set("cart", 3);
        assert!(writer.commit().is_some());
        assert!(reader.commit().is_some());
        assert_eq!(store.get("abc").unwrap().data["cart"], 3);
    }

    #[test]
    fn test_save_uninitialized_creates_session_at_commit() {
        let store = SessionStore::new();
        let config = Arc::new(SessionConfig {
            save_uninitialized: true,
            ..SessionConfig::default()
        });
        let mut session = Session::anonymous(store.clone(), config);
        assert!(session.commit().is_some());
        assert_eq!(store.len(), 1);
    }
}
