// Property storage shared by all refreshable entities.
//
// Each entity owns one `PropertyBag`: the mapped property values, the
// freshness tokens of the representation they came from, and the
// bookkeeping that collapses concurrent refreshes into one request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use url::Url;

use crate::model::{Milestone, Repository, User};

/// Capacity of an entity's change-notification channel. Slow
/// subscribers miss intermediate updates (`RecvError::Lagged`), never
/// block writers.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A mapped property value.
///
/// `Null` records that the server explicitly sent `null`: the property
/// is populated, just empty. Absence from the bag means "never seen",
/// which is what triggers a background refresh on read.
#[derive(Debug, Clone)]
pub enum PropertyValue {
    Null,
    Str(String),
    Int(i64),
    Bool(bool),
    Time(DateTime<Utc>),
    Url(Url),
    User(Arc<User>),
    Repository(Arc<Repository>),
    Milestone(Arc<Milestone>),
}

impl PropertyValue {
    pub fn into_str(self) -> Option<String> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_int(self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_bool(self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_time(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Time(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_url(self) -> Option<Url> {
        match self {
            Self::Url(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_user(self) -> Option<Arc<User>> {
        match self {
            Self::User(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_repository(self) -> Option<Arc<Repository>> {
        match self {
            Self::Repository(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_milestone(self) -> Option<Arc<Milestone>> {
        match self {
            Self::Milestone(value) => Some(value),
            _ => None,
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Time(a), Self::Time(b)) => a == b,
            (Self::Url(a), Self::Url(b)) => a == b,
            // Entities are canonical, so identity comparison is enough.
            (Self::User(a), Self::User(b)) => Arc::ptr_eq(a, b),
            (Self::Repository(a), Self::Repository(b)) => Arc::ptr_eq(a, b),
            (Self::Milestone(a), Self::Milestone(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Freshness tokens of the last representation applied to a bag.
#[derive(Debug, Clone, Default)]
pub(crate) struct Freshness {
    pub(crate) etag: Option<String>,
    pub(crate) last_modified: Option<DateTime<Utc>>,
}

/// Per-entity property store with change notifications and the
/// single-flight refresh state.
#[derive(Debug)]
pub(crate) struct PropertyBag {
    values: RwLock<HashMap<&'static str, PropertyValue>>,
    freshness: Mutex<Freshness>,
    /// Set when a refresh is requested, cleared when one completes
    /// successfully. A waiter that finds it cleared after taking the
    /// gate was satisfied by the refresh it waited on.
    wanted: AtomicBool,
    /// Serializes refreshes of this entity.
    gate: tokio::sync::Mutex<()>,
    changes: broadcast::Sender<&'static str>,
}

impl PropertyBag {
    pub(crate) fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: RwLock::new(HashMap::new()),
            freshness: Mutex::new(Freshness::default()),
            wanted: AtomicBool::new(false),
            gate: tokio::sync::Mutex::new(()),
            changes,
        }
    }

    /// Current value of a property, or `None` when it was never mapped.
    pub(crate) fn get(&self, name: &str) -> Option<PropertyValue> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Store a value, notifying subscribers when it actually changed.
    pub(crate) fn set(&self, name: &'static str, value: PropertyValue) {
        let changed = {
            let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
            match values.get(name) {
                Some(existing) if *existing == value => false,
                _ => {
                    values.insert(name, value);
                    true
                }
            }
        };
        if changed {
            let _ = self.changes.send(name);
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<&'static str> {
        self.changes.subscribe()
    }

    pub(crate) fn freshness(&self) -> Freshness {
        self.freshness
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_freshness(&self, etag: Option<String>, last_modified: Option<DateTime<Utc>>) {
        let mut freshness = self
            .freshness
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        freshness.etag = etag;
        freshness.last_modified = last_modified;
    }

    // ── Single-flight refresh state ─────────────────────────────────

    pub(crate) fn request_refresh(&self) {
        self.wanted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn refresh_wanted(&self) -> bool {
        self.wanted.load(Ordering::SeqCst)
    }

    pub(crate) fn refresh_done(&self) {
        self.wanted.store(false, Ordering::SeqCst);
    }

    pub(crate) fn gate(&self) -> &tokio::sync::Mutex<()> {
        &self.gate
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn absent_and_null_are_distinct() {
        let bag = PropertyBag::new();

        assert!(bag.get("email").is_none());

        bag.set("email", PropertyValue::Null);
        assert_eq!(bag.get("email"), Some(PropertyValue::Null));
    }

    #[test]
    fn set_notifies_only_on_change() {
        let bag = PropertyBag::new();
        let mut changes = bag.subscribe();

        bag.set("name", PropertyValue::Str("Octo".into()));
        bag.set("name", PropertyValue::Str("Octo".into()));
        bag.set("name", PropertyValue::Str("Cat".into()));

        assert_eq!(changes.try_recv().unwrap(), "name");
        assert_eq!(changes.try_recv().unwrap(), "name");
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn freshness_round_trips() {
        let bag = PropertyBag::new();

        bag.set_freshness(Some("\"abc\"".into()), None);
        let freshness = bag.freshness();

        assert_eq!(freshness.etag.as_deref(), Some("\"abc\""));
        assert!(freshness.last_modified.is_none());
    }
}
