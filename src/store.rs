//! Persistent local store: a thin key-value seam plus the typed credential
//! wrapper built on top of it.
//!
//! Hosts back [`KeyValueStore`] with whatever the platform offers
//! (browser local storage, a settings file); [`MemoryStore`] is the
//! reference implementation and the test double.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use ulid::Ulid;

use crate::types::TokenPair;

const ACCESS_TOKEN_KEY: &str = "accessToken";
const REFRESH_TOKEN_KEY: &str = "refreshToken";
const ANON_USER_ID_KEY: &str = "unique_user_id";

/// One observed store mutation. `value: None` means the key was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub key: String,
    pub value: Option<String>,
}

/// Synchronous key-value persistence.
///
/// Reads and writes are assumed non-blocking and are not atomic across
/// multiple keys; callers key their invariants on single-key membership
/// checks. The change feed carries writes from every context sharing the
/// backing store, including this one (same-context writes must be reported
/// because the native cross-context notification does not cover them).
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
    /// Subscribe to the store's change notifications.
    fn changes(&self) -> broadcast::Receiver<StoreChange>;
}

/// In-memory [`KeyValueStore`].
pub struct MemoryStore {
    inner: RwLock<HashMap<String, String>>,
    tx: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            inner: RwLock::new(HashMap::new()),
            tx,
        }
    }

    fn notify(&self, key: &str, value: Option<&str>) {
        let _ = self.tx.send(StoreChange {
            key: key.to_owned(),
            value: value.map(str::to_owned),
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_owned(), value.to_owned());
        self.notify(key, Some(value));
    }

    fn remove(&self, key: &str) {
        let removed = self
            .inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        if removed.is_some() {
            self.notify(key, None);
        }
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.tx.subscribe()
    }
}

/// Typed wrapper owning the credential keys and the anonymous guest id.
///
/// Cheap to clone; all clones share the backing store.
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.store.get(ACCESS_TOKEN_KEY)
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.store.get(REFRESH_TOKEN_KEY)
    }

    /// Whether any session credential exists at all. A 401 received with no
    /// credential stored is a plain API error, not a refresh trigger.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.access_token().is_some() || self.refresh_token().is_some()
    }

    /// Persist a rotated credential pair (login or refresh success).
    pub fn store_pair(&self, pair: &TokenPair) {
        self.store.set(ACCESS_TOKEN_KEY, &pair.access_token);
        self.store.set(REFRESH_TOKEN_KEY, &pair.refresh_token);
    }

    /// Drop only the access credential (known expired, refresh pending).
    pub fn clear_access_token(&self) {
        self.store.remove(ACCESS_TOKEN_KEY);
    }

    /// Drop both credentials. The anonymous user id is never destroyed.
    pub fn clear(&self) {
        self.store.remove(ACCESS_TOKEN_KEY);
        self.store.remove(REFRESH_TOKEN_KEY);
    }

    /// Stable locally generated identifier, created lazily on first use.
    /// Namespaces guest progress data when no server account exists.
    #[must_use]
    pub fn anonymous_user_id(&self) -> String {
        if let Some(id) = self.store.get(ANON_USER_ID_KEY) {
            return id;
        }
        let id = format!("guest_{}", Ulid::new());
        self.store.set(ANON_USER_ID_KEY, &id);
        id
    }

    /// The untyped store underneath, for components owning their own keys.
    #[must_use]
    pub fn raw(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }
}
