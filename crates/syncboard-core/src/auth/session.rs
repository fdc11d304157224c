use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::store::{DurableStore, MemoryStore, TOKEN_KEY, USER_KEY};

/// Opaque bearer token. Never empty; never parsed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Returns `None` for an empty token
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// The authenticated principal as the server described it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(Value);

impl Identity {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Build from any serializable record, e.g. a `UserProfile`
    pub fn from_record<T: Serialize>(record: &T) -> serde_json::Result<Self> {
        serde_json::to_value(record).map(Self)
    }

    /// Decode into a concrete record type
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.0.clone())
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// The credential and identity pair. An identity cannot exist without a
/// credential because the store only ever holds `Option<Session>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub credential: Credential,
    pub identity: Option<Identity>,
}

/// Single source of truth for the current session.
///
/// Mutations go through `set_session`/`clear_session`, which replace the
/// pair together, and `update_identity`, which only touches the identity of
/// a session whose credential it has checked. Every mutation is mirrored to the durable
/// store on a best-effort basis: failures are logged and never reach the
/// caller.
pub struct SessionStore {
    session: RwLock<Option<Session>>,
    /// Serializes whole mutations (memory, signal, then durable mirror)
    mutation: Mutex<()>,
    signal: watch::Sender<bool>,
    store: Arc<dyn DurableStore>,
}

impl SessionStore {
    /// Rehydrate the session from the durable store.
    ///
    /// Missing or unreadable entries yield an empty session; a user entry
    /// that is not valid JSON is dropped. Nothing is written back.
    pub fn initialize(store: Arc<dyn DurableStore>) -> Self {
        let session = Self::load(store.as_ref());
        debug!(
            authenticated = session.is_some(),
            has_identity = session.as_ref().is_some_and(|s| s.identity.is_some()),
            "Session loaded"
        );

        let (signal, _) = watch::channel(session.is_some());
        Self {
            session: RwLock::new(session),
            mutation: Mutex::new(()),
            signal,
            store,
        }
    }

    /// A session store whose mirror lives only in process memory
    pub fn ephemeral() -> Self {
        Self::initialize(Arc::new(MemoryStore::new()))
    }

    fn load(store: &dyn DurableStore) -> Option<Session> {
        let token = match store.get(TOKEN_KEY) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read stored token, starting signed out");
                None
            }
        };
        let credential = Credential::new(token?)?;

        let identity = match store.get(USER_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Null) => None,
                Ok(value) => Some(Identity(value)),
                Err(e) => {
                    warn!(error = %e, "Stored user is not valid JSON, ignoring it");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read stored user");
                None
            }
        };

        Some(Session {
            credential,
            identity,
        })
    }

    /// Replace the session. An empty credential clears it instead.
    pub fn set_session(&self, credential: &str, identity: Option<Identity>) {
        let Some(credential) = Credential::new(credential) else {
            debug!("Empty credential supplied, clearing session");
            self.clear_session();
            return;
        };

        let _guard = self.mutation.lock();
        let session = Session {
            credential,
            identity,
        };
        let persisted = session.clone();
        self.replace(Some(session));

        if !self.persist(|store| store.set(TOKEN_KEY, persisted.credential.as_str())) {
            // Never leave a previous login's entries next to a missing token
            self.persist(|store| store.remove(TOKEN_KEY));
            self.persist(|store| store.remove(USER_KEY));
        } else {
            self.persist_identity(persisted.identity.as_ref());
        }
        debug!("Session set");
    }

    /// Replace the identity of the current session, but only while `expected`
    /// is still its credential. Returns false when the session changed.
    pub fn update_identity(&self, expected: &Credential, identity: Option<Identity>) -> bool {
        let _guard = self.mutation.lock();
        {
            let mut session = self.session.write();
            match session.as_mut() {
                Some(current) if current.credential == *expected => {
                    current.identity = identity.clone();
                }
                _ => {
                    debug!("Session changed, discarding identity update");
                    return false;
                }
            }
        }
        self.persist_identity(identity.as_ref());
        true
    }

    /// Drop the session and remove both durable entries
    pub fn clear_session(&self) {
        let _guard = self.mutation.lock();
        self.replace(None);
        self.persist(|store| store.remove(TOKEN_KEY));
        self.persist(|store| store.remove(USER_KEY));
        debug!("Session cleared");
    }

    /// Caller-facing name for `set_session`
    pub fn login(&self, credential: &str, identity: Option<Identity>) {
        self.set_session(credential, identity);
    }

    /// Caller-facing name for `clear_session`
    pub fn logout(&self) {
        self.clear_session();
    }

    pub fn credential(&self) -> Option<Credential> {
        self.session.read().as_ref().map(|s| s.credential.clone())
    }

    pub fn identity(&self) -> Option<Identity> {
        self.session.read().as_ref().and_then(|s| s.identity.clone())
    }

    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        *self.signal.borrow()
    }

    /// Observe the authentication signal. Receivers are notified only when
    /// the value flips, and never before the new credential is readable.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    fn replace(&self, next: Option<Session>) {
        let authenticated = next.is_some();
        *self.session.write() = next;
        // Published after the write guard is released, still under `mutation`:
        // the credential is readable before any subscriber is notified, and a
        // receiver holding a borrow never waits on the session lock.
        self.signal.send_if_modified(|current| {
            let changed = *current != authenticated;
            *current = authenticated;
            changed
        });
    }

    /// Mirror the identity. A failed write removes the entry so a restart
    /// never pairs the new token with an older user record.
    fn persist_identity(&self, identity: Option<&Identity>) {
        match identity {
            Some(identity) => {
                let written = self.persist(|store| {
                    let raw = serde_json::to_string(identity)?;
                    store.set(USER_KEY, &raw)
                });
                if !written {
                    self.persist(|store| store.remove(USER_KEY));
                }
            }
            None => {
                self.persist(|store| store.remove(USER_KEY));
            }
        }
    }

    /// Returns whether the operation succeeded
    fn persist<F>(&self, op: F) -> bool
    where
        F: FnOnce(&dyn DurableStore) -> anyhow::Result<()>,
    {
        match op(self.store.as_ref()) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to persist session, keeping in-memory state");
                false
            }
        }
    }
}
