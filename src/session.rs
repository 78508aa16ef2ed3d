//! In-memory session data keyed by the (hashed) session cookie id:
//! CSRF token, one-shot flash messages and old form input.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use blake3::Hasher;
use kstring::KString;
use serde_json::{Map, Value};

use crate::random_util::random_hex;

/// Session cookie name and lifetime, as handed to rouille.
pub const SESSION_COOKIE: &str = "sid";
pub const SESSION_SECONDS: u64 = 3600;

#[derive(Debug)]
pub struct SessionData {
    csrf_token: Option<String>,
    flash: Map<String, Value>,
    old: Map<String, Value>,
    last_access: Instant,
}

impl Default for SessionData {
    fn default() -> Self {
        SessionData {
            csrf_token: None,
            flash: Map::new(),
            old: Map::new(),
            last_access: Instant::now(),
        }
    }
}

#[derive(Debug)]
pub struct SessionStore {
    // Already fed with the secret; cloned per lookup.
    sessionid_hasher: Hasher,
    max_idle: Duration,
    sessions: Mutex<HashMap<KString, SessionData>>,
}

impl SessionStore {
    pub fn new(sessionid_hasher: Hasher, max_idle: Duration) -> Arc<Self> {
        Arc::new(SessionStore {
            sessionid_hasher,
            max_idle,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    fn lock(&self) -> MutexGuard<HashMap<KString, SessionData>> {
        // The data stays consistent even if a holder panicked.
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Session ids are never stored in the clear.
    fn key_for(&self, session_id: &str) -> KString {
        let mut h = self.sessionid_hasher.clone();
        h.update(session_id.as_bytes());
        KString::from_string(h.finalize().to_hex().to_string())
    }

    /// Handle for the session with the given cookie id. Also drops
    /// sessions that have been idle for too long.
    pub fn handle(self: &Arc<Self>, session_id: &str) -> SessionHandle {
        let key = self.key_for(session_id);
        let mut sessions = self.lock();
        let max_idle = self.max_idle;
        sessions.retain(|_, data| data.last_access.elapsed() <= max_idle);
        sessions.entry(key.clone()).or_default().last_access = Instant::now();
        SessionHandle { store: self.clone(), key }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Access to one session's data.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    store: Arc<SessionStore>,
    key: KString,
}

impl SessionHandle {
    fn with<R>(&self, f: impl FnOnce(&mut SessionData) -> R) -> R {
        let mut sessions = self.store.lock();
        f(sessions.entry(self.key.clone()).or_default())
    }

    /// The session's token, created on first use (64 hex characters).
    pub fn csrf_token(&self) -> String {
        self.with(|data| data.csrf_token.get_or_insert_with(|| random_hex(32)).clone())
    }

    pub fn csrf_field(&self) -> String {
        format!("<input type=\"hidden\" name=\"_token\" value=\"{}\">", self.csrf_token())
    }

    /// False if the session has no token yet or none was given.
    pub fn validate_csrf(&self, token: Option<&str>) -> bool {
        self.with(|data| match (&data.csrf_token, token) {
            (Some(stored), Some(given)) => constant_time_eq(stored.as_bytes(), given.as_bytes()),
            _ => false,
        })
    }

    pub fn old(&self, key: &str) -> Option<Value> {
        self.with(|data| data.old.get(key).cloned())
    }

    pub fn remember_old_input(&self, input: Map<String, Value>) {
        self.with(|data| data.old = input)
    }

    pub fn flash(&self, key: &str, value: Value) {
        self.with(|data| {
            data.flash.insert(key.to_string(), value);
        })
    }

    /// The flashed value, removed from the session.
    pub fn flash_get(&self, key: &str) -> Option<Value> {
        self.with(|data| data.flash.remove(key))
    }

    /// The flashed value, left in the session.
    pub fn flash_peek(&self, key: &str) -> Option<Value> {
        self.with(|data| data.flash.get(key).cloned())
    }
}

/// Comparison time depends on the lengths only, not on where the
/// contents differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
