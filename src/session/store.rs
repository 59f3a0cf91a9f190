//! In-memory session state store.
//!
//! Sessions live behind a per-key async mutex. Holding the lock of one
//! session serializes every mutation of that session (a whole routing chain
//! runs under it), while different keys never contend: the outer map is a
//! sharded [`DashMap`] whose guard is released before any await point.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use super::message::Message;
use crate::error::{DispatchError, DispatchResult};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One logical conversation: an append-only transcript plus named context
/// variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    key: String,
    messages: Vec<Message>,
    context: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            messages: Vec::new(),
            context: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The transcript, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    pub fn get_context(&self, name: &str) -> Option<&str> {
        self.context.get(name).map(String::as_str)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Append a message; returns its position in the transcript.
    pub fn append(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.updated_at = Utc::now();
        self.messages.len() - 1
    }

    pub fn set_context(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.context.insert(name.into(), value.into());
        self.updated_at = Utc::now();
    }

    /// Apply one routing step: the message and its context updates land together.
    pub fn commit_step(
        &mut self,
        message: Message,
        context_updates: impl IntoIterator<Item = (String, String)>,
    ) -> usize {
        for (name, value) in context_updates {
            self.context.insert(name, value);
        }
        self.append(message)
    }

    /// Messages appended at or after `position`.
    pub fn messages_since(&self, position: usize) -> &[Message] {
        let start = position.min(self.messages.len());
        &self.messages[start..]
    }
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Shared, lockable reference to one session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Acquire exclusive access; concurrent callers queue in FIFO order.
    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().await
    }

    /// Owned copy of the current state.
    pub async fn snapshot(&self) -> Session {
        self.inner.lock().await.clone()
    }
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Keyed collection of sessions.
///
/// Sessions are created on first use and are only removed by an explicit
/// [`SessionStore::evict`].
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, SessionHandle>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session for `session_key`, creating an empty one if needed.
    ///
    /// Never fails.
    pub fn get_or_create(&self, session_key: &str) -> SessionHandle {
        if let Some(existing) = self.sessions.get(session_key) {
            return existing.value().clone();
        }
        self.sessions
            .entry(session_key.to_string())
            .or_insert_with(|| {
                log::debug!("Creating session '{}'", session_key);
                SessionHandle::new(Session::new(session_key))
            })
            .value()
            .clone()
    }

    /// Strict lookup: fails with `NotFound` if the session was never created.
    pub fn get(&self, session_key: &str) -> DispatchResult<SessionHandle> {
        self.sessions
            .get(session_key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DispatchError::NotFound {
                session_key: session_key.to_string(),
            })
    }

    /// Strict snapshot of a session.
    pub async fn snapshot(&self, session_key: &str) -> DispatchResult<Session> {
        let handle = self.get(session_key)?;
        Ok(handle.snapshot().await)
    }

    pub async fn append_message(&self, session_key: &str, message: Message) -> usize {
        let handle = self.get_or_create(session_key);
        let mut session = handle.lock().await;
        session.append(message)
    }

    pub async fn set_context(&self, session_key: &str, name: &str, value: &str) {
        let handle = self.get_or_create(session_key);
        let mut session = handle.lock().await;
        session.set_context(name, value);
    }

    /// Read a context variable; absent sessions simply have no context.
    pub async fn get_context(&self, session_key: &str, name: &str) -> Option<String> {
        let handle = self.sessions.get(session_key).map(|e| e.value().clone())?;
        let session = handle.lock().await;
        session.get_context(name).map(str::to_string)
    }

    /// Drop a session. Holders of an existing handle keep their copy alive.
    ///
    /// A request routing on the evicted handle keeps writing to that copy,
    /// and the next request on the key starts a fresh session alongside it.
    /// Callers with in-flight tracking should refuse eviction instead; see
    /// `ChatService::evict`.
    pub fn evict(&self, session_key: &str) -> bool {
        self.sessions.remove(session_key).is_some()
    }

    pub fn contains(&self, session_key: &str) -> bool {
        self.sessions.contains_key(session_key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sorted session keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use futures::future::join_all;

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = SessionStore::new();
        let a = store.get_or_create("s1");
        a.lock().await.append(Message::user("hello"));

        let b = store.get_or_create("s1");
        assert_eq!(b.snapshot().await.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_strict_get_fails_for_unknown_session() {
        let store = SessionStore::new();
        let err = store.get("nope").unwrap_err();
        assert_eq!(
            err,
            DispatchError::NotFound {
                session_key: "nope".into()
            }
        );
        tokio_test::assert_err!(store.snapshot("nope").await);
    }

    #[tokio::test]
    async fn test_context_is_scoped_to_session() {
        let store = SessionStore::new();
        store.set_context("a", "selected_triangle", "raa").await;
        store.set_context("b", "selected_triangle", "abc").await;

        assert_eq!(
            store.get_context("a", "selected_triangle").await.as_deref(),
            Some("raa")
        );
        assert_eq!(
            store.get_context("b", "selected_triangle").await.as_deref(),
            Some("abc")
        );
        assert_eq!(store.get_context("a", "missing").await, None);
        assert_eq!(store.get_context("ghost", "selected_triangle").await, None);
        assert!(!store.contains("ghost"));
    }

    #[tokio::test]
    async fn test_sequential_appends_keep_order() {
        let store = SessionStore::new();
        for i in 0..50 {
            let pos = store.append_message("s", Message::user(format!("m{}", i))).await;
            assert_eq!(pos, i);
        }
        let session = store.snapshot("s").await.unwrap();
        let contents: Vec<_> = session.messages().iter().map(|m| m.content.clone()).collect();
        let expected: Vec<_> = (0..50).map(|i| format!("m{}", i)).collect();
        assert_eq!(contents, expected);
    }

    #[tokio::test]
    async fn test_commit_step_applies_message_and_context_together() {
        let mut session = Session::new("s");
        let pos = session.commit_step(
            Message::assistant("loaded").with_capability("data_agent"),
            vec![("selected_triangle".to_string(), "genins".to_string())],
        );
        assert_eq!(pos, 0);
        assert_eq!(session.get_context("selected_triangle"), Some("genins"));
        assert_eq!(session.messages()[0].capability(), Some("data_agent"));
        assert_eq!(session.messages_since(1).len(), 0);
        assert_eq!(session.messages_since(0)[0].role, Role::Assistant);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_match_a_serial_interleaving() {
        let store = Arc::new(SessionStore::new());
        let writers = 8;
        let per_writer = 100;

        let tasks = (0..writers).map(|w| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for i in 0..per_writer {
                    store
                        .append_message("shared", Message::user(format!("{}:{}", w, i)))
                        .await;
                    if i % 10 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        });
        for result in join_all(tasks).await {
            result.unwrap();
        }

        let session = store.snapshot("shared").await.unwrap();
        assert_eq!(session.len(), writers * per_writer);

        // Each writer's own messages must appear in the order it produced them,
        // and nothing may be lost or duplicated.
        let mut next_expected = vec![0usize; writers];
        for msg in session.messages() {
            let (w, i) = msg.content.split_once(':').unwrap();
            let w: usize = w.parse().unwrap();
            let i: usize = i.parse().unwrap();
            assert_eq!(i, next_expected[w], "writer {} out of order", w);
            next_expected[w] += 1;
        }
        assert!(next_expected.iter().all(|&n| n == per_writer));
    }

    #[tokio::test]
    async fn test_evict_removes_session() {
        let store = SessionStore::new();
        store.append_message("gone", Message::user("x")).await;
        assert!(store.evict("gone"));
        assert!(!store.evict("gone"));
        assert!(store.get("gone").is_err());
        assert_eq!(store.keys(), Vec::<String>::new());
    }
}
