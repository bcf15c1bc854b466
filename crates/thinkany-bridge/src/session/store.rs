//! Bounded, expiring conversation cache
//!
//! Two LRU tables behind one mutex: client session id to conversation
//! handle, and conversation handle to history. History belongs to the
//! handle, so several session ids bound to one handle read the same turns.
//! Entries expire a fixed time after their last write; expired entries read
//! as absent and are dropped lazily.

use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as TokioMutex;

use super::{ConversationId, HistoryTurn, Session, SessionId};

/// Default capacity for the conversation cache
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

#[derive(Debug)]
struct Stamped<T> {
    value: T,
    written_at: Instant,
}

impl<T> Stamped<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            written_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.written_at.elapsed() >= ttl
    }
}

#[derive(Debug)]
struct Tables {
    sessions: LruCache<SessionId, Stamped<ConversationId>>,
    histories: LruCache<ConversationId, Stamped<Vec<HistoryTurn>>>,
}

#[derive(Debug)]
pub struct ConversationStore {
    tables: TokioMutex<Tables>,
    ttl: Duration,
}

/// Live value for `key`; an expired entry is removed and reads as `None`
fn live<K, V>(cache: &mut LruCache<K, Stamped<V>>, key: &K, ttl: Duration) -> Option<V>
where
    K: Hash + Eq,
    V: Clone,
{
    let expired = match cache.get(key) {
        Some(entry) if !entry.is_expired(ttl) => return Some(entry.value.clone()),
        Some(_) => true,
        None => false,
    };
    if expired {
        cache.pop(key);
    }
    None
}

/// Insert, dropping expired entries first when a new key would evict
fn insert<K, V>(cache: &mut LruCache<K, Stamped<V>>, key: K, value: V, ttl: Duration)
where
    K: Hash + Eq + Clone,
{
    if cache.len() == cache.cap().get() && !cache.contains(&key) {
        let expired: Vec<K> = cache
            .iter()
            .filter(|(_, entry)| entry.is_expired(ttl))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            cache.pop(k);
        }
    }
    cache.put(key, Stamped::new(value));
}

impl ConversationStore {
    /// Creates a store holding at most `capacity` sessions for `ttl` each
    ///
    /// A zero capacity falls back to [`DEFAULT_MAX_SESSIONS`].
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity)
            .or(NonZeroUsize::new(DEFAULT_MAX_SESSIONS))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            tables: TokioMutex::new(Tables {
                sessions: LruCache::new(cap),
                histories: LruCache::new(cap),
            }),
            ttl,
        }
    }

    /// The session's conversation handle plus the history stored under it
    ///
    /// `None` when the session id is unknown or expired. A live handle whose
    /// history has expired comes back with an empty history.
    pub async fn get(&self, session_id: &SessionId) -> Option<Session> {
        let mut tables = self.tables.lock().await;

        let Some(conversation_id) = live(&mut tables.sessions, session_id, self.ttl) else {
            tracing::debug!("No live session {session_id}");
            return None;
        };
        let history = live(&mut tables.histories, &conversation_id, self.ttl).unwrap_or_default();

        Some(Session {
            conversation_id: Some(conversation_id),
            history,
        })
    }

    /// History stored under a conversation handle
    pub async fn history(&self, conversation_id: &ConversationId) -> Vec<HistoryTurn> {
        let mut tables = self.tables.lock().await;
        live(&mut tables.histories, conversation_id, self.ttl).unwrap_or_default()
    }

    /// Bind `session_id` to the record's handle and replace that handle's history
    ///
    /// A record without a handle has nothing to key its history by; the
    /// session binding is dropped instead.
    pub async fn put(&self, session_id: SessionId, session: Session) {
        let mut tables = self.tables.lock().await;

        let Some(conversation_id) = session.conversation_id else {
            tables.sessions.pop(&session_id);
            return;
        };

        tracing::debug!("Session {session_id} bound to conversation {conversation_id}");
        insert(
            &mut tables.histories,
            conversation_id.clone(),
            session.history,
            self.ttl,
        );
        insert(&mut tables.sessions, session_id, conversation_id, self.ttl);
    }

    /// Number of cached sessions, expired ones included until touched
    pub async fn len(&self) -> usize {
        self.tables.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.lock().await.sessions.is_empty()
    }

    pub async fn capacity(&self) -> usize {
        self.tables.lock().await.sessions.cap().get()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
