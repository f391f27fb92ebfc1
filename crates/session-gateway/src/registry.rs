//! In-memory registry of live sessions
//!
//! The registry is the single source of truth for which sessions exist.
//! Each entry pairs the session's metadata with the handles needed to
//! reach it: a bounded outbound channel drained by the session's writer
//! task and a close channel that tells the reader loop to exit.

use crate::error::{Error, Result};
use crate::models::{SessionInfo, SessionMessage};
use chrono::Utc;
use futures::lock::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::warn;
use tungstenite::Message;
use uuid::Uuid;

/// Per-session handles held by the registry
#[derive(Debug, Clone)]
pub(crate) struct SessionHandle {
    /// Session metadata
    pub info: SessionInfo,
    /// Outbound frames, drained by the session's writer task
    pub sender: async_channel::Sender<Message>,
    /// Closing this channel makes the reader loop exit
    pub closer: async_channel::Sender<()>,
}

/// Registry of connected sessions
///
/// Cheap to clone; all clones share the same session table.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: std::sync::Arc<Mutex<HashMap<Uuid, SessionHandle>>>,
    count: std::sync::Arc<AtomicUsize>,
    max_sessions: Option<usize>,
}

impl SessionRegistry {
    /// Create a registry with an optional capacity limit
    pub fn new(max_sessions: Option<usize>) -> Self {
        Self {
            sessions: Default::default(),
            count: Default::default(),
            max_sessions,
        }
    }

    /// Register a session, enforcing the capacity limit
    pub(crate) async fn insert(&self, handle: SessionHandle) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        if let Some(max) = self.max_sessions {
            if sessions.len() >= max {
                return Err(Error::CapacityExceeded);
            }
        }
        sessions.insert(handle.info.id, handle);
        self.count.store(sessions.len(), Ordering::SeqCst);
        Ok(())
    }

    /// Remove a session; `None` when it was already gone
    pub(crate) async fn remove(&self, id: Uuid) -> Option<SessionHandle> {
        let mut sessions = self.sessions.lock().await;
        let removed = sessions.remove(&id);
        self.count.store(sessions.len(), Ordering::SeqCst);
        removed
    }

    /// Advance a session's last-seen timestamp to now
    pub async fn touch(&self, id: Uuid) {
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get_mut(&id) {
            handle.info.last_seen_at = Utc::now();
        }
    }

    /// Snapshot of one session's metadata
    pub async fn get(&self, id: Uuid) -> Option<SessionInfo> {
        self.sessions.lock().await.get(&id).map(|h| h.info.clone())
    }

    /// Snapshot of every session's metadata
    pub async fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .lock()
            .await
            .values()
            .map(|h| h.info.clone())
            .collect()
    }

    /// Current session count; does not take the lock
    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Whether no sessions are connected
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of sessions whose last activity is older than `idle_timeout`
    pub async fn idle_sessions(&self, idle_timeout: Duration) -> Vec<Uuid> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(idle_timeout).unwrap_or(chrono::Duration::MAX);
        self.sessions
            .lock()
            .await
            .values()
            .filter(|h| h.info.last_seen_at < cutoff)
            .map(|h| h.info.id)
            .collect()
    }

    /// Queue a message on every matching session's outbound channel
    ///
    /// `exclude` filters sessions out; `only`, when given, restricts the
    /// target set first. Returns the ids of sessions whose outbound
    /// channel rejected the frame (full or closed); the caller decides
    /// whether to evict them.
    pub async fn broadcast(
        &self,
        message: &SessionMessage,
        exclude: &[Uuid],
        only: Option<&[Uuid]>,
    ) -> Result<Vec<Uuid>> {
        let json = serde_json::to_string(message)?;
        let sessions = self.sessions.lock().await;
        let mut failed = Vec::new();
        for (id, handle) in sessions.iter() {
            if exclude.contains(id) {
                continue;
            }
            if let Some(only) = only {
                if !only.contains(id) {
                    continue;
                }
            }
            if let Err(e) = handle.sender.try_send(Message::Text(json.clone().into())) {
                warn!(session_id = %id, error = %e, "failed to queue outbound message");
                failed.push(*id);
            }
        }
        Ok(failed)
    }

    /// Queue a message on one session's outbound channel
    pub async fn send_to_one(&self, id: Uuid, message: &SessionMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        let sessions = self.sessions.lock().await;
        let handle = sessions.get(&id).ok_or(Error::SessionNotFound(id))?;
        handle
            .sender
            .try_send(Message::Text(json.into()))
            .map_err(|_| Error::SessionNotFound(id))?;
        Ok(())
    }
}
