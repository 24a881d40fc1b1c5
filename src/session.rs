//! In-memory conversation history.
//!
//! Sessions are keyed by an opaque identifier (a v4 UUID when minted here)
//! and live for the lifetime of the process. Each session has its own
//! lock, so appends to one conversation are serialized without blocking
//! any other.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::models::Exchange;

type History = Arc<Mutex<Vec<Exchange>>>;

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, History>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a session, creating it when needed. A missing or blank id
    /// mints a fresh one; an id that is not known yet starts an empty
    /// history under that id. Returns the id and a snapshot of its history.
    pub async fn get_or_create(&self, session_id: Option<&str>) -> (String, Vec<Exchange>) {
        let id = match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let history = self.slot(&id).await;
        let snapshot = history.lock().await.clone();
        (id, snapshot)
    }

    /// Add one exchange to the end of the session's history.
    pub async fn append(&self, session_id: &str, question: &str, answer: &str) {
        let history = self.slot(session_id).await;
        history.lock().await.push(Exchange {
            question: question.to_string(),
            answer: answer.to_string(),
        });
    }

    pub async fn history(&self, session_id: &str) -> Option<Vec<Exchange>> {
        let history = self.sessions.read().await.get(session_id).cloned()?;
        let snapshot = history.lock().await.clone();
        Some(snapshot)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    async fn slot(&self, id: &str) -> History {
        if let Some(history) = self.sessions.read().await.get(id) {
            return Arc::clone(history);
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(id.to_string()).or_default())
    }
}
