//! In-memory [`SessionStore`].

use super::store::{SessionStore, SharedState};
use crate::context::StateSnapshot;
use crate::errors::PersistenceError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// A process-local session store.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    runs: DashMap<Uuid, StateSnapshot>,
    users: DashMap<String, BTreeMap<String, Value>>,
    app: RwLock<BTreeMap<String, Value>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with `app:` entries.
    #[must_use]
    pub fn with_app_state(app: BTreeMap<String, Value>) -> Self {
        Self {
            app: RwLock::new(app),
            ..Self::default()
        }
    }

    /// Returns the number of saved runs.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Drops a saved run. Shared scopes are kept.
    pub fn forget(&self, run_id: Uuid) -> bool {
        self.runs.remove(&run_id).is_some()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, run_id: Uuid) -> Result<StateSnapshot, PersistenceError> {
        self.runs
            .get(&run_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PersistenceError::not_found(run_id))
    }

    async fn load_shared(&self, user_id: &str) -> Result<SharedState, PersistenceError> {
        Ok(SharedState {
            user: self
                .users
                .get(user_id)
                .map(|entry| entry.value().clone())
                .unwrap_or_default(),
            app: self.app.read().clone(),
        })
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<(), PersistenceError> {
        debug!(run_id = %snapshot.run_id, user_id = %snapshot.user_id, entries = snapshot.len(), "Saving session");
        self.users.insert(snapshot.user_id.clone(), snapshot.user.clone());
        *self.app.write() = snapshot.app.clone();
        self.runs.insert(snapshot.run_id, snapshot.clone());
        Ok(())
    }
}
