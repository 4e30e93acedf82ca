//! The [`SessionStore`] trait.

use crate::context::StateSnapshot;
use crate::errors::PersistenceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// State shared beyond one run: a principal's `user:` scope and the `app:`
/// scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    /// `user:` entries of the principal.
    #[serde(default)]
    pub user: BTreeMap<String, Value>,
    /// `app:` entries.
    #[serde(default)]
    pub app: BTreeMap<String, Value>,
}

/// External collaborator that persists run state between invocations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads the snapshot saved for a run.
    ///
    /// Returns [`PersistenceError::NotFound`] if the run was never saved.
    async fn load(&self, run_id: Uuid) -> Result<StateSnapshot, PersistenceError>;

    /// Loads the latest user scope of a principal and the app scope.
    async fn load_shared(&self, user_id: &str) -> Result<SharedState, PersistenceError>;

    /// Persists a snapshot, replacing the run's session scope and the shared
    /// scopes it carries.
    async fn save(&self, snapshot: &StateSnapshot) -> Result<(), PersistenceError>;
}
