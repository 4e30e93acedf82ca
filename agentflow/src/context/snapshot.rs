//! Persistable snapshots of the state store.

use super::identity::RunIdentity;
use super::scope::StateScope;
use super::store::StateStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// The persistent scopes of a run's state, captured at one point in time.
///
/// Temporary keys are never captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// The run the session scope belongs to.
    pub run_id: Uuid,
    /// The principal the user scope belongs to.
    pub user_id: String,
    /// Session-scoped entries.
    #[serde(default)]
    pub session: BTreeMap<String, Value>,
    /// `user:` entries.
    #[serde(default)]
    pub user: BTreeMap<String, Value>,
    /// `app:` entries.
    #[serde(default)]
    pub app: BTreeMap<String, Value>,
    /// When the snapshot was taken.
    pub captured_at: DateTime<Utc>,
}

impl StateSnapshot {
    /// Creates an empty snapshot for a run.
    #[must_use]
    pub fn empty(identity: &RunIdentity) -> Self {
        Self {
            run_id: identity.run_id,
            user_id: identity.user_id.clone(),
            session: BTreeMap::new(),
            user: BTreeMap::new(),
            app: BTreeMap::new(),
            captured_at: Utc::now(),
        }
    }

    /// Captures the persistent scopes of a store.
    #[must_use]
    pub fn capture(identity: &RunIdentity, store: &StateStore) -> Self {
        Self {
            run_id: identity.run_id,
            user_id: identity.user_id.clone(),
            session: store.scope_entries(StateScope::Session),
            user: store.scope_entries(StateScope::User),
            app: store.scope_entries(StateScope::App),
            captured_at: Utc::now(),
        }
    }

    /// Rebuilds a store from the snapshot.
    #[must_use]
    pub fn restore(&self) -> StateStore {
        StateStore::from_entries(
            self.session
                .iter()
                .chain(&self.user)
                .chain(&self.app)
                .map(|(k, v)| (k.clone(), v.clone())),
        )
    }

    /// Returns the identity the snapshot was taken for.
    #[must_use]
    pub fn identity(&self) -> RunIdentity {
        RunIdentity::with_run_id(self.run_id, self.user_id.clone())
    }

    /// Returns the total number of captured entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.session.len() + self.user.len() + self.app.len()
    }

    /// Returns true if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
