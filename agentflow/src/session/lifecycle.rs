//! Loading and saving a run's state through a [`SessionStore`].

use super::store::SessionStore;
use crate::context::{RunIdentity, StateSnapshot, StateStore};
use crate::errors::PersistenceError;
use tracing::debug;

/// Loads a run's state, or creates a fresh store for a new run.
///
/// The session scope comes from the saved run. The user and app scopes are
/// always the latest shared ones, so counters written by the principal's
/// other runs are visible.
///
/// # Errors
///
/// Propagates backend failures. A saved run that belongs to another principal
/// is a [`PersistenceError::Backend`] error.
pub async fn load_or_create(
    sessions: &dyn SessionStore,
    identity: &RunIdentity,
) -> Result<StateStore, PersistenceError> {
    let mut snapshot = match sessions.load(identity.run_id).await {
        Ok(snapshot) if snapshot.user_id != identity.user_id => {
            return Err(PersistenceError::Backend(format!(
                "run {} belongs to another principal",
                identity.run_id
            )));
        }
        Ok(snapshot) => {
            debug!(run_id = %identity.run_id, entries = snapshot.session.len(), "Resuming session");
            snapshot
        }
        Err(e) if e.is_not_found() => {
            debug!(run_id = %identity.run_id, "Creating session");
            StateSnapshot::empty(identity)
        }
        Err(e) => return Err(e),
    };

    let shared = sessions.load_shared(&identity.user_id).await?;
    snapshot.user = shared.user;
    snapshot.app = shared.app;
    Ok(snapshot.restore())
}

/// Persists the session, user and app scopes of a store. Temporary keys are
/// never saved.
///
/// # Errors
///
/// Propagates backend failures.
pub async fn save_run(
    sessions: &dyn SessionStore,
    identity: &RunIdentity,
    store: &StateStore,
) -> Result<StateSnapshot, PersistenceError> {
    let snapshot = StateSnapshot::capture(identity, store);
    sessions.save(&snapshot).await?;
    Ok(snapshot)
}
