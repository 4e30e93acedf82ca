//! Run identity for tracking workflow runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one workflow run and the principal it runs for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// The unique id of the run.
    pub run_id: Uuid,
    /// The principal whose `user:` scope the run reads and writes.
    pub user_id: String,
    /// When the identity was created.
    pub created_at: DateTime<Utc>,
}

impl RunIdentity {
    /// Creates an identity with a generated run id.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self::with_run_id(Uuid::new_v4(), user_id)
    }

    /// Creates an identity for an existing run id.
    #[must_use]
    pub fn with_run_id(run_id: Uuid, user_id: impl Into<String>) -> Self {
        Self {
            run_id,
            user_id: user_id.into(),
            created_at: Utc::now(),
        }
    }

    /// Returns the run id as a string.
    #[must_use]
    pub fn run_id_str(&self) -> String {
        self.run_id.to_string()
    }
}

impl Default for RunIdentity {
    fn default() -> Self {
        Self::new("anonymous")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_generates_unique_ids() {
        let a = RunIdentity::new("alice");
        let b = RunIdentity::new("alice");

        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.user_id, "alice");
    }

    #[test]
    fn test_identity_with_run_id() {
        let id = Uuid::new_v4();
        let identity = RunIdentity::with_run_id(id, "bob");
        assert_eq!(identity.run_id_str(), id.to_string());
    }
}
