//! Key scopes of the state store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifetime class of a state key, derived from the key's prefix.
///
/// A key's scope is a pure function of the key, so a key can never live in
/// two scopes at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateScope {
    /// `temp:` keys, cleared at the end of every run.
    Temp,
    /// Unprefixed keys, living for one workflow run.
    Session,
    /// `user:` keys, persisted across runs of the same principal.
    User,
    /// `app:` keys, shared by every principal.
    App,
}

impl StateScope {
    /// Prefix of temporary keys.
    pub const TEMP_PREFIX: &'static str = "temp:";
    /// Prefix of user keys.
    pub const USER_PREFIX: &'static str = "user:";
    /// Prefix of app keys.
    pub const APP_PREFIX: &'static str = "app:";

    /// All scopes, shortest lifetime first.
    pub const ALL: [Self; 4] = [Self::Temp, Self::Session, Self::User, Self::App];

    /// Returns the scope a key belongs to.
    #[must_use]
    pub fn from_key(key: &str) -> Self {
        if key.starts_with(Self::TEMP_PREFIX) {
            Self::Temp
        } else if key.starts_with(Self::USER_PREFIX) {
            Self::User
        } else if key.starts_with(Self::APP_PREFIX) {
            Self::App
        } else {
            Self::Session
        }
    }

    /// Returns the key prefix of this scope (empty for session).
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Temp => Self::TEMP_PREFIX,
            Self::Session => "",
            Self::User => Self::USER_PREFIX,
            Self::App => Self::APP_PREFIX,
        }
    }

    /// Builds the full key for a name in this scope.
    #[must_use]
    pub fn key(self, name: &str) -> String {
        format!("{}{name}", self.prefix())
    }

    /// Returns true if keys of this scope outlive a single run.
    #[must_use]
    pub fn is_persistent(self) -> bool {
        !matches!(self, Self::Temp)
    }
}

impl fmt::Display for StateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temp => write!(f, "temp"),
            Self::Session => write!(f, "session"),
            Self::User => write!(f, "user"),
            Self::App => write!(f, "app"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_from_key() {
        assert_eq!(StateScope::from_key("temp:processing_timestamp"), StateScope::Temp);
        assert_eq!(StateScope::from_key("user:total_submissions"), StateScope::User);
        assert_eq!(StateScope::from_key("app:version"), StateScope::App);
        assert_eq!(StateScope::from_key("grading_attempts"), StateScope::Session);
        assert_eq!(StateScope::from_key("username"), StateScope::Session);
    }

    #[test]
    fn test_scoped_key_round_trips() {
        for scope in StateScope::ALL {
            assert_eq!(StateScope::from_key(&scope.key("x")), scope);
        }
    }

    #[test]
    fn test_persistence() {
        assert!(!StateScope::Temp.is_persistent());
        assert!(StateScope::User.is_persistent());
    }
}
