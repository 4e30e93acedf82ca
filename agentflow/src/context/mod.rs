//! State and execution contexts.
//!
//! This module provides:
//! - The scoped [`StateStore`] shared by the stages of a run
//! - Persistable snapshots of its long-lived scopes
//! - Run and stage execution contexts

mod execution;
mod identity;
mod scope;
mod snapshot;
mod store;

pub use execution::{ExecutionContext, RunContext, StageActions, StageContext};
pub use identity::RunIdentity;
pub use scope::StateScope;
pub use snapshot::StateSnapshot;
pub use store::{StateDelta, StateStore, StateView, ESCALATE_KEY};
