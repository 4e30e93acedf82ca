//! Session persistence boundary.
//!
//! The orchestrator never performs I/O itself; it hands snapshots of the
//! persistent scopes to a [`SessionStore`] and rebuilds state stores from
//! them.

mod lifecycle;
mod memory;
mod store;

pub use lifecycle::{load_or_create, save_run};
pub use memory::InMemorySessionStore;
pub use store::{SessionStore, SharedState};

#[cfg(test)]
pub use store::MockSessionStore;
