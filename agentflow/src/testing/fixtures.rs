//! Run fixtures.

use std::sync::Arc;

use serde_json::Value;

use crate::config::AgentflowConfig;
use crate::context::{RunContext, RunIdentity, StageContext, StateStore};
use crate::events::CollectingEventSink;

/// A run context over a seeded store, with every event collected.
#[derive(Debug)]
pub struct TestRun {
    /// The run context.
    pub run: Arc<RunContext>,
    /// Events emitted during the run.
    pub events: Arc<CollectingEventSink>,
}

impl TestRun {
    /// Creates a run for user `tester` over the given entries.
    #[must_use]
    pub fn new<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::with_config(entries, AgentflowConfig::default())
    }

    /// Creates a run with an explicit configuration.
    #[must_use]
    pub fn with_config<I, K>(entries: I, config: AgentflowConfig) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let events = Arc::new(CollectingEventSink::new());
        let run = RunContext::new(
            RunIdentity::new("tester"),
            Arc::new(StateStore::from_entries(entries)),
        )
        .with_config(config)
        .with_event_sink(Arc::clone(&events) as Arc<dyn crate::events::EventSink>);
        Self {
            run: Arc::new(run),
            events,
        }
    }

    /// Returns the run's store.
    #[must_use]
    pub fn store(&self) -> &Arc<StateStore> {
        self.run.store()
    }

    /// Creates a stage context outside any loop.
    #[must_use]
    pub fn stage_context(&self, stage: &str) -> StageContext {
        StageContext::new(Arc::clone(&self.run), stage)
    }
}
