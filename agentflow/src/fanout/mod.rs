//! Fan-out/fan-in over batches of independent items.

mod coordinator;
mod paired;
mod stage;

pub use coordinator::{BatchOutcome, FanOutConfig, FanOutCoordinator, ItemFailure};
pub use paired::{run_paired, PairedCall};
pub use stage::FanOutStage;
