//! Observability utilities: subscriber setup and span timing.

mod subscriber;
mod timer;

pub use subscriber::{init_tracing, DEFAULT_FILTER};
pub use timer::SpanTimer;
