//! `conveyor-observability` — process-wide logging/tracing setup.

pub mod tracing;

pub use self::tracing::{init, init_with_filter};
