pub mod usage_sync;

pub use usage_sync::{flush_usage_deltas, UsageDeltaFlusher};
