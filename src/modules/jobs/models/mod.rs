pub mod job;

pub use job::{retry_delay, Job, JobKind, JobStatus};
