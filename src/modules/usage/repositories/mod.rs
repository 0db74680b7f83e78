pub mod partitions;
pub mod usage_repository;
pub mod violation_repository;

pub use usage_repository::{MySqlUsageLogRepository, UsageLogRepository};
pub use violation_repository::{MySqlViolationRepository, ViolationRepository};
