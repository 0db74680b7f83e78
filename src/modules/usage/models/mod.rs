pub mod usage_log;
pub mod violation;

pub use usage_log::{RequestContext, UsageLog, UsageTotals};
pub use violation::RateLimitViolation;
