pub mod cache;
pub mod controllers;
pub mod engine;
pub mod limiter;
pub mod scripts;
pub mod store;

pub use cache::MetadataCache;
pub use engine::{Decision, DecisionEngine};
pub use limiter::{Algorithm, RateLimitOutcome, RateLimiter};
pub use store::FastStore;
