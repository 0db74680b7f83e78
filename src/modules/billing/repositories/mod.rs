pub mod billing_repository;

pub use billing_repository::{BillingRepository, MySqlBillingRepository};
