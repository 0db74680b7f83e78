pub mod models;
pub mod repositories;
pub mod runner;

pub use runner::{JobRunner, RunnerHandles};
