pub mod models;
pub mod pipeline;
pub mod repositories;
pub mod services;
