pub mod cache;
pub mod config;
pub mod database;
pub mod event_log;
pub mod handlers;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod pod;
pub mod pubsub;
pub mod readiness;
pub mod runtime;
pub mod services;
pub mod transitions;

#[cfg(test)]
pub mod testing;

pub use database::init_database;
pub use services::Services;
