pub mod config;
pub mod database;
pub mod error;
pub mod memory;
pub mod messaging;
pub mod models;
pub mod queue;
pub mod redactor;
pub mod result_store;
pub mod routes;
pub mod worker_processing;
pub mod worker_scheduler;

pub use error::{Error, Result};
