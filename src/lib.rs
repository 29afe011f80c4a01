// Replicated Concurrency-Control Engine
// Core library module

pub mod common;
pub mod config;
pub mod engine;
pub mod error;

pub use config::EngineConfig;
pub use engine::TransactionManager;
pub use error::{Result, RceError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
