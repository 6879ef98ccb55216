#![forbid(unsafe_code)]

pub mod config;
pub mod engines;
pub mod errors;
pub mod ipc;
pub mod models;
pub mod observer;
pub mod orchestrator;
pub mod persistence;
pub mod protocol;
pub mod session;

pub use config::FactoryConfig;
pub use errors::{AppError, Result};
