pub mod config;
pub mod types;
pub mod error;

pub use config::{Config, StateDir};
pub use error::QzError;
