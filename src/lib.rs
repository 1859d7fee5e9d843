pub mod api;
pub mod cli;
pub mod common;
pub mod resources;
pub mod store;
