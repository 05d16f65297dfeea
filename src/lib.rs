pub mod api;
pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod observability;
pub mod signals;
pub mod sources;
pub mod types;
pub mod utils;

pub use error::{Error, Result};
