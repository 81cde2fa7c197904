pub mod config;
pub mod error;

pub mod kafka;

pub use config::Config;
pub use error::{Error, Result};
