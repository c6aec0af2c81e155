pub mod config;
pub mod error;

pub use config::{AtelierConfig, StreamConfig, MAX_BUFFER_BYTES};
pub use error::{AtelierError, Result};
