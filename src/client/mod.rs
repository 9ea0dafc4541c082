//! gelfstream client implementation

pub mod logger;

pub use logger::GelfClient;
pub use crate::types::LogLevel;
