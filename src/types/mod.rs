//! GELF message types

pub mod message;

pub use message::{GelfMessage, LogFields, LogLevel, GELF_VERSION};
