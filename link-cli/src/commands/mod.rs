//! CLI command implementations.

pub mod buffer;
pub mod ping;
pub mod settings;
