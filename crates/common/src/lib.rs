//! Trafficlight Common Library
//!
//! Wire types and errors shared by the orchestrator and anything speaking
//! the adapter long-poll protocol.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
