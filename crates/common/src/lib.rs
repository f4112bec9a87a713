//! Shared types for the connector auth workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
