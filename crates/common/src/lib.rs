//! Common types shared by the key pool, batch runner and service

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{REDACT_TAIL, Secret, redact};
