//! Common types shared by the session controller and the simulator service

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
