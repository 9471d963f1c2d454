//! Common types shared by the dispatcher crates and the gateway binary

mod secret;
mod error;

pub use secret::{SUFFIX_LEN, Secret};
pub use error::{Error, Result};
