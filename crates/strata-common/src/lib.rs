pub mod error;

pub use error::{Error, Phase, Result};
