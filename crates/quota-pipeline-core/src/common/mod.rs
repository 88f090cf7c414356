pub mod error;
pub mod types;

pub use error::{Error, Result, StoreError};
pub use types::*;
