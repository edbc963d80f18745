pub mod error;
pub mod time;
pub mod types;

pub use error::{Result, StoreError};
pub use types::{ObjectDescriptor, PutAttributes};
