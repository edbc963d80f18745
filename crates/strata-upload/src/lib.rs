//! Chunked concurrent upload engine.
//!
//! An input stream is cut into numbered parts by a single chunker, uploaded by
//! a fixed pool of workers, and reassembled in part order by a collector before
//! the remote multipart session is completed. Any failure aborts the session.

pub mod chunker;
pub mod collector;
pub mod config;
pub mod error;
pub mod planner;
pub mod session;
pub mod state;
pub mod worker;

pub use config::{ConfigError, UploadConfig};
pub use error::{UploadError, UploadErrorKind};
pub use planner::{PartPlan, plan};
pub use session::{UploadOptions, Uploader};
pub use state::SessionState;
