//! stashd — scheduled backup agent.
//!
//! Per named model: archive, compress, optionally encrypt and split, upload
//! to one or more destinations, and rotate old uploads per destination.

pub mod archive;
pub mod compressor;
pub mod config;
pub mod encryptor;
pub mod error;
pub mod exec;
pub mod logger;
pub mod model;
pub mod notifier;
pub mod scheduler;
pub mod splitter;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use model::Model;
pub use scheduler::{ControlEvent, Scheduler};
