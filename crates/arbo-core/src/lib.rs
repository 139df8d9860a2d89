pub mod config;
pub mod error;
pub mod gold;
pub mod lake;
pub mod pipeline;
pub mod reader;
pub mod session;
pub mod writer;

pub use config::{Config, Credentials};
pub use error::{EtlError, Result};
pub use lake::{LakeLayout, Layer};
pub use pipeline::{Pipeline, RunSummary, SourceFrames, TableWrite};
pub use session::Session;
pub use writer::{StorageFormat, TableWriter, WriteReport};
