// crates/arbo-core/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("Config file could not be parsed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Table '{table}' not found or has no readable columns")]
    TableNotFound { table: String },

    #[error("Table '{table}' has no column '{column}'")]
    MissingColumn { table: String, column: String },

    #[error("Unsupported storage format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, EtlError>;
