// crates/etl-runner-core/src/error.rs

use std::path::PathBuf;

use polars::error::PolarsError;
use thiserror::Error;

/// Rejected definitions. Raised before any network or disk I/O happens.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("data source '{source_name}' declares no files")]
    NoFiles { source_name: String },

    #[error("direct-download source '{source_name}' declares {count} files; exactly one is allowed")]
    TooManyDirectFiles { source_name: String, count: usize },

    #[error("file name must not be empty")]
    EmptyFileName,

    #[error("separator {separator:?} for {file} must be a single byte")]
    InvalidSeparator { file: String, separator: String },

    #[error("unknown {kind} '{value}'")]
    UnknownValue { kind: &'static str, value: String },

    #[error("failed to read queue definition {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid queue definition: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Dataset acquisition failures.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request for {file} failed: {source}")]
    Request {
        file: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request for {file} returned HTTP {status}")]
    Status { file: String, status: u16 },

    #[error("I/O error while downloading {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to extract archive {file}: {source}")]
    Archive {
        file: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("cannot resolve dataset identifier '{0}'")]
    DatasetId(String),

    #[error("no credentials for archive provider: {0}")]
    Credentials(String),
}

/// Failures turning a file on disk into a table.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decompress {file} ({codec}): {message}")]
    Decompress {
        file: String,
        codec: &'static str,
        message: String,
    },

    #[error("{file} supplies {expected} column names but the file has {found} columns")]
    NameCount {
        file: String,
        expected: usize,
        found: usize,
    },

    #[error("{file} declares a dtype for unknown column '{column}'")]
    UnknownColumn { file: String, column: String },

    #[error("{file} is not valid {encoding}")]
    Encoding {
        file: String,
        encoding: &'static str,
    },

    #[error("failed to parse {file}: {source}")]
    Polars {
        file: String,
        #[source]
        source: PolarsError,
    },
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("column position {position} is out of range for a table with {width} columns")]
    PositionOutOfRange { position: usize, width: usize },

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// Relational store failures, including deliberate `fail`-policy conflicts.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table '{table}' already exists in {database}")]
    TableExists { database: PathBuf, table: String },

    #[error("SQLite error on {database}: {source}")]
    Sqlite {
        database: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("table '{table}' has no columns to store")]
    EmptySchema { table: String },

    #[error("cannot prepare output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read column '{column}' for loading: {source}")]
    Column {
        column: String,
        #[source]
        source: PolarsError,
    },
}

#[derive(Debug, Error)]
pub enum EtlError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("transform failed for {file}: {source}")]
    Transform {
        file: String,
        #[source]
        source: TransformError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cleanup of {path} failed: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, EtlError>;
