//! File-based ETL pipelines: download a dataset, parse its delimited files,
//! reshape them and load them into a local SQLite database.

pub mod compression;
pub mod config;
pub mod error;
pub mod kaggle;
pub mod loader;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod source;
pub mod table;
pub mod transform;
pub mod transport;

pub use compression::Compression;
pub use config::QueueConfig;
pub use error::{
    ConfigurationError, EtlError, ParseError, Result, StoreError, TransferError, TransformError,
};
pub use loader::{IfExists, InsertBatch, InsertMethod, RelationalLoader};
pub use pipeline::{FileSummary, Pipeline, PipelineSummary};
pub use queue::{PipelineFailure, PipelineQueue, QueueReport, QueueSummary};
pub use source::{DataSource, SourceKind};
pub use table::{ColumnType, Table, TableFile, TextEncoding};
pub use transform::{Transform, TransformStep};
pub use transport::{ArchiveProvider, HttpFetcher, HttpRequest, HttpResponse, Transport};
