use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ConfigurationError, TransferError};
use crate::table::TableFile;
use crate::transport::{download_to_file, HttpRequest, Transport, DEFAULT_CHUNK_SIZE};

/// Where a dataset comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// A provider-hosted package that may unpack into many files.
    #[serde(alias = "kaggle", alias = "archive-hosted")]
    Archive,
    /// One HTTP(S) resource mapping to exactly one file.
    #[serde(alias = "direct", alias = "direct-read", alias = "csv")]
    DirectDownload,
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::DirectDownload => "direct-download",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataSource {
    name: String,
    url: String,
    kind: SourceKind,
    files: Vec<TableFile>,
    chunk_size: usize,
}

impl DataSource {
    /// Build and validate a source. An invalid file list never produces a value.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        kind: SourceKind,
        files: Vec<TableFile>,
    ) -> Result<Self, ConfigurationError> {
        let source = Self {
            name: name.into(),
            url: url.into(),
            kind,
            files,
            chunk_size: DEFAULT_CHUNK_SIZE,
        };
        source.validate()?;
        Ok(source)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.files.is_empty() {
            return Err(ConfigurationError::NoFiles {
                source_name: self.name.clone(),
            });
        }
        if self.kind == SourceKind::DirectDownload && self.files.len() > 1 {
            return Err(ConfigurationError::TooManyDirectFiles {
                source_name: self.name.clone(),
                count: self.files.len(),
            });
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn files(&self) -> &[TableFile] {
        &self.files
    }

    /// Fetch the dataset under `output_dir` and return the directory holding
    /// its files.
    ///
    /// Archive sources resolve to `output_dir/<dataset dir>`. Direct downloads
    /// land at `output_dir/<file name>` and are skipped when that file exists.
    pub fn download(
        &self,
        output_dir: &Path,
        transport: &Transport,
    ) -> Result<PathBuf, TransferError> {
        fs::create_dir_all(output_dir).map_err(|source| TransferError::Io {
            file: self.name.clone(),
            source,
        })?;

        match self.kind {
            SourceKind::Archive => {
                transport.archive.materialize(&self.url, output_dir)?;
                let dir_name = transport.archive.dataset_dir_name(&self.url)?;
                Ok(output_dir.join(dir_name))
            }
            SourceKind::DirectDownload => {
                let file = &self.files[0];
                let target = output_dir.join(file.name());
                if target.is_file() {
                    warn!(
                        file = file.name(),
                        path = %target.display(),
                        "Skipping download: the file already exists"
                    );
                    return Ok(output_dir.to_path_buf());
                }

                info!(source = %self.name, url = %self.url, "Downloading file");
                download_to_file(
                    transport.http.as_ref(),
                    &HttpRequest::get(&self.url, file.name()),
                    &target,
                    self.chunk_size,
                )?;
                Ok(output_dir.to_path_buf())
            }
        }
    }
}
