use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, info_span};
use uuid::Uuid;

use crate::error::{EtlError, ParseError, Result};
use crate::loader::RelationalLoader;
use crate::progress;
use crate::source::{DataSource, SourceKind};
use crate::transform::Transform;
use crate::transport::Transport;

/// Outcome of one processed file.
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub file: String,
    pub rows: usize,
    pub columns: Vec<String>,
    pub table: Option<String>,
    pub rows_written: Option<usize>,
    /// blake3 of the file as it sat on disk before parsing.
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub source: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files: Vec<FileSummary>,
}

impl PipelineSummary {
    pub fn rows_written(&self) -> usize {
        self.files.iter().filter_map(|f| f.rows_written).sum()
    }
}

/// Extract, transform and optionally load one data source.
#[derive(Debug, Clone)]
pub struct Pipeline {
    source: DataSource,
    transform: Transform,
    loader: Option<RelationalLoader>,
    transport: Option<Transport>,
}

impl Pipeline {
    pub fn new(source: DataSource) -> Self {
        Self {
            source,
            transform: Transform::Identity,
            loader: None,
            transport: None,
        }
    }

    pub fn with_loader(mut self, loader: RelationalLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Shared transform, used for files that declare none of their own.
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Defaults to the process-wide `reqwest` transport.
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn source(&self) -> &DataSource {
        &self.source
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn loader(&self) -> Option<&RelationalLoader> {
        self.loader.as_ref()
    }

    /// Where downloads land: the pipeline loader's output directory, then the
    /// first file loader's, then the working directory.
    pub fn output_dir(&self) -> PathBuf {
        self.loader
            .as_ref()
            .or_else(|| self.source.files().iter().find_map(|f| f.loader()))
            .map(|loader| loader.output_directory().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Run the whole pipeline. Any failure aborts the run; stores already
    /// written by earlier files are left as they are.
    pub fn run(&self) -> Result<PipelineSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!("pipeline", source = %self.source.name(), %run_id);
        let _guard = span.enter();

        let output_dir = self.output_dir();
        info!(
            kind = self.source.kind().name(),
            output_dir = %output_dir.display(),
            "Extracting data source"
        );
        let transport = self.transport.clone().unwrap_or_else(Transport::shared);
        let data_dir = self.source.download(&output_dir, &transport)?;

        let files = self.source.files();
        let pb = progress::item_bar(files.len());
        pb.set_message(format!("Processing {}", self.source.name()));

        let mut summaries = Vec::with_capacity(files.len());
        for file in files {
            let path = data_dir.join(file.name());
            debug!(file = file.name(), path = %path.display(), "Processing file");

            let content_hash = hash_file(&path).map_err(|source| ParseError::Io {
                file: file.name().to_string(),
                source,
            })?;
            let df = file.materialize(&path)?;
            let df = file
                .transform()
                .or(&self.transform)
                .apply(df)
                .map_err(|source| EtlError::Transform {
                    file: file.name().to_string(),
                    source,
                })?;

            let loader = file.loader().or(self.loader.as_ref());
            let rows_written = match loader {
                Some(loader) => Some(loader.write(&df)?),
                None => None,
            };

            remove_file(&path)?;
            info!(file = file.name(), rows = df.height(), "File processed");

            summaries.push(FileSummary {
                file: file.name().to_string(),
                rows: df.height(),
                columns: df
                    .get_column_names()
                    .into_iter()
                    .map(|name| name.to_string())
                    .collect(),
                table: loader.map(|l| l.table().to_string()),
                rows_written,
                content_hash,
            });
            pb.inc(1);
        }
        pb.finish_and_clear();

        if self.source.kind() != SourceKind::DirectDownload && data_dir.exists() {
            debug!(path = %data_dir.display(), "Removing extraction directory");
            fs::remove_dir_all(&data_dir).map_err(|source| EtlError::Cleanup {
                path: data_dir.clone(),
                source,
            })?;
        }

        Ok(PipelineSummary {
            source: self.source.name().to_string(),
            run_id,
            started_at,
            finished_at: Utc::now(),
            files: summaries,
        })
    }
}

fn hash_file(path: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn remove_file(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|source| EtlError::Cleanup {
        path: path.to_path_buf(),
        source,
    })
}
