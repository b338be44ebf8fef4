//! TOML queue definitions.
//!
//! Raw strings are validated here into the closed enums the rest of the crate
//! uses, so a bad policy or codec name is rejected before anything runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::compression::Compression;
use crate::error::ConfigurationError;
use crate::loader::{IfExists, InsertMethod, RelationalLoader};
use crate::pipeline::Pipeline;
use crate::queue::PipelineQueue;
use crate::source::{DataSource, SourceKind};
use crate::table::{ColumnType, TableFile};
use crate::transform::{Transform, TransformStep};
use crate::transport::Transport;

/// Overrides every loader's output directory when set.
pub const OUTPUT_DIR_ENV: &str = "ETL_RUNNER_OUTPUT_DIR";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub name: String,
    pub url: String,
    pub kind: SourceKind,
    /// Bytes per read while streaming a download.
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub files: Vec<FileConfig>,
    pub loader: Option<LoaderConfig>,
    pub transform: Option<TransformConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub name: String,
    pub separator: Option<String>,
    pub compression: Option<Compression>,
    pub encoding: Option<String>,
    pub names: Option<Vec<String>>,
    #[serde(default)]
    pub dtypes: BTreeMap<String, ColumnType>,
    #[serde(default)]
    pub transform: Vec<TransformStep>,
    /// Overrides the pipeline loader for this file.
    pub loader: Option<LoaderConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertMethodName {
    #[default]
    Single,
    Multi,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    pub database: String,
    pub table: String,
    #[serde(default)]
    pub if_exists: IfExists,
    #[serde(default)]
    pub index: bool,
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
    #[serde(default)]
    pub insert_method: InsertMethodName,
    /// Rows per insert batch.
    pub chunk_size: Option<usize>,
}

fn default_output_directory() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformConfig {
    #[serde(default)]
    pub steps: Vec<TransformStep>,
}

impl QueueConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigurationError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), "Loaded queue definition");
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigurationError> {
        Ok(toml::from_str(contents)?)
    }

    /// Point every loader, pipeline-wide or per file, at `dir`.
    pub fn override_output_dir(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        for pipeline in &mut self.pipelines {
            let file_loaders = pipeline.files.iter_mut().filter_map(|f| f.loader.as_mut());
            for loader in pipeline.loader.iter_mut().chain(file_loaders) {
                loader.output_directory = dir.clone();
            }
        }
    }

    /// Apply `ETL_RUNNER_OUTPUT_DIR` when it is set and non-empty.
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(OUTPUT_DIR_ENV) {
            if !dir.trim().is_empty() {
                debug!(%dir, "Output directory overridden from environment");
                self.override_output_dir(dir);
            }
        }
    }

    /// Validate every definition and build a queue running over `transport`.
    pub fn build(&self, transport: &Transport) -> Result<PipelineQueue, ConfigurationError> {
        let pipelines = self
            .pipelines
            .iter()
            .map(|pipeline| pipeline.build(transport))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PipelineQueue::new(pipelines))
    }
}

impl PipelineConfig {
    pub fn build(&self, transport: &Transport) -> Result<Pipeline, ConfigurationError> {
        let files = self
            .files
            .iter()
            .map(FileConfig::build)
            .collect::<Result<Vec<_>, _>>()?;

        let mut source = DataSource::new(&self.name, &self.url, self.kind, files)?;
        if let Some(chunk_size) = self.chunk_size {
            source = source.with_chunk_size(chunk_size);
        }

        let mut pipeline = Pipeline::new(source).with_transport(transport.clone());
        if let Some(transform) = &self.transform {
            pipeline = pipeline.with_transform(Transform::steps(transform.steps.clone()));
        }
        if let Some(loader) = &self.loader {
            pipeline = pipeline.with_loader(loader.build());
        }
        Ok(pipeline)
    }
}

impl FileConfig {
    pub fn build(&self) -> Result<TableFile, ConfigurationError> {
        let mut file = TableFile::new(&self.name)?;
        if let Some(separator) = &self.separator {
            file = file.with_separator(separator)?;
        }
        if let Some(compression) = self.compression {
            file = file.with_compression(compression);
        }
        if let Some(encoding) = &self.encoding {
            file = file.with_encoding(encoding.parse()?);
        }
        if let Some(names) = &self.names {
            file = file.with_names(names.iter().cloned());
        }
        if let Some(loader) = &self.loader {
            file = file.with_loader(loader.build());
        }
        Ok(file
            .with_dtypes(self.dtypes.clone())
            .with_transform(Transform::steps(self.transform.clone())))
    }
}

impl LoaderConfig {
    pub fn build(&self) -> RelationalLoader {
        let method = match self.insert_method {
            InsertMethodName::Single => InsertMethod::Single,
            InsertMethodName::Multi => InsertMethod::Multi,
        };
        let loader = RelationalLoader::new(
            &self.database,
            &self.table,
            self.if_exists,
            &self.output_directory,
        )
        .with_index(self.index)
        .with_insert_method(method);
        match self.chunk_size {
            Some(chunk_size) => loader.with_chunk_size(chunk_size),
            None => loader,
        }
    }
}
