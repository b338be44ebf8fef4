use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use encoding_rs::{Encoding, UTF_8};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compression::{self, Compression};
use crate::error::{ConfigurationError, ParseError};
use crate::loader::RelationalLoader;
use crate::transform::Transform;

/// In-memory table handed between the parse, transform and load steps.
pub type Table = DataFrame;

/// Declared type for a parsed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[serde(alias = "str", alias = "object", alias = "utf8")]
    String,
    #[serde(alias = "int")]
    Int32,
    #[serde(alias = "Int64", alias = "integer")]
    Int64,
    Float32,
    #[serde(alias = "float", alias = "double")]
    Float64,
    #[serde(alias = "boolean")]
    Bool,
    Date,
    #[serde(alias = "timestamp")]
    Datetime,
}

impl ColumnType {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::String => DataType::String,
            Self::Int32 => DataType::Int32,
            Self::Int64 => DataType::Int64,
            Self::Float32 => DataType::Float32,
            Self::Float64 => DataType::Float64,
            Self::Bool => DataType::Boolean,
            Self::Date => DataType::Date,
            Self::Datetime => DataType::Datetime(TimeUnit::Microseconds, None),
        }
    }
}

/// Text encoding of a table file.
///
/// Accepts any WHATWG label (`utf-8`, `latin-1`, `cp1252`, `shift_jis`, ...).
/// A `-lossy` suffix replaces malformed sequences instead of failing the read.
/// Input that is not UTF-8 is decoded to UTF-8 before parsing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextEncoding {
    encoding: &'static Encoding,
    lossy: bool,
}

impl Default for TextEncoding {
    fn default() -> Self {
        Self::utf8()
    }
}

impl std::str::FromStr for TextEncoding {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let label = value.trim().to_ascii_lowercase();
        let (label, lossy) = match label.strip_suffix("-lossy") {
            Some(base) => (base, true),
            None => (label.as_str(), false),
        };
        Encoding::for_label(label.as_bytes())
            .map(|encoding| Self { encoding, lossy })
            .ok_or_else(|| ConfigurationError::UnknownValue {
                kind: "encoding",
                value: value.to_string(),
            })
    }
}

impl TextEncoding {
    pub fn utf8() -> Self {
        Self {
            encoding: UTF_8,
            lossy: false,
        }
    }

    pub fn utf8_lossy() -> Self {
        Self {
            encoding: UTF_8,
            lossy: true,
        }
    }

    /// Canonical encoding name, e.g. `windows-1252` for `latin-1`.
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    pub fn is_lossy(&self) -> bool {
        self.lossy
    }

    fn csv_encoding(&self) -> CsvEncoding {
        if self.lossy {
            CsvEncoding::LossyUtf8
        } else {
            CsvEncoding::Utf8
        }
    }

    /// Re-encode `bytes` as UTF-8. UTF-8 input is left to the CSV reader.
    fn decode_to_utf8(&self, file: &str, bytes: Vec<u8>) -> Result<Vec<u8>, ParseError> {
        if self.encoding == UTF_8 {
            return Ok(bytes);
        }
        let (text, _, malformed) = self.encoding.decode(&bytes);
        if malformed && !self.lossy {
            return Err(ParseError::Encoding {
                file: file.to_string(),
                encoding: self.encoding.name(),
            });
        }
        Ok(text.into_owned().into_bytes())
    }
}

/// One delimited-text file yielded by a data source.
///
/// A `TableFile` is pure configuration: parsing returns the table by value and
/// the resolved path is passed in per run, so one definition can be reused
/// across runs.
#[derive(Debug, Clone)]
pub struct TableFile {
    name: String,
    separator: u8,
    compression: Option<Compression>,
    names: Option<Vec<String>>,
    dtypes: BTreeMap<String, ColumnType>,
    encoding: TextEncoding,
    transform: Transform,
    loader: Option<RelationalLoader>,
}

impl TableFile {
    /// A comma-separated, uncompressed, UTF-8 file named `name`.
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigurationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigurationError::EmptyFileName);
        }
        Ok(Self {
            name,
            separator: b',',
            compression: None,
            names: None,
            dtypes: BTreeMap::new(),
            encoding: TextEncoding::default(),
            transform: Transform::Identity,
            loader: None,
        })
    }

    pub fn with_separator(mut self, separator: &str) -> Result<Self, ConfigurationError> {
        match separator.as_bytes() {
            [byte] => {
                self.separator = *byte;
                Ok(self)
            }
            _ => Err(ConfigurationError::InvalidSeparator {
                file: self.name.clone(),
                separator: separator.to_string(),
            }),
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Column names replacing the file's header row.
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_dtype(mut self, column: impl Into<String>, dtype: ColumnType) -> Self {
        self.dtypes.insert(column.into(), dtype);
        self
    }

    pub fn with_dtypes(mut self, dtypes: impl IntoIterator<Item = (String, ColumnType)>) -> Self {
        self.dtypes.extend(dtypes);
        self
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Store this file with its own loader instead of the pipeline's.
    pub fn with_loader(mut self, loader: RelationalLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn separator(&self) -> u8 {
        self.separator
    }

    pub fn compression(&self) -> Option<Compression> {
        self.compression
    }

    pub fn names(&self) -> Option<&[String]> {
        self.names.as_deref()
    }

    pub fn dtypes(&self) -> &BTreeMap<String, ColumnType> {
        &self.dtypes
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn loader(&self) -> Option<&RelationalLoader> {
        self.loader.as_ref()
    }

    /// Read the file at `path` into a fully materialized table.
    ///
    /// Row 0 is always the header; explicit names replace it. Declared dtypes
    /// are keyed by the final column names and handed to the reader, so
    /// nothing about those columns is inferred.
    pub fn materialize(&self, path: &Path) -> Result<Table, ParseError> {
        let raw = std::fs::read(path).map_err(|source| ParseError::Io {
            file: self.name.clone(),
            source,
        })?;
        let codec = Compression::resolve(self.compression, path);
        let bytes = compression::decompress(&self.name, raw, codec)?;
        debug!(file = %self.name, bytes = bytes.len(), "Decoded table file");

        self.parse_bytes(bytes)
    }

    fn parse_bytes(&self, bytes: Vec<u8>) -> Result<Table, ParseError> {
        let polars_err = |source: PolarsError| ParseError::Polars {
            file: self.name.clone(),
            source,
        };

        let bytes = self.encoding.decode_to_utf8(&self.name, bytes)?;
        let header = self.header(&bytes).map_err(polars_err)?;
        if let Some(names) = &self.names {
            if names.len() != header.len() {
                return Err(ParseError::NameCount {
                    file: self.name.clone(),
                    expected: names.len(),
                    found: header.len(),
                });
            }
        }

        let overwrite = self.schema_overwrite(&header)?;
        let mut df = self
            .read_options()
            .with_schema_overwrite(Some(Arc::new(overwrite)))
            .into_reader_with_file_handle(Cursor::new(bytes))
            .finish()
            .map_err(polars_err)?;

        if let Some(names) = &self.names {
            df.set_column_names(names.iter().map(String::as_str))
                .map_err(polars_err)?;
        }

        // The reader may still hand back a wider type for some dtypes.
        for (column, dtype) in &self.dtypes {
            let target = dtype.data_type();
            let current = df.column(column).map_err(polars_err)?;
            if current.dtype() == &target {
                continue;
            }
            let cast = current
                .as_materialized_series()
                .strict_cast(&target)
                .map_err(polars_err)?;
            df.with_column(cast).map_err(polars_err)?;
        }

        Ok(df)
    }

    fn read_options(&self) -> CsvReadOptions {
        let parse_options = CsvParseOptions::default()
            .with_separator(self.separator)
            .with_encoding(self.encoding.csv_encoding());
        CsvReadOptions::default()
            .with_has_header(true)
            .with_parse_options(parse_options)
    }

    /// Column names exactly as the reader sees them in the header row.
    fn header(&self, bytes: &[u8]) -> PolarsResult<Vec<PlSmallStr>> {
        let df = self
            .read_options()
            .with_n_rows(Some(1))
            .with_infer_schema_length(Some(0))
            .into_reader_with_file_handle(Cursor::new(bytes))
            .finish()?;
        Ok(df.get_column_names().into_iter().cloned().collect())
    }

    /// Declared dtypes keyed by header name. With explicit names a dtype is
    /// matched by the position of its final name.
    fn schema_overwrite(&self, header: &[PlSmallStr]) -> Result<Schema, ParseError> {
        self.dtypes
            .iter()
            .map(|(column, dtype)| {
                let position = match &self.names {
                    Some(names) => names.iter().position(|name| name == column),
                    None => header.iter().position(|name| name.as_str() == column),
                };
                position
                    .map(|position| (header[position].clone(), dtype.data_type()))
                    .ok_or_else(|| ParseError::UnknownColumn {
                        file: self.name.clone(),
                        column: column.clone(),
                    })
            })
            .collect()
    }
}
