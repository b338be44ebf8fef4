//! Network collaborator and the streaming download discipline.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::blocking::Client;
use tracing::{debug, info, warn};

use crate::error::TransferError;
use crate::kaggle::KaggleProvider;
use crate::progress;

/// Bytes copied per read while streaming a response to disk.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// A `GET` request. `label` names the file or dataset for error context.
#[derive(Debug, Clone)]
pub struct HttpRequest<'a> {
    pub url: &'a str,
    pub label: &'a str,
    pub basic_auth: Option<(&'a str, &'a str)>,
}

impl<'a> HttpRequest<'a> {
    pub fn get(url: &'a str, label: &'a str) -> Self {
        Self {
            url,
            label,
            basic_auth: None,
        }
    }
}

pub struct HttpResponse {
    pub status: u16,
    /// Declared `Content-Length`; used only to scale progress.
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

pub trait HttpFetcher: Send + Sync {
    fn get(&self, request: &HttpRequest<'_>) -> Result<HttpResponse, TransferError>;
}

/// Resolves a dataset identifier to files on disk.
pub trait ArchiveProvider: Send + Sync {
    /// Name of the directory `materialize` creates under the output directory.
    fn dataset_dir_name(&self, dataset: &str) -> Result<String, TransferError>;

    /// Download and unpack `dataset` into `output_dir/<dataset_dir_name>`.
    fn materialize(&self, dataset: &str, output_dir: &Path) -> Result<(), TransferError>;
}

/// Blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(None)
            .user_agent(concat!("etl-runner/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher for ReqwestFetcher {
    fn get(&self, request: &HttpRequest<'_>) -> Result<HttpResponse, TransferError> {
        debug!(url = request.url, "Sending GET request");
        let mut builder = self.client.get(request.url);
        if let Some((user, key)) = request.basic_auth {
            builder = builder.basic_auth(user, Some(key));
        }

        let response = builder.send().map_err(|source| TransferError::Request {
            file: request.label.to_string(),
            source,
        })?;

        Ok(HttpResponse {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            body: Box::new(response),
        })
    }
}

/// The collaborators a data source downloads through.
#[derive(Clone)]
pub struct Transport {
    pub http: Arc<dyn HttpFetcher>,
    pub archive: Arc<dyn ArchiveProvider>,
}

static SHARED: Lazy<Transport> = Lazy::new(|| {
    let http: Arc<dyn HttpFetcher> = Arc::new(ReqwestFetcher::new());
    let archive: Arc<dyn ArchiveProvider> = Arc::new(KaggleProvider::new(http.clone()));
    Transport { http, archive }
});

impl Transport {
    pub fn new(http: Arc<dyn HttpFetcher>, archive: Arc<dyn ArchiveProvider>) -> Self {
        Self { http, archive }
    }

    /// Process-wide `reqwest` client with the Kaggle provider on top of it.
    pub fn shared() -> Self {
        SHARED.clone()
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut part = dest.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

/// Stream `request` into `dest` in `chunk_size` pieces, returning bytes written.
///
/// Bytes land in `<dest>.part` first and are renamed into place once the
/// stream ends, so `dest` only ever exists complete.
pub fn download_to_file(
    fetcher: &dyn HttpFetcher,
    request: &HttpRequest<'_>,
    dest: &Path,
    chunk_size: usize,
) -> Result<u64, TransferError> {
    let io_err = |source: std::io::Error| TransferError::Io {
        file: request.label.to_string(),
        source,
    };

    let response = fetcher.get(request)?;
    if !(200..300).contains(&response.status) {
        return Err(TransferError::Status {
            file: request.label.to_string(),
            status: response.status,
        });
    }

    let part = part_path(dest);
    let declared = response.content_length;
    let result = stream_body(response.body, &part, chunk_size, request.label, declared);

    let written = match result {
        Ok(written) => written,
        Err(err) => {
            if let Err(cleanup) = fs::remove_file(&part) {
                debug!(path = %part.display(), %cleanup, "No partial download to remove");
            }
            return Err(io_err(err));
        }
    };
    fs::rename(&part, dest).map_err(io_err)?;

    if let Some(declared) = declared {
        if declared != written {
            warn!(
                file = request.label,
                declared, written, "Downloaded size differs from Content-Length"
            );
        }
    }
    info!(file = request.label, bytes = written, "Download complete");
    Ok(written)
}

fn stream_body(
    mut body: Box<dyn Read + Send>,
    part: &Path,
    chunk_size: usize,
    label: &str,
    declared: Option<u64>,
) -> std::io::Result<u64> {
    let pb = progress::download_bar(label, declared);
    let mut out = BufWriter::new(File::create(part)?);
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut written = 0u64;

    loop {
        let read = match body.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        out.write_all(&buffer[..read])?;
        written += read as u64;
        pb.inc(read as u64);
    }

    out.flush()?;
    pb.finish_and_clear();
    Ok(written)
}
