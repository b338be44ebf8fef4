#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use etl_runner_core::{
    ArchiveProvider, HttpFetcher, HttpRequest, HttpResponse, TransferError, Transport,
};
use flate2::write::GzEncoder;
use rusqlite::Connection;

/// Serves canned bodies by URL; anything unknown is a 404.
#[derive(Default)]
pub struct MockFetcher {
    responses: Mutex<HashMap<String, Vec<u8>>>,
    calls: AtomicUsize,
}

impl MockFetcher {
    pub fn with(self, url: &str, body: Vec<u8>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), body);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HttpFetcher for MockFetcher {
    fn get(&self, request: &HttpRequest<'_>) -> Result<HttpResponse, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().get(request.url) {
            Some(body) => Ok(HttpResponse {
                status: 200,
                content_length: Some(body.len() as u64),
                body: Box::new(Cursor::new(body.clone())),
            }),
            None => Ok(HttpResponse {
                status: 404,
                content_length: None,
                body: Box::new(Cursor::new(Vec::new())),
            }),
        }
    }
}

/// Writes a fixed set of files into `<output>/<last url segment>`.
#[derive(Default)]
pub struct MockArchive {
    files: Vec<(String, Vec<u8>)>,
    calls: AtomicUsize,
}

impl MockArchive {
    pub fn with_file(mut self, name: &str, contents: &[u8]) -> Self {
        self.files.push((name.to_string(), contents.to_vec()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ArchiveProvider for MockArchive {
    fn dataset_dir_name(&self, dataset: &str) -> Result<String, TransferError> {
        dataset
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .ok_or_else(|| TransferError::DatasetId(dataset.to_string()))
    }

    fn materialize(&self, dataset: &str, output_dir: &Path) -> Result<(), TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let dir = output_dir.join(self.dataset_dir_name(dataset)?);
        let io_err = |source| TransferError::Io {
            file: dataset.to_string(),
            source,
        };
        fs::create_dir_all(&dir).map_err(io_err)?;
        for (name, contents) in &self.files {
            fs::write(dir.join(name), contents).map_err(io_err)?;
        }
        Ok(())
    }
}

pub fn transport(http: &Arc<MockFetcher>, archive: &Arc<MockArchive>) -> Transport {
    Transport::new(http.clone(), archive.clone())
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

pub fn row_count(database: &Path, table: &str) -> rusqlite::Result<i64> {
    let conn = Connection::open(database)?;
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
        row.get(0)
    })
}

/// `(name, declared type)` per column, in table order.
pub fn columns(database: &Path, table: &str) -> rusqlite::Result<Vec<(String, String)>> {
    let conn = Connection::open(database)?;
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
    let rows = stmt.query_map([], |row| Ok((row.get(1)?, row.get(2)?)))?;
    rows.collect()
}

pub fn column_names(database: &Path, table: &str) -> rusqlite::Result<Vec<String>> {
    Ok(columns(database, table)?
        .into_iter()
        .map(|(name, _)| name)
        .collect())
}
