//! Archive-hosted datasets served by Kaggle.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::TransferError;
use crate::transport::{
    download_to_file, ArchiveProvider, HttpFetcher, HttpRequest, DEFAULT_CHUNK_SIZE,
};

pub const DEFAULT_API_BASE: &str = "https://www.kaggle.com/api/v1";

/// `<owner>/<slug>` pair naming a Kaggle dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetId {
    pub owner: String,
    pub slug: String,
}

impl DatasetId {
    /// Accepts `owner/slug` or a dataset page URL such as
    /// `https://www.kaggle.com/datasets/owner/slug`.
    pub fn parse(raw: &str) -> Result<Self, TransferError> {
        let trimmed = raw.trim();
        let without_scheme = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed);
        let without_query = without_scheme
            .split(['?', '#'])
            .next()
            .unwrap_or(without_scheme);

        let mut segments: Vec<&str> = without_query
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        if segments
            .first()
            .is_some_and(|host| host.ends_with("kaggle.com"))
        {
            segments.remove(0);
        }
        if segments.first() == Some(&"datasets") {
            segments.remove(0);
        }

        match segments.as_slice() {
            [owner, slug, ..] => Ok(Self {
                owner: owner.to_string(),
                slug: slug.to_string(),
            }),
            _ => Err(TransferError::DatasetId(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KaggleCredentials {
    pub username: String,
    pub key: String,
}

impl KaggleCredentials {
    /// `KAGGLE_USERNAME`/`KAGGLE_KEY`, then the first `kaggle.json` found in
    /// `$KAGGLE_CONFIG_DIR`, the working directory, or `~/.kaggle`.
    pub fn discover() -> Result<Self, TransferError> {
        if let (Ok(username), Ok(key)) = (
            std::env::var("KAGGLE_USERNAME"),
            std::env::var("KAGGLE_KEY"),
        ) {
            return Ok(Self { username, key });
        }

        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Ok(dir) = std::env::var("KAGGLE_CONFIG_DIR") {
            candidates.push(PathBuf::from(dir).join("kaggle.json"));
        }
        candidates.push(PathBuf::from("kaggle.json"));
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".kaggle").join("kaggle.json"));
        }

        for path in &candidates {
            let Ok(contents) = fs::read_to_string(path) else {
                continue;
            };
            debug!(path = %path.display(), "Reading Kaggle credentials");
            return serde_json::from_str(&contents).map_err(|e| {
                TransferError::Credentials(format!("{} is not valid: {e}", path.display()))
            });
        }

        Err(TransferError::Credentials(
            "set KAGGLE_USERNAME and KAGGLE_KEY or provide kaggle.json".to_string(),
        ))
    }
}

pub struct KaggleProvider {
    http: Arc<dyn HttpFetcher>,
    api_base: String,
    credentials: Option<KaggleCredentials>,
}

impl KaggleProvider {
    /// Credentials are discovered lazily, on the first download.
    pub fn new(http: Arc<dyn HttpFetcher>) -> Self {
        Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: KaggleCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn download_url(&self, id: &DatasetId) -> String {
        format!(
            "{}/datasets/download/{}/{}",
            self.api_base, id.owner, id.slug
        )
    }
}

impl ArchiveProvider for KaggleProvider {
    fn dataset_dir_name(&self, dataset: &str) -> Result<String, TransferError> {
        Ok(DatasetId::parse(dataset)?.slug)
    }

    fn materialize(&self, dataset: &str, output_dir: &Path) -> Result<(), TransferError> {
        let id = DatasetId::parse(dataset)?;
        let target = output_dir.join(&id.slug);
        if target.exists() {
            warn!(
                dataset = %id.slug,
                path = %target.display(),
                "Skipping download: dataset directory already exists"
            );
            return Ok(());
        }

        let credentials = match &self.credentials {
            Some(credentials) => credentials.clone(),
            None => KaggleCredentials::discover()?,
        };

        let url = self.download_url(&id);
        let archive_path = output_dir.join(format!("{}.zip", id.slug));
        let request = HttpRequest {
            url: &url,
            label: &id.slug,
            basic_auth: Some((credentials.username.as_str(), credentials.key.as_str())),
        };
        info!(dataset = %id.slug, owner = %id.owner, "Downloading Kaggle dataset");
        download_to_file(self.http.as_ref(), &request, &archive_path, DEFAULT_CHUNK_SIZE)?;

        let extracted = extract_zip(&archive_path, &target, &id.slug);
        if let Err(err) = fs::remove_file(&archive_path) {
            debug!(path = %archive_path.display(), %err, "Could not remove dataset archive");
        }
        if extracted.is_err() && target.exists() {
            if let Err(err) = fs::remove_dir_all(&target) {
                debug!(path = %target.display(), %err, "Could not remove partial extraction");
            }
        }
        extracted
    }
}

fn extract_zip(archive_path: &Path, target: &Path, label: &str) -> Result<(), TransferError> {
    let file = File::open(archive_path).map_err(|source| TransferError::Io {
        file: label.to_string(),
        source,
    })?;
    let archive_err = |source| TransferError::Archive {
        file: label.to_string(),
        source,
    };
    let mut archive = zip::ZipArchive::new(file).map_err(archive_err)?;
    archive.extract(target).map_err(archive_err)?;
    debug!(path = %target.display(), entries = archive.len(), "Extracted dataset archive");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_identifier_forms() {
        let expected = DatasetId {
            owner: "edenbd".into(),
            slug: "150k-lyrics-labeled-with-spotify-valence".into(),
        };
        for raw in [
            "https://www.kaggle.com/datasets/edenbd/150k-lyrics-labeled-with-spotify-valence",
            "https://www.kaggle.com/edenbd/150k-lyrics-labeled-with-spotify-valence/",
            "www.kaggle.com/datasets/edenbd/150k-lyrics-labeled-with-spotify-valence?select=a.csv",
            "edenbd/150k-lyrics-labeled-with-spotify-valence",
        ] {
            assert_eq!(DatasetId::parse(raw).unwrap(), expected, "{raw}");
        }
    }

    #[test]
    fn rejects_identifier_without_slug() {
        assert!(DatasetId::parse("https://www.kaggle.com/datasets/edenbd").is_err());
        assert!(DatasetId::parse("").is_err());
    }

    #[test]
    fn builds_api_download_url() {
        struct Unused;
        impl HttpFetcher for Unused {
            fn get(&self, _: &HttpRequest<'_>) -> Result<crate::transport::HttpResponse, TransferError> {
                unreachable!("no request expected")
            }
        }

        let provider = KaggleProvider::new(Arc::new(Unused)).with_api_base("http://mirror.test/api/");
        let id = DatasetId::parse("owner/data").unwrap();
        assert_eq!(
            provider.download_url(&id),
            "http://mirror.test/api/datasets/download/owner/data"
        );
        assert_eq!(provider.dataset_dir_name("owner/data").unwrap(), "data");
    }
}
