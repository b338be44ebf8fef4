mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use common::{MockArchive, MockFetcher};
use etl_runner_core::{ConfigurationError, IfExists, QueueConfig, SourceKind, Transform};

fn demo_queue() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/queue.toml")
}

#[test]
fn demo_queue_builds_without_network() -> Result<()> {
    let http = Arc::new(MockFetcher::default());
    let archive = Arc::new(MockArchive::default());

    let config = QueueConfig::from_path(&demo_queue())?;
    let queue = config.build(&common::transport(&http, &archive))?;

    assert_eq!(queue.len(), 2);
    let songs = &queue.pipelines()[0];
    assert_eq!(songs.source().kind(), SourceKind::Archive);
    assert!(songs.transform().is_identity());
    assert!(!songs.source().files()[0].transform().is_identity());

    let weather = &queue.pipelines()[1];
    assert_eq!(weather.source().kind(), SourceKind::DirectDownload);
    assert!(matches!(weather.transform(), Transform::Steps(steps) if steps.len() == 2));
    let loader = weather.loader().expect("weather has a loader");
    assert_eq!(loader.if_exists(), IfExists::Replace);
    assert_eq!(loader.database_path(), Path::new("data").join("project.sqlite"));

    assert_eq!(http.calls() + archive.calls(), 0);
    Ok(())
}

#[test]
fn end_to_end_from_toml() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let url = "https://example.test/daily.csv";
    let http = Arc::new(MockFetcher::default().with(url, b"a;b;c\n1;x;2.5\n2;y;3.5\n".to_vec()));
    let archive = Arc::new(MockArchive::default());

    let mut config = QueueConfig::from_toml(&format!(
        r#"
        [[pipelines]]
        name = "Daily"
        url = "{url}"
        kind = "direct"

        [pipelines.loader]
        database = "daily.sqlite"
        table = "daily"
        if_exists = "append"
        index = true

        [[pipelines.files]]
        name = "daily.csv"
        separator = ";"
        dtypes = {{ a = "int32" }}
        transform = [{{ op = "select", columns = ["c", "a"] }}]
        "#
    ))?;
    config.override_output_dir(dir.path());

    let summary = config.build(&common::transport(&http, &archive))?.run()?;

    let database = dir.path().join("daily.sqlite");
    assert!(summary.succeeded());
    assert_eq!(common::column_names(&database, "daily")?, vec!["index", "c", "a"]);
    assert_eq!(common::row_count(&database, "daily")?, 2);
    assert!(!dir.path().join("daily.csv").exists());
    Ok(())
}

#[test]
fn malformed_definitions_are_configuration_errors() {
    let missing = QueueConfig::from_path(Path::new("/definitely/not/here.toml")).unwrap_err();
    assert!(matches!(missing, ConfigurationError::Read { .. }));

    let unknown_kind = QueueConfig::from_toml(
        r#"
        [[pipelines]]
        name = "x"
        url = "y"
        kind = "ftp"
        "#,
    )
    .unwrap_err();
    assert!(matches!(unknown_kind, ConfigurationError::Toml(_)));

    let wide_separator = QueueConfig::from_toml(
        r#"
        [[pipelines]]
        name = "x"
        url = "y"
        kind = "direct-download"

        [[pipelines.files]]
        name = "a.csv"
        separator = "||"
        "#,
    )
    .unwrap();
    let http = Arc::new(MockFetcher::default());
    let archive = Arc::new(MockArchive::default());
    assert!(matches!(
        wide_separator.build(&common::transport(&http, &archive)),
        Err(ConfigurationError::InvalidSeparator { .. })
    ));
}
