//! Integration tests for configuration-driven connectors
//!
//! Tests use temporary directories with real file fixtures to verify:
//! - Config files wire up working file sources and publishers
//! - Positions from one source instance resume another
//! - Loader errors surface as configuration errors

use tempfile::TempDir;
use tether_core::config::EndOfDataPolicy;
use tether_core::{Config, ErrorKind, ReadOutcome, Record};

/// Helper to create a temporary project directory with a config and input file.
///
/// Returns a `TempDir` that automatically cleans up when dropped.
fn setup_project(config_yaml: &str, input: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("data")).unwrap();
    std::fs::write(dir.path().join("config.yaml"), config_yaml).unwrap();
    std::fs::write(dir.path().join("data/input.jsonl"), input).unwrap();
    dir
}

const CONFIG: &str = r#"
name: file-to-file
offset_commit_interval: 5
on_end_of_data: stop
source:
  type: file
  path: data/input.jsonl
publisher:
  type: file
  path: data/output.jsonl
"#;

const INPUT: &str = r#"{"key": 1, "value": 1}
{"key": 2, "value": 2}
{"key": 3, "value": 3}
"#;

// =============================================================================
// Config → Connectors
// =============================================================================

#[tokio::test]
async fn test_config_builds_working_pipeline_parts() {
    let dir = setup_project(CONFIG, INPUT);
    let config = Config::from_yaml_file(dir.path().join("config.yaml")).unwrap();
    assert_eq!(config.connector.on_end_of_data, EndOfDataPolicy::Stop);

    let mut source = config.source.build();
    let mut publisher = config.publisher.build();

    source.open().await.unwrap();
    let mut forwarded = Vec::new();
    while let ReadOutcome::Record(record) = source.read().await.unwrap() {
        publisher.publish(&record).await.unwrap();
        forwarded.push(record);
    }
    publisher.flush().await.unwrap();
    source.close().await.unwrap();
    publisher.close().await.unwrap();

    assert_eq!(
        forwarded,
        vec![Record::new(1, 1), Record::new(2, 2), Record::new(3, 3)]
    );

    let output = std::fs::read_to_string(dir.path().join("data/output.jsonl")).unwrap();
    let written: Vec<Record> = output
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(written, forwarded);
}

#[tokio::test]
async fn test_index_from_one_instance_resumes_another() {
    let dir = setup_project(CONFIG, INPUT);
    let config = Config::from_yaml_file(dir.path().join("config.yaml")).unwrap();

    let mut first = config.source.build();
    first.open().await.unwrap();
    first.read().await.unwrap();
    first.read().await.unwrap();
    let index = first.current_index();
    first.close().await.unwrap();

    // round-trip the index through its persisted form
    let stored = serde_json::to_string(&index).unwrap();
    let restored = serde_json::from_str(&stored).unwrap();

    let mut second = config.source.build();
    second.open().await.unwrap();
    second.seek(&restored).await.unwrap();
    assert_eq!(
        second.read().await.unwrap(),
        ReadOutcome::Record(Record::new(3, 3))
    );
    assert_eq!(second.read().await.unwrap(), ReadOutcome::EndOfData);
}

// =============================================================================
// Error Handling
// =============================================================================

#[tokio::test]
async fn test_missing_source_file_is_open_error() {
    let dir = setup_project(CONFIG, INPUT);
    std::fs::remove_file(dir.path().join("data/input.jsonl")).unwrap();
    let config = Config::from_yaml_file(dir.path().join("config.yaml")).unwrap();

    let mut source = config.source.build();
    let err = source.open().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Open);
    assert!(!err.is_transient());
}

#[test]
fn test_invalid_yaml_is_config_error() {
    let dir = setup_project("name: [unterminated\n", INPUT);
    let err = Config::from_yaml_file(dir.path().join("config.yaml")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_missing_publisher_section() {
    let yaml = CONFIG.replace("publisher:\n  type: file\n  path: data/output.jsonl\n", "");
    let dir = setup_project(&yaml, INPUT);
    let err = Config::from_yaml_file(dir.path().join("config.yaml")).unwrap_err();
    assert!(err.to_string().contains("publisher"));
}
