use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use rstest::rstest;
use std::io::Write;
use std::path::Path;

fn output_lines(dir: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(dir.join("data/output.jsonl"))
        .unwrap_or_default()
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn conf_file(dir: &Path) -> String {
    dir.join("config.yaml").to_str().unwrap().to_string()
}

#[test]
fn test_init_run_and_resume() {
    let dir = tempfile::tempdir().unwrap();

    cargo_bin_cmd!("tether")
        .args(["init", dir.path().to_str().unwrap(), "--name", "orders"])
        .assert()
        .success();

    assert!(dir.path().join("config.yaml").exists());
    assert!(dir.path().join("data/input.jsonl").exists());

    cargo_bin_cmd!("tether")
        .args(["--conf-file", &conf_file(dir.path()), "run"])
        .assert()
        .success();

    let lines = output_lines(dir.path());
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["key"], 1);
    assert_eq!(lines[0]["value"]["message"], "Hello, Tether!");
    assert_eq!(lines[2]["key"], 3);

    // second run resumes at the committed position: nothing new to publish
    cargo_bin_cmd!("tether")
        .args(["--conf-file", &conf_file(dir.path()), "run"])
        .assert()
        .success();
    assert_eq!(output_lines(dir.path()).len(), 3);

    let mut input = std::fs::OpenOptions::new()
        .append(true)
        .open(dir.path().join("data/input.jsonl"))
        .unwrap();
    writeln!(input, r#"{{"key": 4, "value": {{"message": "late arrival"}}}}"#).unwrap();

    cargo_bin_cmd!("tether")
        .args(["--conf-file", &conf_file(dir.path()), "run"])
        .assert()
        .success();

    let lines = output_lines(dir.path());
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[3]["key"], 4);
}

#[test]
fn test_offsets_prints_committed_position() {
    let dir = tempfile::tempdir().unwrap();
    cargo_bin_cmd!("tether")
        .args(["init", dir.path().to_str().unwrap(), "--name", "orders"])
        .assert()
        .success();

    cargo_bin_cmd!("tether")
        .args(["--conf-file", &conf_file(dir.path()), "offsets"])
        .assert()
        .success()
        .stdout("none\n");

    cargo_bin_cmd!("tether")
        .args(["--conf-file", &conf_file(dir.path()), "run"])
        .assert()
        .success();

    let input_len = std::fs::metadata(dir.path().join("data/input.jsonl"))
        .unwrap()
        .len();
    cargo_bin_cmd!("tether")
        .args(["--conf-file", &conf_file(dir.path()), "offsets"])
        .assert()
        .success()
        .stdout(format!("{input_len}\n"));

    // another identity has no commits
    cargo_bin_cmd!("tether")
        .args([
            "--conf-file",
            &conf_file(dir.path()),
            "offsets",
            "--connector",
            "payments",
        ])
        .assert()
        .success()
        .stdout("none\n");
}

#[test]
fn test_validate() {
    let dir = tempfile::tempdir().unwrap();
    cargo_bin_cmd!("tether")
        .args(["init", dir.path().to_str().unwrap()])
        .assert()
        .success();

    cargo_bin_cmd!("tether")
        .args(["--conf-file", &conf_file(dir.path()), "validate"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_init_refuses_existing_project() {
    let dir = tempfile::tempdir().unwrap();
    cargo_bin_cmd!("tether")
        .args(["init", dir.path().to_str().unwrap()])
        .assert()
        .success();

    cargo_bin_cmd!("tether")
        .args(["init", dir.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already contains a config.yaml"));
}

#[rstest]
#[case::yaml("yaml", "config.yaml")]
#[case::json("json", "config.json")]
fn test_missing_config_exits_with_one(#[case] format: &str, #[case] file: &str) {
    let dir = tempfile::tempdir().unwrap();
    cargo_bin_cmd!("tether")
        .current_dir(dir.path())
        .args(["--config", format, "run"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains(file));
}

#[test]
fn test_connector_failure_exits_with_two() {
    let dir = tempfile::tempdir().unwrap();
    cargo_bin_cmd!("tether")
        .args(["init", dir.path().to_str().unwrap(), "--name", "orders"])
        .assert()
        .success();
    std::fs::write(dir.path().join("data/input.jsonl"), "{not json}\n").unwrap();

    cargo_bin_cmd!("tether")
        .args(["--conf-file", &conf_file(dir.path()), "run"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("connector 'orders' failed"));
}

#[test]
fn test_env_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("data")).unwrap();
    std::fs::write(
        dir.path().join("data/input.jsonl"),
        "{\"key\": \"a\", \"value\": 1}\n",
    )
    .unwrap();

    cargo_bin_cmd!("tether")
        .current_dir(dir.path())
        .env("TETHER_NAME", "from-env")
        .env("TETHER_SOURCE__TYPE", "file")
        .env("TETHER_SOURCE__PATH", "data/input.jsonl")
        .env("TETHER_PUBLISHER__TYPE", "file")
        .env("TETHER_PUBLISHER__PATH", "data/output.jsonl")
        .args(["--config", "env", "run"])
        .assert()
        .success();

    let lines = output_lines(dir.path());
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["key"], "a");
}
