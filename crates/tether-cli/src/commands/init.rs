//! Initialize a new connector project

use anyhow::Result;
use std::fs;
use std::path::Path;

/// Run the init command
pub async fn run(path: &str, name: Option<&str>) -> Result<()> {
    let project_dir = Path::new(path);

    if !project_dir.exists() {
        fs::create_dir_all(project_dir)?;
    }

    let abs_path = project_dir.canonicalize()?;

    // Derive connector name from directory name if not provided
    let connector_name = match name {
        Some(n) => n.to_string(),
        None => abs_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Could not determine connector name from path"))?,
    };

    if project_dir.join("config.yaml").exists() {
        anyhow::bail!(
            "Directory '{}' already contains a config.yaml",
            project_dir.display()
        );
    }

    tracing::info!("Creating new connector project: {}", connector_name);

    // Relative paths are resolved against this file's directory
    let config = format!(
        r#"# Tether connector configuration
name: {connector_name}

# Commit the read position at most this often (and once more on stop)
offset_commit_interval: 30m

# What to do when the source has no more data: stop | wait_and_retry
on_end_of_data: stop
poll_interval: 1s

source:
  type: file
  path: data/input.jsonl

publisher:
  type: file
  path: data/output.jsonl

offsets:
  type: file
  path: .tether/offsets.jsonl

# Retry budgets for transient failures
publish_retry:
  max_retries: 3
  initial_backoff: 100ms
  max_backoff: 30s
commit_retry:
  max_retries: 2

unify_logging: false
"#
    );
    fs::write(project_dir.join("config.yaml"), config)?;

    fs::create_dir_all(project_dir.join("data"))?;
    let sample_data = r#"{"key": 1, "value": {"message": "Hello, Tether!"}}
{"key": 2, "value": {"message": "Positions are committed after every flush"}}
{"key": 3, "value": {"message": "Restarts resume after the last commit"}}
"#;
    fs::write(project_dir.join("data/input.jsonl"), sample_data)?;

    let gitignore = r#"# Tether committed positions
.tether/

# Output files
data/output*.jsonl
"#;
    fs::write(project_dir.join(".gitignore"), gitignore)?;

    tracing::info!(
        "✓ Created connector '{}' at {}",
        connector_name,
        abs_path.display()
    );
    tracing::info!("");
    tracing::info!("Next steps:");
    if path != "." {
        tracing::info!("  cd {}", project_dir.display());
    }
    tracing::info!("  tether validate    # Check configuration");
    tracing::info!("  tether run         # Forward records");

    Ok(())
}
