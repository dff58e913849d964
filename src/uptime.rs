use std::path::PathBuf;
use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use crate::models::NodeStatus;

/// Append-only JSON-lines record of every status check.
#[derive(Debug, Clone)]
pub struct UptimeLog {
  path: PathBuf,
}

impl UptimeLog {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// Write failures are logged and swallowed; they never stop scheduling.
  pub async fn record(&self, name: &str, status: Option<&NodeStatus>) {
    if let Err(e) = self.append(name, status).await {
      warn!("Error dumping uptime for node {:?}: {:#}", name, e);
    }
  }

  async fn append(&self, name: &str, status: Option<&NodeStatus>) -> Result<()> {
    let line = json!({
      "timestamp": Utc::now().timestamp(),
      "name": name,
      "status": status,
    });
    let mut file = tokio::fs::OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)
      .await?;
    file.write_all(format!("{}\n", line).as_bytes()).await?;
    file.flush().await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn appends_one_line_per_check() {
    let dir = tempfile::tempdir().unwrap();
    let log = UptimeLog::new(dir.path().join("uptime.jsonl"));
    log.record("alpha", Some(&NodeStatus { pending: 2, ..Default::default() })).await;
    log.record("alpha", None).await;

    let content = tokio::fs::read_to_string(dir.path().join("uptime.jsonl")).await.unwrap();
    let lines: Vec<serde_json::Value> = content
      .lines()
      .map(|l| serde_json::from_str(l).unwrap())
      .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["status"]["pending"], 2);
    assert!(lines[1]["status"].is_null());
  }

  #[tokio::test]
  async fn unwritable_path_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let log = UptimeLog::new(dir.path().join("missing").join("uptime.jsonl"));
    log.record("alpha", None).await;
    assert!(!dir.path().join("missing").exists());
  }
}
