use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};

/// Priority class serviced by the dispatcher; other classes are never auto-assigned.
pub const DEFAULT_PRIORITY: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Node {
  pub id: i64,
  pub name: String,
  pub url: String,
  pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
  pub id: i64,
  pub path: String,
  pub filename: Option<String>,
  pub package: Option<String>,
  pub timeout: Option<i32>,
  pub options: Option<String>,
  pub priority: i32,
  /// Node the task was handed to. Set once, never reassigned while unfinished.
  pub node_id: Option<i64>,
  /// Identifier the node gave the task on submission.
  pub remote_id: Option<i64>,
  pub finished: bool,
  pub created_at: DateTime<Utc>,
}

impl Task {
  pub fn is_pending(&self) -> bool {
    self.node_id.is_none() && !self.finished && self.priority == DEFAULT_PRIORITY
  }

  /// Name the sample is uploaded under.
  pub fn upload_name(&self) -> String {
    if let Some(name) = self.filename.as_deref().filter(|n| !n.is_empty()) {
      return name.to_string();
    }
    std::path::Path::new(&self.path)
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| format!("task-{}", self.id))
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
  pub path: String,
  pub filename: Option<String>,
  pub package: Option<String>,
  pub timeout: Option<i32>,
  pub options: Option<String>,
  pub priority: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewNode {
  pub name: String,
  pub url: String,
}

/// Task counters a node reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
  #[serde(default)]
  pub total: u64,
  #[serde(default)]
  pub pending: u64,
  #[serde(default)]
  pub running: u64,
  #[serde(default)]
  pub completed: u64,
  #[serde(default)]
  pub reported: u64,
}

/// An entry of a node's own task list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTask {
  pub id: i64,
  #[serde(default)]
  pub status: String,
}

impl RemoteTask {
  pub fn is_reported(&self) -> bool {
    self.status == "reported"
  }
}
