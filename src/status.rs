use std::collections::BTreeMap;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use crate::models::NodeStatus;

/// Last status a node reported, as shown by the API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
  pub name: String,
  /// `None` when the last check could not reach the node.
  pub status: Option<NodeStatus>,
  pub updated_at: DateTime<Utc>,
}

/// Process-wide view of node statuses, shared between the dispatcher and the API.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
  inner: Arc<RwLock<BTreeMap<String, NodeSnapshot>>>,
}

impl StatusBoard {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn record(&self, name: &str, status: Option<NodeStatus>) {
    let snapshot = NodeSnapshot {
      name: name.to_string(),
      status,
      updated_at: Utc::now(),
    };
    self.inner.write().await.insert(name.to_string(), snapshot);
  }

  pub async fn get(&self, name: &str) -> Option<NodeSnapshot> {
    self.inner.read().await.get(name).cloned()
  }

  pub async fn snapshot(&self) -> Vec<NodeSnapshot> {
    self.inner.read().await.values().cloned().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn latest_status_replaces_previous() {
    let board = StatusBoard::new();
    board.record("beta", None).await;
    board.record("alpha", Some(NodeStatus { pending: 4, ..Default::default() })).await;
    board.record("alpha", None).await;

    let all = board.snapshot().await;
    assert_eq!(all.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["alpha", "beta"]);
    assert_eq!(board.get("alpha").await.unwrap().status, None);
  }
}
