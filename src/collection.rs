use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use tracing::debug;
use crate::models::{Node, RemoteTask};
use crate::store::Store;

/// One report to download for a finished task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFetch {
  pub task_id: i64,
  pub remote_id: i64,
  pub format: String,
  pub dir: PathBuf,
}

/// Remote work that follows from a node's list of completed tasks.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CollectionPlan {
  /// Remote ids this scheduler never submitted; deleted without fetching.
  pub orphans: Vec<i64>,
  pub fetches: Vec<ReportFetch>,
  pub finished: Vec<i64>,
}

pub fn task_report_dir(reports_root: &Path, task_id: i64) -> PathBuf {
  reports_root.join(task_id.to_string())
}

/// Matches completed remote tasks to local ones, prepares their report
/// directories and commits their finished flag.
pub async fn plan_collection<S: Store + ?Sized>(
  store: &S,
  node: &Node,
  completed: &[RemoteTask],
  reports_root: &Path,
  formats: &[String],
) -> Result<CollectionPlan> {
  let mut plan = CollectionPlan::default();

  for remote in completed {
    let Some(task) = store.task_by_remote_id(node.id, remote.id).await? else {
      debug!("Node {} task #{} was not submitted by us", node.name, remote.id);
      plan.orphans.push(remote.id);
      continue;
    };

    let dir = task_report_dir(reports_root, task.id);
    tokio::fs::create_dir_all(&dir)
      .await
      .with_context(|| format!("Failed to create {}", dir.display()))?;

    for format in formats {
      plan.fetches.push(ReportFetch {
        task_id: task.id,
        remote_id: remote.id,
        format: format.clone(),
        dir: dir.clone(),
      });
    }
    plan.finished.push(task.id);
  }

  store.mark_finished(&plan.finished).await?;
  Ok(plan)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::{MemoryStore, new_task};

  fn remote(id: i64) -> RemoteTask {
    RemoteTask { id, status: "reported".into() }
  }

  #[tokio::test]
  async fn unknown_remote_tasks_become_orphans() {
    let store = MemoryStore::new();
    let node = store.add_node("alpha", "http://alpha").await.unwrap();
    let reports = tempfile::tempdir().unwrap();

    let plan = plan_collection(&store, &node, &[remote(99)], reports.path(), &["json".into()])
      .await
      .unwrap();

    assert_eq!(plan.orphans, vec![99]);
    assert!(plan.fetches.is_empty());
    assert!(store.tasks().await.is_empty());
  }

  #[tokio::test]
  async fn known_tasks_get_one_fetch_per_format() {
    let store = MemoryStore::new();
    let node = store.add_node("alpha", "http://alpha").await.unwrap();
    let task = store.create_task(new_task("/samples/a")).await.unwrap();
    store.assign_tasks(node.id, &[task.id]).await.unwrap();
    store.set_remote_id(task.id, 41).await.unwrap();
    let reports = tempfile::tempdir().unwrap();
    let formats = vec!["json".to_string(), "html".to_string()];

    let plan = plan_collection(&store, &node, &[remote(41)], reports.path(), &formats)
      .await
      .unwrap();

    let dir = task_report_dir(reports.path(), task.id);
    assert!(dir.is_dir());
    assert_eq!(plan.fetches.len(), 2);
    assert!(plan.fetches.iter().all(|f| f.remote_id == 41 && f.dir == dir));
    assert_eq!(plan.finished, vec![task.id]);
    assert!(store.task(task.id).await.unwrap().unwrap().finished);
  }

  #[tokio::test]
  async fn remote_ids_are_scoped_to_their_node() {
    let store = MemoryStore::new();
    let alpha = store.add_node("alpha", "http://alpha").await.unwrap();
    let beta = store.add_node("beta", "http://beta").await.unwrap();
    let task = store.create_task(new_task("/samples/a")).await.unwrap();
    store.assign_tasks(alpha.id, &[task.id]).await.unwrap();
    store.set_remote_id(task.id, 5).await.unwrap();
    let reports = tempfile::tempdir().unwrap();

    let plan = plan_collection(&store, &beta, &[remote(5)], reports.path(), &["json".into()])
      .await
      .unwrap();

    assert_eq!(plan.orphans, vec![5]);
    assert!(!store.task(task.id).await.unwrap().unwrap().finished);
  }
}
