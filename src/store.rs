use std::collections::BTreeMap;
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use crate::models::{DEFAULT_PRIORITY, NewTask, Node, Task};

/// Node and task records. Every method commits before it returns.
#[async_trait]
pub trait Store: Send + Sync {
  async fn add_node(&self, name: &str, url: &str) -> Result<Node>;

  async fn enabled_nodes(&self) -> Result<Vec<Node>>;

  async fn create_task(&self, task: NewTask) -> Result<Task>;

  async fn task(&self, id: i64) -> Result<Option<Task>>;

  /// Unassigned, unfinished, default-priority tasks, oldest id first.
  async fn pending_tasks(&self, limit: usize) -> Result<Vec<Task>>;

  /// Assigns the given tasks to `node_id` in one batch. Tasks that already
  /// carry a node are left untouched; returns the ids actually assigned.
  async fn assign_tasks(&self, node_id: i64, task_ids: &[i64]) -> Result<Vec<i64>>;

  async fn set_remote_id(&self, task_id: i64, remote_id: i64) -> Result<()>;

  /// Puts an unfinished task back in the unassigned pool.
  async fn release_task(&self, task_id: i64) -> Result<()>;

  async fn task_by_remote_id(&self, node_id: i64, remote_id: i64) -> Result<Option<Task>>;

  async fn mark_finished(&self, task_ids: &[i64]) -> Result<()>;
}

#[derive(Default)]
struct Records {
  nodes: BTreeMap<i64, Node>,
  tasks: BTreeMap<i64, Task>,
  next_node_id: i64,
  next_task_id: i64,
}

/// Process-local store, for `DATABASE_URL=memory` and tests.
#[derive(Default)]
pub struct MemoryStore {
  records: Mutex<Records>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn set_enabled(&self, node_id: i64, enabled: bool) -> Result<()> {
    let mut records = self.records.lock().await;
    match records.nodes.get_mut(&node_id) {
      Some(node) => {
        node.enabled = enabled;
        Ok(())
      }
      None => bail!("node {} does not exist", node_id),
    }
  }

  pub async fn tasks(&self) -> Vec<Task> {
    self.records.lock().await.tasks.values().cloned().collect()
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn add_node(&self, name: &str, url: &str) -> Result<Node> {
    let mut records = self.records.lock().await;
    if records.nodes.values().any(|n| n.name == name) {
      bail!("node {} already exists", name);
    }
    records.next_node_id += 1;
    let node = Node {
      id: records.next_node_id,
      name: name.to_string(),
      url: url.to_string(),
      enabled: true,
    };
    records.nodes.insert(node.id, node.clone());
    Ok(node)
  }

  async fn enabled_nodes(&self) -> Result<Vec<Node>> {
    let records = self.records.lock().await;
    Ok(records.nodes.values().filter(|n| n.enabled).cloned().collect())
  }

  async fn create_task(&self, task: NewTask) -> Result<Task> {
    let mut records = self.records.lock().await;
    records.next_task_id += 1;
    let task = Task {
      id: records.next_task_id,
      path: task.path,
      filename: task.filename,
      package: task.package,
      timeout: task.timeout,
      options: task.options,
      priority: task.priority.unwrap_or(DEFAULT_PRIORITY),
      node_id: None,
      remote_id: None,
      finished: false,
      created_at: Utc::now(),
    };
    records.tasks.insert(task.id, task.clone());
    Ok(task)
  }

  async fn task(&self, id: i64) -> Result<Option<Task>> {
    Ok(self.records.lock().await.tasks.get(&id).cloned())
  }

  async fn pending_tasks(&self, limit: usize) -> Result<Vec<Task>> {
    let records = self.records.lock().await;
    Ok(records
      .tasks
      .values()
      .filter(|t| t.is_pending())
      .take(limit)
      .cloned()
      .collect())
  }

  async fn assign_tasks(&self, node_id: i64, task_ids: &[i64]) -> Result<Vec<i64>> {
    let mut records = self.records.lock().await;
    let mut assigned = Vec::with_capacity(task_ids.len());
    for id in task_ids {
      if let Some(task) = records.tasks.get_mut(id) {
        if task.node_id.is_none() {
          task.node_id = Some(node_id);
          assigned.push(*id);
        }
      }
    }
    Ok(assigned)
  }

  async fn set_remote_id(&self, task_id: i64, remote_id: i64) -> Result<()> {
    let mut records = self.records.lock().await;
    match records.tasks.get_mut(&task_id) {
      Some(task) => {
        task.remote_id = Some(remote_id);
        Ok(())
      }
      None => bail!("task {} does not exist", task_id),
    }
  }

  async fn release_task(&self, task_id: i64) -> Result<()> {
    let mut records = self.records.lock().await;
    if let Some(task) = records.tasks.get_mut(&task_id) {
      if !task.finished {
        task.node_id = None;
        task.remote_id = None;
      }
    }
    Ok(())
  }

  async fn task_by_remote_id(&self, node_id: i64, remote_id: i64) -> Result<Option<Task>> {
    let records = self.records.lock().await;
    Ok(records
      .tasks
      .values()
      .find(|t| t.node_id == Some(node_id) && t.remote_id == Some(remote_id))
      .cloned())
  }

  async fn mark_finished(&self, task_ids: &[i64]) -> Result<()> {
    let mut records = self.records.lock().await;
    for id in task_ids {
      if let Some(task) = records.tasks.get_mut(id) {
        task.finished = true;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
pub(crate) fn new_task(path: &str) -> NewTask {
  NewTask {
    path: path.to_string(),
    filename: None,
    package: None,
    timeout: None,
    options: None,
    priority: None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio_test::{assert_err, assert_ok};

  #[tokio::test]
  async fn pending_tasks_are_oldest_first_and_limited() {
    let store = MemoryStore::new();
    for i in 0..5 {
      store.create_task(new_task(&format!("/s/{}", i))).await.unwrap();
    }
    let mut high = new_task("/s/high");
    high.priority = Some(2);
    store.create_task(high).await.unwrap();

    let pending = store.pending_tasks(3).await.unwrap();
    let ids: Vec<i64> = pending.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(store.pending_tasks(100).await.unwrap().len(), 5);
  }

  #[tokio::test]
  async fn assignment_never_overwrites_an_existing_node() {
    let store = MemoryStore::new();
    let task = store.create_task(new_task("/s/a")).await.unwrap();

    assert_eq!(store.assign_tasks(1, &[task.id]).await.unwrap(), vec![task.id]);
    assert!(store.assign_tasks(2, &[task.id]).await.unwrap().is_empty());
    assert_eq!(store.task(task.id).await.unwrap().unwrap().node_id, Some(1));
  }

  #[tokio::test]
  async fn release_skips_finished_tasks() {
    let store = MemoryStore::new();
    let a = store.create_task(new_task("/s/a")).await.unwrap();
    let b = store.create_task(new_task("/s/b")).await.unwrap();
    store.assign_tasks(1, &[a.id, b.id]).await.unwrap();
    store.mark_finished(&[b.id]).await.unwrap();

    assert_ok!(store.release_task(a.id).await);
    assert_ok!(store.release_task(b.id).await);

    assert_eq!(store.task(a.id).await.unwrap().unwrap().node_id, None);
    assert_eq!(store.task(b.id).await.unwrap().unwrap().node_id, Some(1));
  }

  #[tokio::test]
  async fn duplicate_node_names_are_rejected() {
    let store = MemoryStore::new();
    store.add_node("alpha", "http://a").await.unwrap();
    assert_err!(store.add_node("alpha", "http://b").await);
  }
}
