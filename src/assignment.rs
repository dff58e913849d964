use anyhow::Result;
use tracing::info;
use crate::models::{Node, Task};
use crate::store::Store;

/// Claims up to `count` pending tasks for `node`, oldest first.
///
/// The claim is committed before anything is sent to the node, so a task
/// whose submission later fails stays assigned unless the caller releases it.
pub async fn assign_tasks<S: Store + ?Sized>(store: &S, node: &Node, count: usize) -> Result<Vec<Task>> {
  if count == 0 {
    return Ok(Vec::new());
  }

  let candidates = store.pending_tasks(count).await?;
  if candidates.is_empty() {
    return Ok(Vec::new());
  }

  let ids: Vec<i64> = candidates.iter().map(|t| t.id).collect();
  let claimed = store.assign_tasks(node.id, &ids).await?;

  let mut tasks: Vec<Task> = candidates
    .into_iter()
    .filter(|t| claimed.contains(&t.id))
    .map(|mut t| {
      t.node_id = Some(node.id);
      t
    })
    .collect();
  tasks.sort_by_key(|t| t.id);

  if !tasks.is_empty() {
    info!("Assigned {} task(s) to node {}", tasks.len(), node.name);
  }
  Ok(tasks)
}
