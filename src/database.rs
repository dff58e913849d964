use std::time::Duration;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use sqlx::migrate::Migrator;
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::info;
use crate::models::{DEFAULT_PRIORITY, NewTask, Node, Task};
use crate::store::Store;

static MIGRATOR: Migrator = sqlx::migrate!();

static MAX_RETRIES: usize = 5;
static DELAY: u64 = 100;

const TASK_COLUMNS: &str =
  "id, path, filename, package, timeout, options, priority, node_id, remote_id, finished, created_at";

/// Doubles from `DELAY` ms: 100, 200, 400, 800, 1600.
fn connect_backoff() -> impl Iterator<Item = Duration> {
  ExponentialBackoff::from_millis(2).factor(DELAY / 2).take(MAX_RETRIES)
}

pub async fn setup_database(database_url: &str) -> Result<Pool<Postgres>> {
  let pool = Retry::start(connect_backoff(), || {
    Pool::<Postgres>::connect(database_url)
  })
    .await
    .context("Failed to connect to database")?;

  MIGRATOR.run(&pool)
    .await
    .context("Failed to run database migrations")?;
  info!("Database migrations complete");
  Ok(pool)
}

#[derive(Clone)]
pub struct PgStore {
  pool: Pool<Postgres>,
}

impl PgStore {
  pub fn new(pool: Pool<Postgres>) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl Store for PgStore {
  async fn add_node(&self, name: &str, url: &str) -> Result<Node> {
    let node = sqlx::query_as::<_, Node>(
      "INSERT INTO nodes (name, url, enabled) VALUES ($1, $2, TRUE) RETURNING id, name, url, enabled",
    )
      .bind(name)
      .bind(url)
      .fetch_one(&self.pool)
      .await?;
    Ok(node)
  }

  async fn enabled_nodes(&self) -> Result<Vec<Node>> {
    let nodes = sqlx::query_as::<_, Node>(
      "SELECT id, name, url, enabled FROM nodes WHERE enabled = TRUE ORDER BY id",
    )
      .fetch_all(&self.pool)
      .await?;
    Ok(nodes)
  }

  async fn create_task(&self, task: NewTask) -> Result<Task> {
    let query = format!(
      "INSERT INTO tasks (path, filename, package, timeout, options, priority)
       VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
      TASK_COLUMNS
    );
    let task = sqlx::query_as::<_, Task>(&query)
      .bind(task.path)
      .bind(task.filename)
      .bind(task.package)
      .bind(task.timeout)
      .bind(task.options)
      .bind(task.priority.unwrap_or(DEFAULT_PRIORITY))
      .fetch_one(&self.pool)
      .await?;
    Ok(task)
  }

  async fn task(&self, id: i64) -> Result<Option<Task>> {
    let query = format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS);
    let task = sqlx::query_as::<_, Task>(&query)
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(task)
  }

  async fn pending_tasks(&self, limit: usize) -> Result<Vec<Task>> {
    let query = format!(
      "SELECT {} FROM tasks
       WHERE node_id IS NULL AND finished = FALSE AND priority = $1
       ORDER BY id LIMIT $2",
      TASK_COLUMNS
    );
    let tasks = sqlx::query_as::<_, Task>(&query)
      .bind(DEFAULT_PRIORITY)
      .bind(i64::try_from(limit).unwrap_or(i64::MAX))
      .fetch_all(&self.pool)
      .await?;
    Ok(tasks)
  }

  async fn assign_tasks(&self, node_id: i64, task_ids: &[i64]) -> Result<Vec<i64>> {
    let mut assigned = sqlx::query_scalar::<_, i64>(
      "UPDATE tasks SET node_id = $1 WHERE id = ANY($2) AND node_id IS NULL RETURNING id",
    )
      .bind(node_id)
      .bind(task_ids)
      .fetch_all(&self.pool)
      .await?;
    assigned.sort_unstable();
    Ok(assigned)
  }

  async fn set_remote_id(&self, task_id: i64, remote_id: i64) -> Result<()> {
    sqlx::query("UPDATE tasks SET remote_id = $1 WHERE id = $2")
      .bind(remote_id)
      .bind(task_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn release_task(&self, task_id: i64) -> Result<()> {
    sqlx::query("UPDATE tasks SET node_id = NULL, remote_id = NULL WHERE id = $1 AND finished = FALSE")
      .bind(task_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn task_by_remote_id(&self, node_id: i64, remote_id: i64) -> Result<Option<Task>> {
    let query = format!(
      "SELECT {} FROM tasks WHERE node_id = $1 AND remote_id = $2 ORDER BY id LIMIT 1",
      TASK_COLUMNS
    );
    let task = sqlx::query_as::<_, Task>(&query)
      .bind(node_id)
      .bind(remote_id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(task)
  }

  async fn mark_finished(&self, task_ids: &[i64]) -> Result<()> {
    if task_ids.is_empty() {
      return Ok(());
    }
    sqlx::query("UPDATE tasks SET finished = TRUE WHERE id = ANY($1)")
      .bind(task_ids)
      .execute(&self.pool)
      .await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio_test::assert_err;

  #[test]
  fn connect_retries_double_from_the_base_delay() {
    let delays: Vec<u64> = connect_backoff().map(|d| d.as_millis() as u64).collect();
    assert_eq!(delays, vec![100, 200, 400, 800, 1600]);
  }

  #[tokio::test]
  async fn unreachable_database_gives_up_after_retrying() {
    assert_err!(setup_database("postgres://sandfleet@127.0.0.1:1/sandfleet").await);
  }
}
