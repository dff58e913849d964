use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, multipart};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use crate::models::{Node, NodeStatus, RemoteTask, Task};

/// The remote operations a sandbox node exposes.
#[async_trait]
pub trait NodeClient: Send + Sync {
  async fn status(&self, node: &Node) -> Result<NodeStatus>;

  /// Uploads the task and returns the node's identifier for it.
  async fn submit_task(&self, node: &Node, task: &Task) -> Result<i64>;

  /// Tasks whose reports are ready on the node.
  async fn completed_tasks(&self, node: &Node) -> Result<Vec<RemoteTask>>;

  async fn fetch_report(&self, node: &Node, remote_id: i64, format: &str, dir: &Path) -> Result<PathBuf>;

  /// Removes the task from the node. Deleting an already deleted task succeeds.
  async fn delete_task(&self, node: &Node, remote_id: i64) -> Result<()>;
}

#[derive(Deserialize)]
struct StatusResponse {
  tasks: NodeStatus,
}

#[derive(Deserialize)]
struct SubmitResponse {
  task_id: i64,
}

#[derive(Deserialize)]
struct TaskListResponse {
  #[serde(default)]
  tasks: Vec<RemoteTask>,
}

#[derive(Clone)]
pub struct HttpNodeClient {
  http: Client,
}

impl HttpNodeClient {
  pub fn new(timeout: Duration) -> Result<Self> {
    let http = Client::builder()
      .timeout(timeout)
      .build()
      .context("Failed to build HTTP client")?;
    Ok(Self { http })
  }
}

fn endpoint(node: &Node, path: &str) -> String {
  format!("{}/{}", node.url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Where a fetched report of `format` is stored inside the task directory.
pub fn report_path(dir: &Path, format: &str) -> PathBuf {
  dir.join(format!("report.{}", format))
}

fn delete_outcome(status: StatusCode) -> Result<()> {
  if status.is_success() || status == StatusCode::NOT_FOUND {
    Ok(())
  } else {
    bail!("delete returned {}", status)
  }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
  async fn status(&self, node: &Node) -> Result<NodeStatus> {
    let response: StatusResponse = self
      .http
      .get(endpoint(node, "cuckoo/status"))
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;
    Ok(response.tasks)
  }

  async fn submit_task(&self, node: &Node, task: &Task) -> Result<i64> {
    let content = tokio::fs::read(&task.path)
      .await
      .with_context(|| format!("Failed to read sample {}", task.path))?;

    let mut form = multipart::Form::new()
      .part("file", multipart::Part::bytes(content).file_name(task.upload_name()))
      .text("priority", task.priority.to_string());
    if let Some(package) = &task.package {
      form = form.text("package", package.clone());
    }
    if let Some(timeout) = task.timeout {
      form = form.text("timeout", timeout.to_string());
    }
    if let Some(options) = &task.options {
      form = form.text("options", options.clone());
    }

    let response: SubmitResponse = self
      .http
      .post(endpoint(node, "tasks/create/file"))
      .multipart(form)
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;
    debug!("Node {} accepted task {} as {}", node.name, task.id, response.task_id);
    Ok(response.task_id)
  }

  async fn completed_tasks(&self, node: &Node) -> Result<Vec<RemoteTask>> {
    let response: TaskListResponse = self
      .http
      .get(endpoint(node, "tasks/list"))
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;
    Ok(response.tasks.into_iter().filter(RemoteTask::is_reported).collect())
  }

  /// Streams the report to disk chunk by chunk; reports can be large.
  async fn fetch_report(&self, node: &Node, remote_id: i64, format: &str, dir: &Path) -> Result<PathBuf> {
    let mut response = self
      .http
      .get(endpoint(node, &format!("tasks/report/{}/{}", remote_id, format)))
      .send()
      .await?
      .error_for_status()?;

    let path = report_path(dir, format);
    let mut file = tokio::fs::File::create(&path)
      .await
      .with_context(|| format!("Failed to create {}", path.display()))?;
    while let Some(chunk) = response.chunk().await? {
      file
        .write_all(&chunk)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    file.flush().await?;
    Ok(path)
  }

  async fn delete_task(&self, node: &Node, remote_id: i64) -> Result<()> {
    let response = self
      .http
      .get(endpoint(node, &format!("tasks/delete/{}", remote_id)))
      .send()
      .await?;
    delete_outcome(response.status())
  }
}
