use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, warn};
use crate::assignment::assign_tasks;
use crate::availability::{Availability, AvailabilityTracker, TickAction};
use crate::collection::{ReportFetch, plan_collection};
use crate::config::DispatchSettings;
use crate::executor::AsyncExecutor;
use crate::models::{Node, NodeStatus, RemoteTask, Task};
use crate::node_client::NodeClient;
use crate::status::StatusBoard;
use crate::store::Store;
use crate::uptime::UptimeLog;

const TICK: Duration = Duration::from_secs(1);
const SETTLE_POLL: Duration = Duration::from_millis(50);

/// Result of a remote operation, handed back to the dispatcher.
#[derive(Debug)]
pub enum Completion {
  /// `None` when the node could not be reached.
  Status { node: Node, status: Option<NodeStatus> },
  Submitted { node: Node, task_id: i64, result: Result<i64> },
  Completed { node: Node, result: Result<Vec<RemoteTask>> },
  ReportStored { node: Node, fetch: ReportFetch, result: Result<PathBuf> },
  Deleted { node: Node, remote_id: i64, result: Result<()> },
  /// Everything of the node's round has been queued ahead of this.
  RoundFinished { node: Node },
}

/// Drives every enabled node through status check, assignment, collection
/// and cleanup. All state is owned here and only touched from `run`.
pub struct Dispatcher<S, C> {
  settings: DispatchSettings,
  store: Arc<S>,
  client: Arc<C>,
  executor: AsyncExecutor<Completion>,
  completions: mpsc::UnboundedReceiver<Completion>,
  availability: AvailabilityTracker,
  board: StatusBoard,
  uptime: Option<UptimeLog>,
}

impl<S, C> Dispatcher<S, C>
where
  S: Store + 'static,
  C: NodeClient + 'static,
{
  pub fn new(settings: DispatchSettings, store: Arc<S>, client: Arc<C>, board: StatusBoard) -> Self {
    let (executor, completions) = AsyncExecutor::new(settings.workers);
    let availability = AvailabilityTracker::new(settings.interval);
    Self {
      settings,
      store,
      client,
      executor,
      completions,
      availability,
      board,
      uptime: None,
    }
  }

  pub fn with_uptime_log(mut self, log: UptimeLog) -> Self {
    self.uptime = Some(log);
    self
  }

  pub fn availability(&self, node: &str) -> Option<Availability> {
    self.availability.state(node)
  }

  /// Ticks once a second until `running` is cleared, then drains.
  pub async fn run(mut self, running: Arc<AtomicBool>) {
    info!(
      "Dispatcher started: interval {}s, batch size {}, {} workers",
      self.settings.interval, self.settings.batch_size, self.settings.workers
    );
    let mut ticker = interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while running.load(Ordering::SeqCst) {
      tokio::select! {
        _ = ticker.tick() => {
          if let Err(e) = self.tick().await {
            error!("Scheduling tick failed: {:#}", e);
          }
        }
        Some(completion) = self.completions.recv() => self.handle(completion).await,
      }
    }

    self.shutdown().await;
  }

  /// One scheduling pass over the enabled nodes. Nodes are reloaded every
  /// time so they can be added or disabled on the fly.
  pub async fn tick(&mut self) -> Result<()> {
    let nodes = self.store.enabled_nodes().await?;
    let enabled: HashSet<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
    self.availability.retain(&enabled);

    for node in &nodes {
      let tick = self.availability.tick(&node.name);
      if tick.discovered {
        info!("Detected node '{}': {}", node.name, node.url);
      }
      match tick.action {
        TickAction::Due => self.check_status(node.clone()),
        TickAction::Waiting(remaining) => debug!("Node waiting ({}): {}", remaining, node.name),
        TickAction::Busy => debug!("Node is currently processing: {}", node.name),
      }
    }
    Ok(())
  }

  pub async fn handle(&mut self, completion: Completion) {
    match completion {
      Completion::Status { node, status } => {
        if let Err(e) = self.on_status(&node, status).await {
          error!("Round for node {} aborted: {:#}", node.name, e);
          self.availability.mark_available(&node.name);
        }
      }
      Completion::Submitted { node, task_id, result } => {
        if let Err(e) = self.on_submitted(&node, task_id, result).await {
          error!("Failed to record submission of task {} to node {}: {:#}", task_id, node.name, e);
        }
      }
      Completion::Completed { node, result } => {
        if let Err(e) = self.on_completed(&node, result).await {
          error!("Collection for node {} aborted: {:#}", node.name, e);
          self.availability.mark_available(&node.name);
        }
      }
      Completion::ReportStored { node, fetch, result } => self.on_report_stored(node, fetch, result),
      Completion::Deleted { node, remote_id, result } => match result {
        Ok(()) => debug!("Node {} task #{} deleted", node.name, remote_id),
        Err(e) => warn!("Failed to delete task #{} on node {}: {:#}", remote_id, node.name, e),
      },
      Completion::RoundFinished { node } => {
        debug!("Logging node {} as available", node.name);
        self.availability.mark_available(&node.name);
      }
    }
  }

  /// Stops submitting new work and handles completions until nothing is outstanding.
  pub async fn shutdown(&mut self) {
    info!(
      "Dispatcher stopping, waiting for {} outstanding operation(s)",
      self.executor.outstanding()
    );
    self.executor.close();
    self.settle().await;
    info!("Dispatcher stopped");
  }

  /// Handles completions until no operation is outstanding and the queue is
  /// empty. Work submitted by the handlers is waited for too.
  pub async fn settle(&mut self) {
    loop {
      match self.completions.try_recv() {
        Ok(completion) => {
          self.handle(completion).await;
          continue;
        }
        Err(_) if self.executor.outstanding() == 0 => {
          // Messages are sent before the counter drops, so one may have
          // landed since the first look.
          match self.completions.try_recv() {
            Ok(completion) => {
              self.handle(completion).await;
              continue;
            }
            Err(_) => break,
          }
        }
        Err(_) => {}
      }
      if let Ok(Some(completion)) = timeout(SETTLE_POLL, self.completions.recv()).await {
        self.handle(completion).await;
      }
    }
  }

  fn check_status(&mut self, node: Node) {
    let name = node.name.clone();
    let client = self.client.clone();
    let target = node.clone();
    let submitted = self.executor.submit(
      async move { client.status(&target).await },
      move |result| {
        let status = match result {
          Ok(status) => Some(status),
          Err(e) => {
            warn!("Node {} status check failed: {:#}", node.name, e);
            None
          }
        };
        Completion::Status { node, status }
      },
    );
    if !submitted {
      self.availability.mark_available(&name);
    }
  }

  async fn on_status(&mut self, node: &Node, status: Option<NodeStatus>) -> Result<()> {
    self.board.record(&node.name, status.clone()).await;
    if let Some(uptime) = &self.uptime {
      uptime.record(&node.name, status.as_ref()).await;
    }
    debug!("Node {} status {:?}", node.name, status);

    let Some(status) = status else {
      self.availability.mark_available(&node.name);
      return Ok(());
    };

    self.availability.begin_round(&node.name);
    if self.executor.is_closed() {
      return Ok(());
    }

    let batch_size = self.settings.batch_size;
    if status.pending < batch_size as u64 {
      for task in assign_tasks(self.store.as_ref(), node, batch_size).await? {
        self.submit_task(node, task);
      }
    }

    let client = self.client.clone();
    let target = node.clone();
    let owner = node.clone();
    let submitted = self.executor.submit(
      async move { client.completed_tasks(&target).await },
      move |result| Completion::Completed { node: owner, result },
    );
    if !submitted {
      self.availability.mark_available(&node.name);
    }
    Ok(())
  }

  fn submit_task(&self, node: &Node, task: Task) {
    let client = self.client.clone();
    let target = node.clone();
    let owner = node.clone();
    let task_id = task.id;
    self.executor.submit(
      async move { client.submit_task(&target, &task).await },
      move |result| Completion::Submitted { node: owner, task_id, result },
    );
  }

  async fn on_submitted(&mut self, node: &Node, task_id: i64, result: Result<i64>) -> Result<()> {
    match result {
      Ok(remote_id) => {
        self.store.set_remote_id(task_id, remote_id).await?;
        debug!("Node {} task {} -> {}", node.name, remote_id, task_id);
      }
      Err(e) => {
        warn!("Submitting task {} to node {} failed: {:#}", task_id, node.name, e);
        if self.settings.release_on_submit_failure {
          self.store.release_task(task_id).await?;
          info!("Task {} released back to the pending pool", task_id);
        }
      }
    }
    Ok(())
  }

  async fn on_completed(&mut self, node: &Node, result: Result<Vec<RemoteTask>>) -> Result<()> {
    if self.executor.is_closed() {
      debug!("Shutting down, leaving results of node {} for the next run", node.name);
      return Ok(());
    }

    let completed = match result {
      Ok(completed) => completed,
      Err(e) => {
        warn!("Fetching completed tasks from node {} failed: {:#}", node.name, e);
        self.availability.mark_available(&node.name);
        return Ok(());
      }
    };

    let plan = plan_collection(
      self.store.as_ref(),
      node,
      &completed,
      &self.settings.reports_dir,
      &self.settings.report_formats,
    )
    .await?;

    if !completed.is_empty() {
      info!(
        "Node {} reported {} finished task(s), {} not ours",
        node.name,
        plan.finished.len(),
        plan.orphans.len()
      );
    }

    for remote_id in plan.orphans {
      self.delete_task(node, remote_id);
    }
    for fetch in plan.fetches {
      self.fetch_report(node, fetch);
    }

    let owner = node.clone();
    let submitted = self.executor.submit(
      async { Ok(()) },
      move |_: Result<()>| Completion::RoundFinished { node: owner },
    );
    if !submitted {
      self.availability.mark_available(&node.name);
    }
    Ok(())
  }

  fn fetch_report(&self, node: &Node, fetch: ReportFetch) {
    let client = self.client.clone();
    let target = node.clone();
    let owner = node.clone();
    let remote_id = fetch.remote_id;
    let format = fetch.format.clone();
    let dir = fetch.dir.clone();
    self.executor.submit(
      async move { client.fetch_report(&target, remote_id, &format, &dir).await },
      move |result| Completion::ReportStored { node: owner, fetch, result },
    );
  }

  fn on_report_stored(&self, node: Node, fetch: ReportFetch, result: Result<PathBuf>) {
    match result {
      Ok(path) => {
        debug!("Stored {} report of task {} at {}", fetch.format, fetch.task_id, path.display());
        // One delete per format; deletes are idempotent on the node.
        self.delete_task(&node, fetch.remote_id);
      }
      Err(e) => warn!(
        "Fetching {} report of task #{} from node {} failed: {:#}",
        fetch.format, fetch.remote_id, node.name, e
      ),
    }
  }

  fn delete_task(&self, node: &Node, remote_id: i64) {
    let client = self.client.clone();
    let target = node.clone();
    let owner = node.clone();
    self.executor.submit(
      async move { client.delete_task(&target, remote_id).await },
      move |result| Completion::Deleted { node: owner, remote_id, result },
    );
  }
}
