//! Bounded pool for remote operations.
//!
//! Operation bodies run concurrently, at most `workers` at a time. Each one
//! turns into a single completion message on an unbounded channel whose one
//! receiver is handed back by [`AsyncExecutor::new`]. Whoever owns that
//! receiver handles completions one at a time, so completion handlers never
//! run concurrently with each other and can mutate shared state without a
//! lock.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use anyhow::Result;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, warn};

pub struct AsyncExecutor<M> {
  permits: Arc<Semaphore>,
  completions: mpsc::UnboundedSender<M>,
  outstanding: Arc<AtomicUsize>,
  closed: bool,
}

struct Outstanding(Arc<AtomicUsize>);

impl Drop for Outstanding {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}

impl<M: Send + 'static> AsyncExecutor<M> {
  pub fn new(workers: usize) -> (Self, mpsc::UnboundedReceiver<M>) {
    let (completions, receiver) = mpsc::unbounded_channel();
    let executor = Self {
      permits: Arc::new(Semaphore::new(workers.max(1))),
      completions,
      outstanding: Arc::new(AtomicUsize::new(0)),
      closed: false,
    };
    (executor, receiver)
  }

  /// Queues `operation`; once it has run, `on_complete` turns its result into
  /// the completion message. Returns `false` when the executor is closed.
  pub fn submit<T, F, C>(&self, operation: F, on_complete: C) -> bool
  where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
    C: FnOnce(Result<T>) -> M + Send + 'static,
  {
    if self.closed {
      debug!("Executor closed, dropping submission");
      return false;
    }

    self.outstanding.fetch_add(1, Ordering::SeqCst);
    let guard = Outstanding(self.outstanding.clone());
    let permits = self.permits.clone();
    let completions = self.completions.clone();

    tokio::spawn(async move {
      let _guard = guard;
      // The semaphore is never closed, so acquisition only fails if it was dropped.
      let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return,
      };
      let result = operation.await;
      if completions.send(on_complete(result)).is_err() {
        warn!("Completion receiver dropped, discarding result");
      }
    });
    true
  }

  /// Stops accepting new operations. Already queued ones still run.
  pub fn close(&mut self) {
    self.closed = true;
  }

  pub fn is_closed(&self) -> bool {
    self.closed
  }

  /// Operations whose completion message has not been sent yet.
  pub fn outstanding(&self) -> usize {
    self.outstanding.load(Ordering::SeqCst)
  }
}
