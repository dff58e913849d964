use std::sync::{Arc, LazyLock};
use regex::Regex;
use serde::Serialize;
use tracing::{info, error};
use warp::Filter;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::Reply;
use crate::models::NewTask;
use crate::store::Store;
use super::{error_reply, with_store};

// `None` only if a pattern fails to compile, which rejects every input.
static PACKAGE_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[\w.\-]+$").ok());
static OPTIONS_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[\w\s.,=:/@\-]+$").ok());

#[derive(Serialize)]
pub struct TaskResponse {
  pub task_id: i64,
  pub status: String,
}

fn is_safe(pattern: &LazyLock<Option<Regex>>, input: &str) -> bool {
  pattern.as_ref().is_some_and(|re| re.is_match(input))
}

fn validate_task(task: &NewTask) -> Result<(), String> {
  if task.path.trim().is_empty() {
    return Err("Missing 'path' field".into());
  }
  if let Some(package) = &task.package {
    if !is_safe(&PACKAGE_PATTERN, package) {
      return Err("Invalid or unsafe 'package'".into());
    }
  }
  if let Some(options) = &task.options {
    if !options.is_empty() && !is_safe(&OPTIONS_PATTERN, options) {
      return Err("Invalid or unsafe 'options'".into());
    }
  }
  if matches!(task.timeout, Some(t) if t < 0) {
    return Err("'timeout' must not be negative".into());
  }
  Ok(())
}

pub fn submit_route<S: Store + 'static>(store: Arc<S>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("tasks")
    .and(warp::path::end())
    .and(warp::post())
    .and(warp::body::json())
    .and(with_store(store))
    .and_then(handle_submit_task::<S>)
}

pub fn get_route<S: Store + 'static>(store: Arc<S>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("tasks" / i64)
    .and(warp::get())
    .and(with_store(store))
    .and_then(handle_get_task::<S>)
}

async fn handle_submit_task<S: Store>(new_task: NewTask, store: Arc<S>) -> Result<Response, warp::Rejection> {
  if let Err(e) = validate_task(&new_task) {
    error!("Task validation failed: {}", e);
    return Ok(error_reply(StatusCode::BAD_REQUEST, &e));
  }

  match store.create_task(new_task).await {
    Ok(task) => {
      info!("Task {} submitted successfully", task.id);
      let response = TaskResponse {
        task_id: task.id,
        status: "pending".into(),
      };
      Ok(warp::reply::with_status(warp::reply::json(&response), StatusCode::CREATED).into_response())
    }
    Err(e) => {
      error!("Task insertion failed: {:#}", e);
      Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Task could not be stored"))
    }
  }
}

async fn handle_get_task<S: Store>(task_id: i64, store: Arc<S>) -> Result<Response, warp::Rejection> {
  match store.task(task_id).await {
    Ok(Some(task)) => Ok(warp::reply::json(&task).into_response()),
    Ok(None) => Ok(error_reply(StatusCode::NOT_FOUND, "Task not found")),
    Err(e) => {
      error!("Loading task {} failed: {:#}", task_id, e);
      Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Task could not be loaded"))
    }
  }
}
