use std::sync::Arc;
use tracing::{error, info};
use warp::Filter;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::Reply;
use crate::models::NewNode;
use crate::status::StatusBoard;
use crate::store::Store;
use super::{error_reply, with_board, with_store};

pub fn list_route(board: StatusBoard) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("nodes")
    .and(warp::path::end())
    .and(warp::get())
    .and(with_board(board))
    .and_then(handle_list_nodes)
}

pub fn add_route<S: Store + 'static>(store: Arc<S>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("nodes")
    .and(warp::path::end())
    .and(warp::post())
    .and(warp::body::json())
    .and(with_store(store))
    .and_then(handle_add_node::<S>)
}

async fn handle_list_nodes(board: StatusBoard) -> Result<Response, warp::Rejection> {
  Ok(warp::reply::json(&board.snapshot().await).into_response())
}

async fn handle_add_node<S: Store>(new_node: NewNode, store: Arc<S>) -> Result<Response, warp::Rejection> {
  let name = new_node.name.trim();
  let url = new_node.url.trim();
  if name.is_empty() || !(url.starts_with("http://") || url.starts_with("https://")) {
    return Ok(error_reply(StatusCode::BAD_REQUEST, "A node needs a name and an http(s) url"));
  }

  match store.add_node(name, url).await {
    Ok(node) => {
      info!("Node {} added at {}", node.name, node.url);
      Ok(warp::reply::with_status(warp::reply::json(&node), StatusCode::CREATED).into_response())
    }
    Err(e) => {
      error!("Adding node {} failed: {:#}", name, e);
      Ok(error_reply(StatusCode::CONFLICT, "Node could not be added"))
    }
  }
}
