use std::convert::Infallible;
use std::sync::Arc;
use serde_json::json;
use warp::Filter;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::Reply;
use crate::status::StatusBoard;
use crate::store::Store;
pub mod nodes;
pub mod tasks;
pub mod sse;

pub fn routes<S: Store + 'static>(
  store: Arc<S>,
  board: StatusBoard,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  tasks::submit_route(store.clone())
    .or(tasks::get_route(store.clone()))
    .or(nodes::list_route(board.clone()))
    .or(nodes::add_route(store))
    .or(sse::sse_route(board))
}

fn with_store<S: Store + 'static>(store: Arc<S>) -> impl Filter<Extract = (Arc<S>,), Error = Infallible> + Clone {
  warp::any().map(move || store.clone())
}

fn with_board(board: StatusBoard) -> impl Filter<Extract = (StatusBoard,), Error = Infallible> + Clone {
  warp::any().map(move || board.clone())
}

fn error_reply(status: StatusCode, message: &str) -> Response {
  warp::reply::with_status(warp::reply::json(&json!({ "error": message })), status).into_response()
}
