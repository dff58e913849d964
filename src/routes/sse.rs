use std::time::Duration;
use tokio_stream::{wrappers::IntervalStream, StreamExt};
use warp::Filter;
use crate::status::StatusBoard;
use super::with_board;

const PUSH_INTERVAL: Duration = Duration::from_secs(2);

pub fn sse_route(board: StatusBoard) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("sse")
    .and(warp::path::end())
    .and(warp::get())
    .and(with_board(board))
    .map(handle_sse)
}

fn handle_sse(board: StatusBoard) -> impl warp::Reply {
  let interval = IntervalStream::new(tokio::time::interval(PUSH_INTERVAL));
  let stream = interval.then(move |_| {
    let board = board.clone();
    async move {
      let snapshot = board.snapshot().await;
      serde_json::to_string(&snapshot)
        .map(|data| warp::sse::Event::default().event("nodes").data(data))
    }
  });

  warp::sse::reply(warp::sse::keep_alive().stream(stream))
}
