use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use sandfleet::{
  config::Config,
  database::{setup_database, PgStore},
  dispatcher::Dispatcher,
  node_client::HttpNodeClient,
  routes::routes,
  status::StatusBoard,
  store::{MemoryStore, Store},
  uptime::UptimeLog,
};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();
  let config = Config::from_env()?;

  if config.database_url == "memory" {
    warn!("DATABASE_URL=memory, node and task records are lost on exit");
    serve(config, Arc::new(MemoryStore::new())).await
  } else {
    let pool = setup_database(&config.database_url).await?;
    serve(config, Arc::new(PgStore::new(pool))).await
  }
}

async fn serve<S: Store + 'static>(config: Config, store: Arc<S>) -> Result<()> {
  tokio::fs::create_dir_all(&config.dispatch.reports_dir)
    .await
    .with_context(|| format!("Failed to create {}", config.dispatch.reports_dir.display()))?;

  let board = StatusBoard::new();
  let client = Arc::new(HttpNodeClient::new(config.node_timeout)?);
  let mut dispatcher = Dispatcher::new(config.dispatch.clone(), store.clone(), client, board.clone());
  if let Some(path) = &config.uptime_logfile {
    dispatcher = dispatcher.with_uptime_log(UptimeLog::new(path.clone()));
  }

  let running = Arc::new(AtomicBool::new(true));
  let flag = running.clone();
  tokio::spawn(async move {
    match tokio::signal::ctrl_c().await {
      Ok(()) => {
        info!("Interrupt received, stopping dispatcher");
        flag.store(false, Ordering::SeqCst);
      }
      Err(e) => error!("Failed to listen for interrupt: {}", e),
    }
  });

  let api = routes(store, board);
  let server = tokio::spawn(warp::serve(api).run(([0, 0, 0, 0], config.server_port)));
  info!("API listening on port {}", config.server_port);

  dispatcher.run(running).await;
  server.abort();
  Ok(())
}
