use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use anyhow::{Context, Result, bail};

#[derive(Debug, Clone)]
pub struct Config {
  pub database_url: String,
  pub server_port: u16,
  pub dispatch: DispatchSettings,
  pub uptime_logfile: Option<PathBuf>,
  pub node_timeout: Duration,
}

/// Knobs consumed by the dispatcher itself.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
  /// Ticks (seconds) between two status checks of the same node.
  pub interval: u64,
  /// Tasks handed to a node per round, and the pending count below which it gets more.
  pub batch_size: usize,
  pub workers: usize,
  pub reports_dir: PathBuf,
  pub report_formats: Vec<String>,
  /// Put a task back in the unassigned pool when its submission fails.
  pub release_on_submit_failure: bool,
}

impl Default for DispatchSettings {
  fn default() -> Self {
    Self {
      interval: 30,
      batch_size: 10,
      workers: 8,
      reports_dir: PathBuf::from("reports"),
      report_formats: vec!["json".to_string()],
      release_on_submit_failure: false,
    }
  }
}

impl Config {
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| env::var(key).ok())
  }

  pub fn from_lookup<F>(lookup: F) -> Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let defaults = DispatchSettings::default();
    let database_url = lookup("DATABASE_URL").context("DATABASE_URL is not set")?;

    let dispatch = DispatchSettings {
      interval: parse_or(&lookup, "INTERVAL", defaults.interval)?,
      batch_size: parse_or(&lookup, "BATCH_SIZE", defaults.batch_size)?,
      workers: parse_or(&lookup, "WORKER_PROCESSES", defaults.workers)?,
      reports_dir: lookup("REPORTS_DIRECTORY")
        .map(PathBuf::from)
        .unwrap_or(defaults.reports_dir),
      report_formats: match lookup("REPORT_FORMATS") {
        Some(raw) => split_formats(&raw),
        None => defaults.report_formats,
      },
      release_on_submit_failure: parse_or(
        &lookup,
        "RELEASE_ON_SUBMIT_FAILURE",
        defaults.release_on_submit_failure,
      )?,
    };

    if dispatch.interval == 0 {
      bail!("INTERVAL must be at least 1 second");
    }
    if dispatch.batch_size == 0 {
      bail!("BATCH_SIZE must be at least 1");
    }
    if dispatch.workers == 0 {
      bail!("WORKER_PROCESSES must be at least 1");
    }
    if dispatch.report_formats.is_empty() {
      bail!("REPORT_FORMATS must name at least one format");
    }

    Ok(Self {
      database_url,
      server_port: parse_or(&lookup, "SERVER_PORT", 8080)?,
      dispatch,
      uptime_logfile: lookup("UPTIME_LOGFILE")
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from),
      node_timeout: Duration::from_secs(parse_or(&lookup, "NODE_TIMEOUT", 300)?),
    })
  }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
  F: Fn(&str) -> Option<String>,
  T: FromStr,
  T::Err: std::error::Error + Send + Sync + 'static,
{
  match lookup(key) {
    Some(raw) => raw
      .trim()
      .parse()
      .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
    None => Ok(default),
  }
}

fn split_formats(raw: &str) -> Vec<String> {
  raw
    .split(',')
    .map(str::trim)
    .filter(|f| !f.is_empty())
    .map(str::to_string)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use tokio_test::{assert_err, assert_ok};

  fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |key| vars.get(key).cloned()
  }

  #[test]
  fn defaults_apply_when_only_database_is_set() {
    let config = assert_ok!(Config::from_lookup(lookup(&[("DATABASE_URL", "memory")])));
    assert_eq!(config.server_port, 8080);
    assert_eq!(config.dispatch.interval, 30);
    assert_eq!(config.dispatch.batch_size, 10);
    assert_eq!(config.dispatch.report_formats, vec!["json"]);
    assert!(config.uptime_logfile.is_none());
    assert!(!config.dispatch.release_on_submit_failure);
  }

  #[test]
  fn report_formats_are_split_and_trimmed() {
    let config = Config::from_lookup(lookup(&[
      ("DATABASE_URL", "memory"),
      ("REPORT_FORMATS", "json, html,,pdf "),
      ("RELEASE_ON_SUBMIT_FAILURE", "true"),
    ]))
    .unwrap();
    assert_eq!(config.dispatch.report_formats, vec!["json", "html", "pdf"]);
    assert!(config.dispatch.release_on_submit_failure);
  }

  #[test]
  fn rejects_missing_database_and_bad_numbers() {
    assert_err!(Config::from_lookup(lookup(&[])));
    assert_err!(Config::from_lookup(lookup(&[("DATABASE_URL", "memory"), ("INTERVAL", "soon")])));
    assert_err!(Config::from_lookup(lookup(&[("DATABASE_URL", "memory"), ("BATCH_SIZE", "0")])));
    assert_err!(Config::from_lookup(lookup(&[("DATABASE_URL", "memory"), ("REPORT_FORMATS", " , ")])));
  }
}
