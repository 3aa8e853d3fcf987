// src/config.rs

//! The controller's own ambient configuration: where it keeps its working
//! directory, how verbosely it logs, and where it exposes Prometheus
//! metrics. Distinct from `ConfigEntry`/`AFD_MON_CONFIG`, which describes
//! the fleet of remotes being monitored, not the controller itself.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_afd_mon_config() -> PathBuf {
    PathBuf::from("etc/AFD_MON_CONFIG")
}

fn default_rlog_dir() -> PathBuf {
    PathBuf::from("rlog")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tcp_timeout_s() -> u64 {
    10
}

fn default_retry_interval_s() -> u64 {
    10
}

fn default_metrics_addr() -> Option<String> {
    None
}

/// Top-level ambient configuration, loaded from a small TOML file (spec
/// `SPEC_FULL.md` §2.3).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AfdMonConfig {
    /// Working directory containing `etc/`, `fifodir/`, and the rolling log
    /// tree (spec §6.1).
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Path to the `AFD_MON_CONFIG` fleet file, resolved relative to
    /// `work_dir` if not absolute.
    #[serde(default = "default_afd_mon_config")]
    pub afd_mon_config: PathBuf,

    /// Root of the per-remote rolling log tree, resolved relative to
    /// `work_dir` if not absolute.
    #[serde(default = "default_rlog_dir")]
    pub rlog_dir: PathBuf,

    /// `RUST_LOG`-style default filter directive, overridable by the
    /// `RUST_LOG` environment variable at process start.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `A.connect`'s `tcp_timeout` (spec §4.A).
    #[serde(default = "default_tcp_timeout_s")]
    pub tcp_timeout_s: u64,

    /// Delay before a crashed log worker is retried (spec §4.E, §7
    /// `RETRY_INTERVAL`).
    #[serde(default = "default_retry_interval_s")]
    pub retry_interval_s: u64,

    /// `host:port` to bind the Prometheus exposition endpoint on. `None`
    /// disables metrics entirely.
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: Option<String>,
}

impl Default for AfdMonConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            afd_mon_config: default_afd_mon_config(),
            rlog_dir: default_rlog_dir(),
            log_level: default_log_level(),
            tcp_timeout_s: default_tcp_timeout_s(),
            retry_interval_s: default_retry_interval_s(),
            metrics_addr: default_metrics_addr(),
        }
    }
}

impl AfdMonConfig {
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading ambient config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing ambient config {}", path.display()))
    }

    /// Resolves `afd_mon_config` against `work_dir` when it's a relative path.
    pub fn resolved_afd_mon_config(&self) -> PathBuf {
        if self.afd_mon_config.is_absolute() {
            self.afd_mon_config.clone()
        } else {
            self.work_dir.join(&self.afd_mon_config)
        }
    }

    pub fn resolved_rlog_dir(&self) -> PathBuf {
        if self.rlog_dir.is_absolute() {
            self.rlog_dir.clone()
        } else {
            self.work_dir.join(&self.rlog_dir)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AfdMonConfig::default();
        assert_eq!(cfg.tcp_timeout_s, 10);
        assert!(cfg.metrics_addr.is_none());
    }

    #[test]
    fn parses_minimal_toml() {
        let cfg: AfdMonConfig = toml::from_str("work_dir = \"/srv/afd\"\n").unwrap();
        assert_eq!(cfg.work_dir, PathBuf::from("/srv/afd"));
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn resolves_relative_paths_against_work_dir() {
        let cfg = AfdMonConfig {
            work_dir: PathBuf::from("/srv/afd"),
            ..AfdMonConfig::default()
        };
        assert_eq!(cfg.resolved_afd_mon_config(), PathBuf::from("/srv/afd/etc/AFD_MON_CONFIG"));
    }
}
