// src/core/supervisor/mod.rs

//! Component E: the supervisor. Loads configuration, rebuilds the MSA,
//! forks one monitor worker and one log worker per remote, and reaps and
//! restarts them on exit (spec §4.E).

pub mod process_table;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use crate::config::AfdMonConfig;
use crate::core::config_entry::ConfigEntry;
use crate::core::config_loader;
use crate::core::errors::AfdMonError;
use crate::core::liveness::{self, MonActive, ProbeOutcome};
use crate::core::metrics;
use crate::core::mon_log;
use crate::core::msa::store::MsaStore;

use process_table::ProcessSlot;

/// Grace period before an unresponsive worker is SIGKILLed on shutdown
/// (spec §5 "Cancellation semantics").
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct Supervisor {
    work_dir: PathBuf,
    fifodir: PathBuf,
    config_path: PathBuf,
    config: Vec<ConfigEntry>,
    store: MsaStore,
    slots: Vec<ProcessSlot>,
    /// How long a crashed log worker waits before being retried (spec §4.E,
    /// §7 "RETRY_INTERVAL"), from the ambient config's `retry_interval_s`.
    retry_interval: Duration,
}

impl Supervisor {
    /// Performs D, initializes FIFOs, rebuilds the MSA via B, and populates
    /// the process table, but does not yet spawn any children (spec §4.E
    /// "Responsibilities" (i)-(iii)).
    pub async fn start(work_dir: PathBuf, config_path: PathBuf, retry_interval: Duration) -> Result<Self, AfdMonError> {
        let fifodir = work_dir.join("fifodir");
        std::fs::create_dir_all(&fifodir)?;

        match liveness::probe(&fifodir, Duration::from_secs(5)).await? {
            ProbeOutcome::AnotherInstanceAlive(code) => {
                return Err(AfdMonError::AlreadyAlive(code));
            }
            ProbeOutcome::ProceedToStart => {}
        }

        let config = config_loader::load_from_file(&config_path)?;
        let store = MsaStore::rebuild(&fifodir, &config)?;

        let slots = config
            .iter()
            .map(|e| ProcessSlot::new(e.alias.clone(), e.is_group_header()))
            .collect();

        Ok(Self { work_dir, fifodir, config_path, config, store, slots, retry_interval })
    }

    /// Forks a (monitor worker, log worker) pair per non-disabled remote that
    /// doesn't already have one running (spec §4.E "Responsibilities" (iv)).
    /// Idempotent by slot so it can be called again after a `SIGHUP` reload
    /// without spawning duplicate workers for aliases whose identity and
    /// process are unchanged.
    pub fn spawn_all(&mut self) -> Result<(), AfdMonError> {
        for i in 0..self.config.len() {
            if self.slots[i].disabled {
                continue;
            }
            if self.slots[i].mon_child.is_none() {
                self.start_process(i)?;
            }
            if self.slots[i].log_child.is_none() {
                self.start_log_process(i)?;
            }
        }
        self.write_mon_active()?;
        self.refresh_workers_alive();
        Ok(())
    }

    fn exe_path() -> Result<PathBuf, AfdMonError> {
        std::env::current_exe().map_err(AfdMonError::from)
    }

    /// Returns the child PID or fails with `Incorrect` (spec §4.E
    /// "`start_process` contract").
    fn start_process(&mut self, row: usize) -> Result<i32, AfdMonError> {
        let exe = Self::exe_path()?;
        let child = Command::new(exe)
            .arg("--monitor-worker")
            .arg(&self.work_dir)
            .arg(row.to_string())
            .kill_on_drop(true)
            .spawn()
            .map_err(|_| AfdMonError::Incorrect)?;
        let pid = child.id().ok_or(AfdMonError::Incorrect)? as i32;
        self.slots[row].mon_child = Some(child);
        self.slots[row].start_time = Instant::now();
        info!(alias = %self.slots[row].alias, pid, "started monitor worker");
        Ok(pid)
    }

    /// As `start_process`, but additionally sets `next_retry_time_log` to
    /// `now + RETRY_INTERVAL` on failure (spec §4.E).
    fn start_log_process(&mut self, row: usize) -> Result<i32, AfdMonError> {
        let exe = Self::exe_path()?;
        let log_capabilities = self.config[row].options.bits();
        let result = Command::new(&exe)
            .arg("--log-worker")
            .arg(&self.work_dir)
            .arg(row.to_string())
            .arg(log_capabilities.to_string())
            .kill_on_drop(true)
            .spawn();
        match result {
            Ok(child) => {
                let pid = child.id().ok_or(AfdMonError::Incorrect)? as i32;
                self.slots[row].log_child = Some(child);
                self.slots[row].next_retry_time_log = None;
                info!(alias = %self.slots[row].alias, pid, "started log worker");
                Ok(pid)
            }
            Err(_) => {
                self.slots[row].next_retry_time_log = Some(Instant::now() + self.retry_interval);
                Err(AfdMonError::Incorrect)
            }
        }
    }

    fn write_mon_active(&self) -> Result<(), AfdMonError> {
        let worker_pids = self
            .slots
            .iter()
            .map(|s| (s.mon_pid().unwrap_or(0), s.log_pid().unwrap_or(0)))
            .collect();
        let manifest = MonActive::new(std::process::id() as i32, 0, 0, worker_pids);
        manifest.write(&self.fifodir)
    }

    /// Reaps any children that have exited and restarts log workers whose
    /// retry deadline has passed (spec §4.E "Scheduling").
    pub async fn reap_and_restart(&mut self) {
        for i in 0..self.slots.len() {
            if self.slots[i].disabled {
                continue;
            }
            if let Some(child) = self.slots[i].mon_child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    warn!(alias = %self.slots[i].alias, ?status, "monitor worker exited, restarting");
                    self.slots[i].mon_child = None;
                    self.slots[i].number_of_restarts += 1;
                    metrics::WORKER_RESTARTS_TOTAL.with_label_values(&[&self.slots[i].alias, "monitor"]).inc();
                    let _ = self.start_process(i);
                }
            }
            if let Some(child) = self.slots[i].log_child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    warn!(alias = %self.slots[i].alias, ?status, "log worker exited");
                    self.slots[i].log_child = None;
                    self.slots[i].number_of_restarts += 1;
                    metrics::WORKER_RESTARTS_TOTAL.with_label_values(&[&self.slots[i].alias, "log"]).inc();
                    self.slots[i].next_retry_time_log = Some(Instant::now() + self.retry_interval);
                }
            }
            if self.slots[i].log_child.is_none() && self.slots[i].log_retry_due() {
                let _ = self.start_log_process(i);
            }
        }
        self.refresh_workers_alive();
    }

    /// Drains at most one admin command from `mon_cmd` per call (spec §6.3)
    /// and acts on it. `IS_ALIVE` is answered on `probe_only` per the
    /// liveness protocol (spec §4.D); `ENABLE_MON`/`DISABLE_MON` target a row
    /// by its 4-byte index and are acked on `mon_resp`.
    async fn poll_admin_commands(&mut self) {
        match liveness::try_read_admin_command(&self.fifodir) {
            Ok(Some(liveness::AdminCommand::IsAlive)) => {
                let _ = liveness::respond_is_alive(&self.fifodir);
            }
            Ok(Some(liveness::AdminCommand::Start)) => {
                let _ = self.spawn_all();
                liveness::ack_admin_command(&self.fifodir);
            }
            Ok(Some(liveness::AdminCommand::EnableMon(row))) => {
                let idx = row as usize;
                if let Some(slot) = self.slots.get_mut(idx) {
                    if slot.disabled {
                        slot.disabled = false;
                        info!(row, alias = %slot.alias, "admin command: enabled monitor row");
                        let _ = self.start_process(idx);
                        let _ = self.start_log_process(idx);
                        self.refresh_workers_alive();
                    }
                } else {
                    warn!(row, "admin command EnableMon: row index out of range");
                }
                liveness::ack_admin_command(&self.fifodir);
            }
            Ok(Some(liveness::AdminCommand::DisableMon(row))) => {
                let idx = row as usize;
                if idx < self.slots.len() {
                    if !self.slots[idx].disabled {
                        info!(row, alias = %self.slots[idx].alias, "admin command: disabling monitor row");
                        self.kill_slot(idx).await;
                    }
                    self.slots[idx].disabled = true;
                } else {
                    warn!(row, "admin command DisableMon: row index out of range");
                }
                liveness::ack_admin_command(&self.fifodir);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "garbage admin command received on mon_cmd");
                mon_log::write_fatal_line(&self.fifodir, "ERROR", "supervisor/mod.rs", &format!("{e}"));
            }
        }
    }

    /// Recomputes `WORKERS_ALIVE` from the process table. Called after every
    /// point that spawns, reaps, or kills a child, matching the rest of the
    /// crate's "update gauges at the point of change" metrics discipline
    /// (`DESIGN.md` "Ambient stack").
    fn refresh_workers_alive(&self) {
        let alive = self
            .slots
            .iter()
            .map(|s| s.mon_child.is_some() as u64 + s.log_child.is_some() as u64)
            .sum::<u64>();
        metrics::WORKERS_ALIVE.set(alive as f64);
    }

    /// Re-runs the config loader; rows for removed aliases kill their
    /// children, rows for new aliases spawn new children, and rows whose
    /// connection identity changed (`host`, `port`, `rcmd`) are restarted
    /// (spec §4.E "Scheduling", SIGHUP).
    pub async fn reload_config(&mut self) -> Result<(), AfdMonError> {
        let new_config = config_loader::load_from_file(&self.config_path)?;

        let mut new_slots = Vec::with_capacity(new_config.len());
        for entry in &new_config {
            if let Some(idx) = self.config.iter().position(|e| e.alias == entry.alias) {
                let identity_changed = self.config[idx].host != entry.host
                    || self.config[idx].port != entry.port
                    || self.config[idx].rcmd != entry.rcmd;
                if identity_changed {
                    self.kill_slot(idx).await;
                    new_slots.push(ProcessSlot::new(entry.alias.clone(), entry.is_group_header()));
                } else {
                    new_slots.push(std::mem::replace(
                        &mut self.slots[idx],
                        ProcessSlot::new(entry.alias.clone(), entry.is_group_header()),
                    ));
                }
            } else {
                new_slots.push(ProcessSlot::new(entry.alias.clone(), entry.is_group_header()));
            }
        }

        for (idx, entry) in self.config.iter().enumerate() {
            if !new_config.iter().any(|e| e.alias == entry.alias) {
                self.kill_slot(idx).await;
            }
        }

        self.store = MsaStore::rebuild(&self.fifodir, &new_config)?;
        self.config = new_config;
        self.slots = new_slots;
        self.spawn_all()?;
        Ok(())
    }

    async fn kill_slot(&mut self, idx: usize) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        for pid in [self.slots[idx].mon_pid(), self.slots[idx].log_pid()].into_iter().flatten() {
            let _ = kill(Pid::from_raw(pid), Signal::SIGINT);
        }
        self.slots[idx].mon_child = None;
        self.slots[idx].log_child = None;
        self.refresh_workers_alive();
    }

    /// Broadcasts SIGINT to every recorded PID then unlinks `mon_active`
    /// (spec §4.E, SIGTERM).
    pub async fn shutdown(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        info!("supervisor shutting down, broadcasting SIGINT");
        for slot in &self.slots {
            for pid in [slot.mon_pid(), slot.log_pid()].into_iter().flatten() {
                let _ = kill(Pid::from_raw(pid), Signal::SIGINT);
            }
        }
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        for slot in &mut self.slots {
            if let Some(c) = slot.mon_child.as_mut() {
                let _ = c.start_kill();
            }
            if let Some(c) = slot.log_child.as_mut() {
                let _ = c.start_kill();
            }
        }
        let _ = std::fs::remove_file(self.fifodir.join("mon_active"));
        self.refresh_workers_alive();
    }

    /// The supervisor's main loop: reap/restart on a timer, react to
    /// SIGTERM and SIGHUP (spec §4.E "Scheduling").
    pub async fn run(mut self) -> Result<(), AfdMonError> {
        self.spawn_all()?;

        let mut sigterm = signal(SignalKind::terminate()).map_err(AfdMonError::from)?;
        let mut sighup = signal(SignalKind::hangup()).map_err(AfdMonError::from)?;
        let mut ticker = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    self.shutdown().await;
                    return Ok(());
                }
                _ = sighup.recv() => {
                    info!("SIGHUP received, reloading configuration");
                    if let Err(e) = self.reload_config().await {
                        error!(error = %e, "config reload failed, keeping previous configuration running");
                    }
                }
                _ = ticker.tick() => {
                    self.reap_and_restart().await;
                    self.poll_admin_commands().await;
                }
            }
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}
