// src/core/liveness.rs

//! Component D: the liveness probe that enforces "exactly one controller
//! process per working directory" (spec §4.D).

use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::{mkfifo, Pid};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::core::errors::{exit_code, AfdMonError};

const IS_ALIVE: u8 = b'I';
const ACKN: u8 = b'A';
const ACKN_STOPPED: u8 = b'S';
const START: u8 = b'T';
const DISABLE_MON: u8 = b'D';
const ENABLE_MON: u8 = b'E';

fn mon_active_path(fifodir: &Path) -> PathBuf {
    fifodir.join("mon_active")
}

/// The admin command FIFO (spec §6.1, §6.3): carries `IS_ALIVE`, `START`, and
/// `ENABLE_MON`/`DISABLE_MON` followed by a 4-byte row index.
fn cmd_fifo_path(fifodir: &Path) -> PathBuf {
    fifodir.join("mon_cmd")
}

/// Responses to admin commands issued on `mon_cmd` (spec §6.1), distinct from
/// `probe_only` which carries only the liveness-probe `ACKN`/`ACKN_STOPPED`
/// reply.
fn resp_fifo_path(fifodir: &Path) -> PathBuf {
    fifodir.join("mon_resp")
}

fn probe_fifo_path(fifodir: &Path) -> PathBuf {
    fifodir.join("probe_only")
}

/// `fifodir/mon_log`, the fatal-line sink FIFO (spec §6.1; see `mon_log.rs`).
fn log_fifo_path(fifodir: &Path) -> PathBuf {
    fifodir.join("mon_log")
}

/// A row-targeted admin command read off `mon_cmd` (spec §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    IsAlive,
    Start,
    EnableMon(u32),
    DisableMon(u32),
}

/// Outcome of a liveness probe (spec §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// No prior instance found, or the prior instance was confirmed dead:
    /// safe to proceed with startup.
    ProceedToStart,
    /// Another instance is alive and acknowledged; this process should exit
    /// with the given code (`ACKN` or `ACKN_STOPPED`).
    AnotherInstanceAlive(i32),
}

/// The packed `mon_active` manifest: `[supervisor, sys_log, mon_log, n,
/// (mon_pid, log_pid)×n]` (spec §4.D).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonActive {
    pub supervisor_pid: i32,
    pub sys_log_pid: i32,
    pub mon_log_pid: i32,
    pub worker_pids: Vec<(i32, i32)>,
}

impl MonActive {
    pub fn new(supervisor_pid: i32, sys_log_pid: i32, mon_log_pid: i32, worker_pids: Vec<(i32, i32)>) -> Self {
        Self { supervisor_pid, sys_log_pid, mon_log_pid, worker_pids }
    }

    pub fn all_pids(&self) -> Vec<i32> {
        let mut pids = vec![self.supervisor_pid, self.sys_log_pid, self.mon_log_pid];
        for (m, l) in &self.worker_pids {
            pids.push(*m);
            pids.push(*l);
        }
        pids
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + self.worker_pids.len() * 8);
        buf.extend_from_slice(&self.supervisor_pid.to_le_bytes());
        buf.extend_from_slice(&self.sys_log_pid.to_le_bytes());
        buf.extend_from_slice(&self.mon_log_pid.to_le_bytes());
        buf.extend_from_slice(&(self.worker_pids.len() as i32).to_le_bytes());
        for (m, l) in &self.worker_pids {
            buf.extend_from_slice(&m.to_le_bytes());
            buf.extend_from_slice(&l.to_le_bytes());
        }
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self, AfdMonError> {
        if buf.len() < 16 {
            return Err(AfdMonError::StaleMsa("mon_active shorter than the fixed prefix".into()));
        }
        let read_i32 = |b: &[u8]| i32::from_le_bytes(b.try_into().unwrap());
        let supervisor_pid = read_i32(&buf[0..4]);
        let sys_log_pid = read_i32(&buf[4..8]);
        let mon_log_pid = read_i32(&buf[8..12]);
        let n = read_i32(&buf[12..16]).max(0) as usize;
        if buf.len() < 16 + n * 8 {
            return Err(AfdMonError::StaleMsa("mon_active truncated worker-pid table".into()));
        }
        let mut worker_pids = Vec::with_capacity(n);
        for i in 0..n {
            let off = 16 + i * 8;
            worker_pids.push((read_i32(&buf[off..off + 4]), read_i32(&buf[off + 4..off + 8])));
        }
        Ok(Self { supervisor_pid, sys_log_pid, mon_log_pid, worker_pids })
    }

    pub fn write(&self, fifodir: &Path) -> Result<(), AfdMonError> {
        std::fs::write(mon_active_path(fifodir), self.encode())?;
        Ok(())
    }

    pub fn read(fifodir: &Path) -> Result<Self, AfdMonError> {
        let bytes = std::fs::read(mon_active_path(fifodir))?;
        Self::decode(&bytes)
    }
}

/// Creates the four named pipes of spec §6.1/§4.E responsibility (ii) if
/// they're missing: `mon_cmd`, `mon_resp`, `mon_log`, `probe_only`.
pub fn ensure_fifos(fifodir: &Path) -> Result<(), AfdMonError> {
    ensure_fifo(&cmd_fifo_path(fifodir))?;
    ensure_fifo(&resp_fifo_path(fifodir))?;
    ensure_fifo(&log_fifo_path(fifodir))?;
    ensure_fifo(&probe_fifo_path(fifodir))?;
    Ok(())
}

/// Runs the probe described in spec §4.D. Creates all four FIFOs (spec
/// §4.E responsibility (ii)) if they don't already exist.
pub async fn probe(fifodir: &Path, wait_time: Duration) -> Result<ProbeOutcome, AfdMonError> {
    ensure_fifos(fifodir)?;

    if !mon_active_path(fifodir).exists() {
        return Ok(ProbeOutcome::ProceedToStart);
    }

    drain_nonblocking(&probe_fifo_path(fifodir))?;
    write_probe_byte(&cmd_fifo_path(fifodir), IS_ALIVE)?;

    let fifodir_owned = fifodir.to_path_buf();
    let probe_path = probe_fifo_path(&fifodir_owned);
    let read_probe = tokio::task::spawn_blocking(move || read_one_byte(&probe_path));

    match timeout(wait_time, read_probe).await {
        Ok(Ok(Ok(Some(byte)))) => match byte {
            ACKN => Ok(ProbeOutcome::AnotherInstanceAlive(exit_code::ACKN)),
            ACKN_STOPPED => Ok(ProbeOutcome::AnotherInstanceAlive(exit_code::ACKN_STOPPED)),
            _ => Err(AfdMonError::ProbeGarbage),
        },
        Ok(Ok(Ok(None))) => Err(AfdMonError::ProbeGarbage),
        Ok(Ok(Err(e))) => Err(e),
        Ok(Err(join_err)) => Err(AfdMonError::Internal(format!("probe task panicked: {join_err}"))),
        Err(_) => {
            warn!("liveness probe timed out, assuming the prior instance crashed");
            assume_crash_and_clean_up(&fifodir_owned)
        }
    }
}

/// Non-blocking read of one admin command off `mon_cmd` (spec §6.3). `Ok(None)`
/// means no command is currently waiting.
pub fn try_read_admin_command(fifodir: &Path) -> Result<Option<AdminCommand>, AfdMonError> {
    let path = cmd_fifo_path(fifodir);
    let mut f = match std::fs::OpenOptions::new().read(true).custom_flags(libc::O_NONBLOCK).open(&path) {
        Ok(f) => f,
        Err(_) => return Ok(None),
    };
    let mut buf = [0u8; 5];
    let n = match f.read(&mut buf) {
        Ok(0) => return Ok(None),
        Ok(n) => n,
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match buf[0] {
        IS_ALIVE => Ok(Some(AdminCommand::IsAlive)),
        START => Ok(Some(AdminCommand::Start)),
        ENABLE_MON | DISABLE_MON if n >= 5 => {
            let row = u32::from_le_bytes(buf[1..5].try_into().unwrap());
            if buf[0] == ENABLE_MON {
                Ok(Some(AdminCommand::EnableMon(row)))
            } else {
                Ok(Some(AdminCommand::DisableMon(row)))
            }
        }
        ENABLE_MON | DISABLE_MON => Err(AfdMonError::ProbeGarbage),
        _ => Err(AfdMonError::ProbeGarbage),
    }
}

/// Answers an `IS_ALIVE` probe on `probe_only` (spec §4.D), the liveness
/// protocol's own reply channel — distinct from `mon_resp`, which carries
/// acks for the row-targeted admin commands.
pub fn respond_is_alive(fifodir: &Path) -> Result<(), AfdMonError> {
    write_probe_byte(&probe_fifo_path(fifodir), ACKN)
}

/// Acknowledges a processed admin command on `mon_resp` (spec §6.1).
///
/// Opened `O_NONBLOCK`: unlike the liveness probe's `IS_ALIVE` round-trip
/// (where a peer is known to be waiting), nothing guarantees an admin client
/// is still attached to `mon_resp` by the time the supervisor gets around to
/// acking, so a missing reader is swallowed rather than left to block the
/// supervisor's tick loop.
pub fn ack_admin_command(fifodir: &Path) {
    let path = resp_fifo_path(fifodir);
    if let Ok(mut f) = std::fs::OpenOptions::new().write(true).custom_flags(libc::O_NONBLOCK).open(&path) {
        let _ = f.write_all(&[ACKN]);
    }
}

fn ensure_fifo(path: &Path) -> Result<(), AfdMonError> {
    if path.exists() {
        return Ok(());
    }
    mkfifo(path, nix::sys::stat::Mode::from_bits_truncate(0o600))
        .map_err(|e| AfdMonError::Internal(format!("mkfifo {}: {e}", path.display())))?;
    Ok(())
}

fn write_probe_byte(path: &Path, byte: u8) -> Result<(), AfdMonError> {
    let mut f = std::fs::OpenOptions::new().write(true).open(path)?;
    f.write_all(&[byte])?;
    Ok(())
}

fn drain_nonblocking(path: &Path) -> Result<(), AfdMonError> {
    let file = std::fs::OpenOptions::new().read(true).custom_flags(libc::O_NONBLOCK).open(path);
    if let Ok(mut f) = file {
        let mut buf = [0u8; 64];
        loop {
            match f.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    }
    Ok(())
}

fn read_one_byte(path: &Path) -> Result<Option<u8>, AfdMonError> {
    let mut f = std::fs::OpenOptions::new().read(true).open(path)?;
    let mut buf = [0u8; 1];
    match f.read(&mut buf) {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(buf[0])),
        Err(e) => Err(e.into()),
    }
}

fn assume_crash_and_clean_up(fifodir: &Path) -> Result<ProbeOutcome, AfdMonError> {
    let manifest = MonActive::read(fifodir)?;
    for pid in manifest.all_pids() {
        if pid > 0 {
            let _ = kill(Pid::from_raw(pid), Signal::SIGINT);
        }
    }
    let _ = std::fs::remove_file(mon_active_path(fifodir));
    info!("sent SIGINT to stale process table and removed mon_active");
    Ok(ProbeOutcome::ProceedToStart)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mon_active_round_trips() {
        let dir = tempdir().unwrap();
        let manifest = MonActive::new(100, 101, 102, vec![(200, 201), (202, 203)]);
        manifest.write(dir.path()).unwrap();
        let reloaded = MonActive::read(dir.path()).unwrap();
        assert_eq!(reloaded, manifest);
        assert_eq!(reloaded.all_pids(), vec![100, 101, 102, 200, 201, 202, 203]);
    }

    #[tokio::test]
    async fn no_mon_active_proceeds_immediately() {
        let dir = tempdir().unwrap();
        let outcome = probe(dir.path(), Duration::from_millis(50)).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::ProceedToStart);
    }

    #[test]
    fn probe_creates_all_four_fifos() {
        let dir = tempdir().unwrap();
        ensure_fifos(dir.path()).unwrap();
        assert!(cmd_fifo_path(dir.path()).exists());
        assert!(resp_fifo_path(dir.path()).exists());
        assert!(log_fifo_path(dir.path()).exists());
        assert!(probe_fifo_path(dir.path()).exists());
    }

    #[test]
    fn no_command_waiting_is_none() {
        let dir = tempdir().unwrap();
        ensure_fifos(dir.path()).unwrap();
        assert_eq!(try_read_admin_command(dir.path()).unwrap(), None);
    }

    #[test]
    fn enable_mon_round_trips_row_index() {
        let dir = tempdir().unwrap();
        ensure_fifos(dir.path()).unwrap();

        let cmd_path = cmd_fifo_path(dir.path());
        let mut buf = vec![ENABLE_MON];
        buf.extend_from_slice(&7u32.to_le_bytes());
        {
            let mut f = std::fs::OpenOptions::new().write(true).custom_flags(libc::O_NONBLOCK).open(&cmd_path).unwrap();
            f.write_all(&buf).unwrap();
        }

        assert_eq!(try_read_admin_command(dir.path()).unwrap(), Some(AdminCommand::EnableMon(7)));
    }

    #[test]
    fn disable_mon_round_trips_row_index() {
        let dir = tempdir().unwrap();
        ensure_fifos(dir.path()).unwrap();

        let cmd_path = cmd_fifo_path(dir.path());
        let mut buf = vec![DISABLE_MON];
        buf.extend_from_slice(&3u32.to_le_bytes());
        {
            let mut f = std::fs::OpenOptions::new().write(true).custom_flags(libc::O_NONBLOCK).open(&cmd_path).unwrap();
            f.write_all(&buf).unwrap();
        }

        assert_eq!(try_read_admin_command(dir.path()).unwrap(), Some(AdminCommand::DisableMon(3)));
    }
}
