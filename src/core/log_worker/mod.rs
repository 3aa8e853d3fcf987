// src/core/log_worker/mod.rs

//! Component G: the remote log multiplexer worker (spec §4.G). This is the
//! largest single piece of the system: it parses a small framed streaming
//! protocol carrying interleaved per-kind log records, routes each record to
//! a rolling local log file, and reacts to the remote's own rotation signals
//! by reshuffling local files to preserve continuity.

pub mod cursor;
pub mod frame;
pub mod rolling_log;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::core::backoff::bounded_exponential;
use crate::core::errors::AfdMonError;
use crate::core::msa::store::MsaStore;
use crate::core::options::AfdOptions;
use crate::core::reply_client::ReplyClient;

pub use cursor::LogCursor;
pub use frame::{Frame, LogKind};
pub use rolling_log::RollingLog;

/// Default per-kind cap on rolled-over files before the oldest is unlinked
/// (spec §4.G "Log rotation bound"). The real AFD project tunes this per
/// kind; we keep one default and let `transfer`/`system` kinds double it,
/// since those are the highest-volume streams in practice.
const DEFAULT_MAX_LOG_FILES: u32 = 7;
const HIGH_VOLUME_MAX_LOG_FILES: u32 = 14;

/// How many consecutive framing failures abort the session (spec §4.G).
const MAX_FRAMING_FAILURES: u32 = 3;

/// How many consecutive connect failures this process retries internally,
/// with the same bounded exponential backoff the monitor worker applies to
/// its reconnect loop (spec §4.F/§4.G, `SPEC_FULL.md` §4.1 — the resolution
/// explicitly covers "the log worker's initial connect"), before giving up
/// and letting the supervisor's `RETRY_INTERVAL`-based process restart take
/// over.
const MAX_CONNECT_ATTEMPTS: u32 = 5;

fn max_log_files_for(kind: LogKind) -> u32 {
    match kind {
        LogKind::Transfer | LogKind::System => HIGH_VOLUME_MAX_LOG_FILES,
        _ => DEFAULT_MAX_LOG_FILES,
    }
}

/// Per-kind live state held for the duration of a session.
struct KindState {
    cursor: LogCursor,
    log: RollingLog,
    last_packet_number: Option<u32>,
}

/// Runs the log-multiplexer session for one remote row until a fatal error
/// or a supervisor-signaled shutdown. Mirrors `MonitorWorker::run`'s
/// top-level shape (connect, loop, teardown) but owns an entirely different
/// inner loop: a byte-stream frame parser instead of line commands.
pub struct LogWorker {
    rlog_dir: PathBuf,
    row: usize,
    alias: String,
    host: String,
    port: u16,
    options: AfdOptions,
    kinds: HashMap<LogKind, KindState>,
    buf: Vec<u8>,
    framing_failures: u32,
    idle_deadline: Duration,
    tcp_timeout_s: u64,
    poll_interval_s: u64,
}

impl LogWorker {
    /// `rlog_dir` is the already-resolved root of the rolling log tree
    /// (`AfdMonConfig::resolved_rlog_dir`, spec §6.1 `rlog_dir/<alias>/`),
    /// not the controller's working directory.
    pub fn new(
        rlog_dir: PathBuf,
        row: usize,
        alias: String,
        host: String,
        port: u16,
        options: AfdOptions,
        cmd_timeout_s: u64,
        poll_interval_s: u64,
    ) -> Self {
        let log_write_interval_s = 3u64;
        let idle_deadline = Duration::from_secs(cmd_timeout_s.max(10 * log_write_interval_s));
        Self {
            rlog_dir,
            row,
            alias,
            host,
            port,
            options,
            kinds: HashMap::new(),
            buf: Vec::with_capacity(8192),
            framing_failures: 0,
            idle_deadline,
            tcp_timeout_s: cmd_timeout_s,
            poll_interval_s,
        }
    }

    fn log_dir(&self) -> PathBuf {
        self.rlog_dir.join(&self.alias)
    }

    /// Loads persisted cursors and prepares (but does not yet open) the
    /// rolling log handle for each requested kind.
    fn prepare_kinds(&mut self) -> Result<(), AfdMonError> {
        let dir = self.log_dir();
        std::fs::create_dir_all(&dir)?;
        for kind in self.options.requested_log_kinds() {
            let cursor = LogCursor::load(&dir, kind)?;
            let log = RollingLog::new(dir.clone(), kind, max_log_files_for(kind));
            self.kinds.insert(
                kind,
                KindState {
                    cursor,
                    log,
                    last_packet_number: None,
                },
            );
        }
        Ok(())
    }

    /// Builds the single aggregated `LOG` command line for every requested
    /// kind (spec §4.G "Session setup").
    fn build_log_command(&self) -> String {
        let mut parts = Vec::new();
        for (kind, state) in &self.kinds {
            let (inode, logno) = state.cursor.inode_logno();
            parts.push(format!(
                "LOG 0 {}{} 0 {} {}",
                kind.as_letter(),
                self.options.bits(),
                inode,
                logno
            ));
        }
        parts.join(" ")
    }

    /// Runs one full session: connect, issue LOG, stream frames until exit.
    /// Returns the `AfdMonError` that ended the session (per spec §4.G, every
    /// exit path is an error — a clean shutdown is signaled out-of-band by
    /// the supervisor killing the process, not by this function returning
    /// `Ok`).
    pub async fn run(&mut self, store: &MsaStore) -> AfdMonError {
        if let Err(e) = self.prepare_kinds() {
            return e;
        }
        if self.kinds.is_empty() {
            // Nothing requested: idle forever rather than error, since a
            // remote with zero log options configured is legitimate.
            loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }

        let mut client = match self.connect_with_backoff().await {
            Ok(c) => c,
            Err(e) => return e,
        };

        let cmd = self.build_log_command();
        if let Err(e) = client.command(&cmd).await {
            return e;
        }
        let reply = match client.read_msg().await {
            Ok(r) => r,
            Err(e) => return e,
        };
        if !reply.starts_with("211-") {
            return AfdMonError::FailedLogCmd(reply);
        }

        let result = self.stream_loop(&mut client, store).await;
        let _ = client.quit().await;
        for state in self.kinds.values_mut() {
            state.log.close();
        }
        result.unwrap_err_or(AfdMonError::Internal("log session ended without error".into()))
    }

    /// Retries the initial connect up to `MAX_CONNECT_ATTEMPTS` times with
    /// bounded exponential backoff before giving up (spec §4.G, `SPEC_FULL.md`
    /// §4.1).
    async fn connect_with_backoff(&self) -> Result<ReplyClient, AfdMonError> {
        let mut attempt: u32 = 0;
        loop {
            match ReplyClient::connect(&self.host, self.port, true, self.options.contains(AfdOptions::ENABLE_TLS)).await {
                Ok(c) => return Ok(c),
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_CONNECT_ATTEMPTS {
                        return Err(e);
                    }
                    warn!(alias = %self.alias, error = %e, attempt, "log worker connect failed, retrying");
                    tokio::time::sleep(bounded_exponential(self.poll_interval_s, self.tcp_timeout_s, attempt - 1)).await;
                }
            }
        }
    }

    async fn stream_loop(&mut self, client: &mut ReplyClient, store: &MsaStore) -> Result<(), AfdMonError> {
        let mut last_activity = Instant::now();
        loop {
            let chunk = match tokio::time::timeout(self.idle_deadline, client.read_raw()).await {
                Ok(Ok(c)) => c,
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(AfdMonError::LogDataTimeout),
            };
            if chunk.is_empty() {
                return Err(AfdMonError::RemoteHangup);
            }
            last_activity = Instant::now();
            store.add_log_bytes_received(self.row, chunk.len() as u64);
            self.buf.extend_from_slice(&chunk);

            loop {
                match frame::parse_one(&self.buf) {
                    Ok(Some((frame, consumed))) => {
                        self.framing_failures = 0;
                        self.handle_frame(frame, store)?;
                        self.buf.drain(..consumed);
                    }
                    Ok(None) => break, // need more bytes
                    Err(_) => {
                        self.framing_failures += 1;
                        warn!(alias = %self.alias, "discarding unparseable log stream buffer");
                        self.buf.clear();
                        if self.framing_failures >= MAX_FRAMING_FAILURES {
                            return Err(AfdMonError::FramingFailure);
                        }
                        break;
                    }
                }
            }
            debug!(alias = %self.alias, since_last = ?last_activity.elapsed(), "log stream tick");
        }
    }

    fn handle_frame(&mut self, frame: Frame, store: &MsaStore) -> Result<(), AfdMonError> {
        match frame {
            Frame::Nop => Ok(()),
            Frame::Packet { kind, pktno, payload, .. } => {
                let state = self
                    .kinds
                    .get_mut(&kind)
                    .ok_or_else(|| AfdMonError::Internal(format!("packet for unrequested kind {kind:?}")))?;
                let expected_ok = match state.last_packet_number {
                    Some(last) => pktno == last.wrapping_add(1) || pktno == 0,
                    None => true,
                };
                if !expected_ok {
                    crate::core::metrics::MISSED_PACKET_TOTAL.inc();
                    return Err(AfdMonError::MissedPacket {
                        expected: state.last_packet_number.unwrap_or(0).wrapping_add(1),
                        got: pktno,
                    });
                }
                state.log.append(&payload)?;
                state.last_packet_number = Some(pktno);
                Ok(())
            }
            Frame::OControl { kind, inode, logno } => {
                let dir = self.log_dir();
                let state = self
                    .kinds
                    .get_mut(&kind)
                    .ok_or_else(|| AfdMonError::Internal(format!("ocontrol for unrequested kind {kind:?}")))?;
                apply_ocontrol(&dir, kind, state, inode, logno)
            }
        }
    }
}

/// Interprets an O-control cursor update against the stored cursor (spec
/// §4.G "O-control handling").
fn apply_ocontrol(dir: &Path, kind: LogKind, state: &mut KindState, remote_inode: u64, remote_logno: u32) -> Result<(), AfdMonError> {
    let (local_inode, local_logno) = state.cursor.inode_logno();

    if local_inode == remote_inode && local_logno == remote_logno {
        return Ok(());
    }
    if state.cursor.is_empty() {
        state.cursor.set(remote_inode, remote_logno);
        state.cursor.persist(dir, kind)?;
        state.log.ensure_open()?;
        return Ok(());
    }
    if local_inode == remote_inode && remote_logno > local_logno {
        info!(?kind, shift = remote_logno, shift_offset = local_logno, "log reshuffle");
        state.log.reshuffle(local_logno, remote_logno)?;
        state.cursor.set(remote_inode, remote_logno);
        state.cursor.persist(dir, kind)?;
        return Ok(());
    }
    if local_inode != remote_inode && local_logno == 0 {
        info!(?kind, shift = remote_logno, shift_offset = 0, "log reshuffle (inode change, logno 0)");
        state.log.reshuffle(0, remote_logno)?;
        state.cursor.set(remote_inode, remote_logno);
        state.cursor.persist(dir, kind)?;
        return Ok(());
    }
    info!(?kind, "log stale: reopening fresh active log");
    state.log.reopen_fresh()?;
    state.cursor.set(remote_inode, remote_logno);
    state.cursor.persist(dir, kind)?;
    Ok(())
}

/// Small extension trait so `run` can spell out "always return an error" at
/// the call site without an `if let`.
trait ResultExt {
    fn unwrap_err_or(self, default: AfdMonError) -> AfdMonError;
}

impl ResultExt for Result<(), AfdMonError> {
    fn unwrap_err_or(self, default: AfdMonError) -> AfdMonError {
        match self {
            Ok(()) => default,
            Err(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_log_files_high_volume_kinds() {
        assert_eq!(max_log_files_for(LogKind::Transfer), HIGH_VOLUME_MAX_LOG_FILES);
        assert_eq!(max_log_files_for(LogKind::Event), DEFAULT_MAX_LOG_FILES);
    }
}
