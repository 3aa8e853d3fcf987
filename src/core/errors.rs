// src/core/errors.rs

//! Defines the primary error type for the monitor controller and its workers.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within a worker or
/// the supervisor. Using `thiserror` gives clean error definitions and
/// automatic `From` impls for the `?` operator.
#[derive(Error, Debug, Clone)]
pub enum AfdMonError {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("connection could not be established")]
    Incorrect,

    #[error("read timed out waiting for a reply")]
    Timeout,

    #[error("peer reset the connection")]
    ConnectionReset,

    #[error("remote hung up (read returned 0 bytes)")]
    RemoteHangup,

    #[error("malformed AFD_MON_CONFIG syntax: {0}")]
    MonSyntaxError(String),

    #[error("LOG command rejected by remote: {0}")]
    FailedLogCmd(String),

    #[error("could not connect for log streaming: {0}")]
    LogConnectError(String),

    #[error("no log data received within the deadline")]
    LogDataTimeout,

    #[error("packet sequence gap: expected {expected}, got {got}")]
    MissedPacket { expected: u32, got: u32 },

    #[error("three consecutive framing failures")]
    FramingFailure,

    #[error("MSA region is stale or corrupt: {0}")]
    StaleMsa(String),

    #[error("MSA schema version {0} is not in the supported range 0..=3")]
    UnsupportedMsaVersion(u8),

    #[error("could not acquire the msa.id advisory lock: {0}")]
    LockFailed(String),

    #[error("another monitor instance is alive (exit code {0})")]
    AlreadyAlive(i32),

    #[error("garbage received on the probe FIFO")]
    ProbeGarbage,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AfdMonError {
    fn from(e: std::io::Error) -> Self {
        AfdMonError::Io(Arc::new(e))
    }
}

impl From<std::num::ParseIntError> for AfdMonError {
    fn from(e: std::num::ParseIntError) -> Self {
        AfdMonError::Internal(format!("integer parse error: {e}"))
    }
}

/// Stable process exit codes, consumed by the supervisor's restart policy (spec §6.4).
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const INCORRECT: i32 = 1;
    pub const MON_SYNTAX_ERROR: i32 = 2;
    pub const FAILED_LOG_CMD: i32 = 3;
    pub const LOG_CONNECT_ERROR: i32 = 4;
    pub const LOG_DATA_TIMEOUT: i32 = 5;
    pub const REMOTE_HANGUP: i32 = 6;
    pub const MISSED_PACKET: i32 = 7;
    /// Not part of spec §6.4's enumerated set, but a stable code a peer probe
    /// can rely on distinguishing from a crash (spec §4.D).
    pub const ACKN: i32 = 10;
    pub const ACKN_STOPPED: i32 = 11;
}

impl AfdMonError {
    /// Maps this error to one of the stable exit codes of spec §6.4.
    pub fn exit_code(&self) -> i32 {
        use exit_code::*;
        match self {
            AfdMonError::MonSyntaxError(_) => MON_SYNTAX_ERROR,
            AfdMonError::FailedLogCmd(_) => FAILED_LOG_CMD,
            AfdMonError::LogConnectError(_) => LOG_CONNECT_ERROR,
            AfdMonError::LogDataTimeout => LOG_DATA_TIMEOUT,
            AfdMonError::RemoteHangup => REMOTE_HANGUP,
            AfdMonError::MissedPacket { .. } => MISSED_PACKET,
            AfdMonError::AlreadyAlive(code) => *code,
            _ => INCORRECT,
        }
    }
}
