// src/core/msa/row.rs

//! `MsaRow`: the per-remote status record (spec §3.1 "MsaRow"). Values are
//! kept as plain Rust structs in the worker/supervisor processes; `codec.rs`
//! (in `store.rs`) is responsible for the fixed-layout encode/decode against
//! the memory-mapped backing file.

use crate::core::config_entry::ConfigEntry;
use crate::core::options::AfdOptions;

pub const TOP_N: usize = 7;
pub const SUM_BUCKETS: usize = 6;
/// Per spec §3.1: "two-dimensional byte grid `[kind=3][history=48]`".
pub const LOG_HISTORY_KINDS: usize = 3;
pub const LOG_HISTORY_LEN: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectStatus {
    Disabled,
    Disconnected,
    Defunct,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ComponentStatus {
    Stopped,
    Starting,
    Running,
    ShuttingDown,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    None,
    Info,
    Warn,
    Error,
    Config,
    Faulty,
    Offline,
}

impl LogCategory {
    pub fn as_u8(self) -> u8 {
        match self {
            LogCategory::None => 0,
            LogCategory::Info => 1,
            LogCategory::Warn => 2,
            LogCategory::Error => 3,
            LogCategory::Config => 4,
            LogCategory::Faulty => 5,
            LogCategory::Offline => 6,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => LogCategory::Info,
            2 => LogCategory::Warn,
            3 => LogCategory::Error,
            4 => LogCategory::Config,
            5 => LogCategory::Faulty,
            6 => LogCategory::Offline,
            _ => LogCategory::None,
        }
    }
}

bitflags::bitflags! {
    /// `special_flag` bitset (spec §3.1 "Liveness").
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SpecialFlags: u8 {
        const SUM_VALUES_INITIALIZED = 0x01;
    }
}

/// One remote's worth of sum-bucket counters: 6 rolling windows, one value
/// per window, for a single metric.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SumBuckets {
    pub windows: [f64; SUM_BUCKETS],
}

impl SumBuckets {
    pub const CURRENT_SUM: usize = 0;

    pub fn add_current(&mut self, amount: f64) {
        self.windows[Self::CURRENT_SUM] += amount;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MsaRow {
    // Identity (mirrored from ConfigEntry at load time).
    pub alias: String,
    pub afd_id: u32,
    pub host: [String; 2],
    pub port: [u16; 2],

    /// Whether this row is a group header whose metrics are the aggregate
    /// of the contiguous non-group rows that follow it (spec §4.B "Group
    /// aggregation"), rather than a live remote connection of its own.
    pub is_group_header: bool,

    // Liveness.
    pub connect_status: ConnectStatus,
    pub afd_toggle: u8,
    pub special_flag: SpecialFlags,

    // Component status.
    pub amg: ComponentStatus,
    pub fd: ComponentStatus,
    pub archive_watch: ComponentStatus,

    // Instantaneous counters.
    pub jobs_in_queue: u32,
    pub danger_no_of_jobs: u32,
    pub no_of_transfers: u32,
    pub host_error_counter: u32,
    pub no_of_hosts: u32,
    pub no_of_dirs: u32,
    pub no_of_jobs: u32,
    pub fc: u64,
    pub fs: u64,
    pub tr: u64,
    pub fr: u64,
    pub ec: u64,

    // Top-N-over-time arrays.
    pub top_no_of_transfers: [u32; TOP_N],
    pub top_tr: [u64; TOP_N],
    pub top_fr: [u64; TOP_N],
    pub top_timestamps: [i64; TOP_N],

    // Sum buckets.
    pub bytes_sent: SumBuckets,
    pub bytes_received: SumBuckets,
    pub log_bytes_received: SumBuckets,
    pub files_sent: SumBuckets,
    pub files_received: SumBuckets,
    pub connections: SumBuckets,
    pub total_errors: SumBuckets,

    // Log history.
    pub log_history: [[u8; LOG_HISTORY_LEN]; LOG_HISTORY_KINDS],

    // Log capability/option bitsets.
    pub options: AfdOptions,
    pub log_capabilities: AfdOptions,

    pub last_data_time: i64,
}

impl MsaRow {
    /// Constructs a brand-new row for `entry`, with runtime fields at their
    /// defaults (spec §4.B step 6): `disabled` for a group header, else
    /// `disconnected`.
    pub fn new_from_entry(entry: &ConfigEntry) -> Self {
        let connect_status = if entry.is_group_header() {
            ConnectStatus::Disabled
        } else {
            ConnectStatus::Disconnected
        };
        Self {
            alias: entry.alias.clone(),
            afd_id: checksum(&entry.alias),
            host: entry.host.clone(),
            port: entry.port,
            is_group_header: entry.is_group_header(),
            connect_status,
            afd_toggle: 0,
            special_flag: SpecialFlags::default(),
            amg: ComponentStatus::Unknown,
            fd: ComponentStatus::Unknown,
            archive_watch: ComponentStatus::Unknown,
            jobs_in_queue: 0,
            danger_no_of_jobs: 0,
            no_of_transfers: 0,
            host_error_counter: 0,
            no_of_hosts: 0,
            no_of_dirs: 0,
            no_of_jobs: 0,
            fc: 0,
            fs: 0,
            tr: 0,
            fr: 0,
            ec: 0,
            top_no_of_transfers: [0; TOP_N],
            top_tr: [0; TOP_N],
            top_fr: [0; TOP_N],
            top_timestamps: [0; TOP_N],
            bytes_sent: SumBuckets::default(),
            bytes_received: SumBuckets::default(),
            log_bytes_received: SumBuckets::default(),
            files_sent: SumBuckets::default(),
            files_received: SumBuckets::default(),
            connections: SumBuckets::default(),
            total_errors: SumBuckets::default(),
            log_history: [[0; LOG_HISTORY_LEN]; LOG_HISTORY_KINDS],
            options: entry.options,
            log_capabilities: entry.options,
            last_data_time: 0,
        }
    }

    /// Overwrites config-derived fields from `entry` while leaving runtime
    /// fields untouched (spec §3.3 "MsaRow" lifecycle: fields partitioned
    /// into config-derived, overwritten every rebuild, and runtime, carried
    /// over when the alias matches).
    pub fn refresh_config_fields(&mut self, entry: &ConfigEntry) {
        self.alias = entry.alias.clone();
        self.host = entry.host.clone();
        self.port = entry.port;
        self.options = entry.options;
        self.log_capabilities = entry.options;
    }
}

/// Stable 32-bit checksum of `alias` (spec §3.1 `afd_id`). CRC-32/ISO-HDLC is
/// a reasonable stand-in for the "stable 32-bit checksum" the spec leaves
/// otherwise unspecified; any later row carrying the same alias recomputes
/// to the same value, which is the only property the spec actually requires.
pub fn checksum(alias: &str) -> u32 {
    crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC).checksum(alias.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_entry::{ConfigEntry, Switching};

    fn entry(alias: &str, rcmd: &str) -> ConfigEntry {
        ConfigEntry {
            alias: alias.to_string(),
            host: ["h".to_string(), "h".to_string()],
            port: [4444, 4444],
            switching: Switching::None,
            poll_interval_s: 5,
            connect_time_s: 5,
            disconnect_time_s: 60,
            rcmd: rcmd.to_string(),
            options: AfdOptions::default(),
            convert_username: Vec::new(),
        }
    }

    #[test]
    fn checksum_is_stable() {
        assert_eq!(checksum("alpha"), checksum("alpha"));
        assert_ne!(checksum("alpha"), checksum("beta"));
    }

    #[test]
    fn group_header_row_starts_disabled() {
        let row = MsaRow::new_from_entry(&entry("g", ""));
        assert_eq!(row.connect_status, ConnectStatus::Disabled);
    }

    #[test]
    fn normal_row_starts_disconnected() {
        let row = MsaRow::new_from_entry(&entry("a", "rsh"));
        assert_eq!(row.connect_status, ConnectStatus::Disconnected);
        assert_eq!(row.afd_id, checksum("a"));
    }
}
