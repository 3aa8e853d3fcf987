// src/core/config_entry.rs

//! `ConfigEntry`: one configured remote AFD instance (spec §3.1), plus the
//! small enums it's built from. Parsed by `config_loader`, consumed by the
//! MSA store (component B) and the supervisor (component E).

use super::options::AfdOptions;

/// Maximum length, in graphical bytes, of an `alias`.
pub const MAX_ALIAS_LENGTH: usize = 12;
/// Maximum length, in bytes, of a `host` entry.
pub const MAX_HOST_LENGTH: usize = 39;
/// Maximum number of username conversion pairs per entry.
pub const MAX_CONVERT_USERNAME: usize = 5;

pub const DEFAULT_POLL_INTERVAL_S: u32 = 5;
pub const DEFAULT_CONNECT_TIME_S: u32 = 5;
pub const DEFAULT_DISCONNECT_TIME_S: u32 = 60;
pub const DEFAULT_PORT: u16 = 8001;

/// Whether and how a remote's two configured hostnames are switched between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Switching {
    /// Only `host[0]`/`port[0]` are ever used.
    #[default]
    None,
    /// The controller automatically toggles on repeated failure.
    Auto,
    /// Only an operator (external admin tool) toggles which host is active.
    User,
}

/// A `(from, to)` username conversion pair applied by the `rcmd` transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsernameConversion {
    pub from: String,
    pub to: String,
}

/// One configured remote, as parsed from `AFD_MON_CONFIG` (spec §3.1, §4.C).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub alias: String,
    pub host: [String; 2],
    pub port: [u16; 2],
    pub switching: Switching,
    pub poll_interval_s: u32,
    pub connect_time_s: u32,
    pub disconnect_time_s: u32,
    /// `""`, `"rsh"`, or `"ssh"`. An empty `rcmd` marks this row as a group header (spec §4.B).
    pub rcmd: String,
    pub options: AfdOptions,
    pub convert_username: Vec<UsernameConversion>,
}

impl ConfigEntry {
    /// A group header is a row with no remote command transport: its metrics
    /// are the aggregate of the contiguous non-group rows that follow it
    /// (spec §4.B `update_group_summary`, glossary "Group row").
    pub fn is_group_header(&self) -> bool {
        self.rcmd.is_empty()
    }

    /// `switching = none` implies `host[1] == host[0]` and `port[1] == port[0]`
    /// (spec §3.2 invariant). Checked at load time by `config_loader`, not
    /// re-derived here, so this is just a convenience accessor.
    pub fn invariant_holds(&self) -> bool {
        if self.switching == Switching::None {
            self.host[1] == self.host[0] && self.port[1] == self.port[0]
        } else {
            true
        }
    }
}
