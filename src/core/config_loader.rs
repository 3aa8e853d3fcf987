// src/core/config_loader.rs

//! Component C: the AFD_MON_CONFIG loader (spec §4.C).
//!
//! This is a thin shim around the remote-fleet configuration file. It is not
//! the controller's own ambient config (see `crate::config`), and it is
//! deliberately not parsed with `serde`/`toml`: the wire format is a fixed,
//! whitespace-delimited text format owned by the wider AFD project, not
//! something we get to redesign.

use std::path::Path;

use tracing::warn;

use super::config_entry::{
    ConfigEntry, Switching, UsernameConversion, DEFAULT_CONNECT_TIME_S, DEFAULT_DISCONNECT_TIME_S,
    DEFAULT_PORT, DEFAULT_POLL_INTERVAL_S, MAX_ALIAS_LENGTH, MAX_CONVERT_USERNAME, MAX_HOST_LENGTH,
};
use super::errors::AfdMonError;
use super::options::AfdOptions;

/// Parses an `AFD_MON_CONFIG` file into a validated list of `ConfigEntry`.
pub fn load_from_file(path: &Path) -> Result<Vec<ConfigEntry>, AfdMonError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AfdMonError::MonSyntaxError(format!("cannot read {}: {e}", path.display())))?;
    parse(&content)
}

/// Parses the textual contents of an `AFD_MON_CONFIG` file.
///
/// Grammar per line (spec §4.C):
/// `alias host[|/host2] port[|/port2] poll_s connect_s disconnect_s options rcmd [user1->user2]...`
///
/// Lines starting with `#` are comments. Trailing fields missing from a line
/// fall back to the documented defaults. Over-long `alias`/`host` values are
/// truncated with a warning rather than rejected. A group header needs an
/// explicit empty `rcmd` even when later fields (e.g. a username conversion)
/// are present; since whitespace-splitting can't produce an empty token, `-`
/// in the `rcmd` position is read as empty rather than a literal `"-"`.
pub fn parse(content: &str) -> Result<Vec<ConfigEntry>, AfdMonError> {
    let mut entries = Vec::new();
    let mut seen_aliases = std::collections::HashSet::new();

    for (lineno, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&alias_raw) = tokens.first() else {
            continue;
        };

        let alias = truncate_with_warning(alias_raw, MAX_ALIAS_LENGTH, "alias", lineno + 1);
        if !seen_aliases.insert(alias.clone()) {
            warn!(
                "AFD_MON_CONFIG line {}: duplicate alias '{}', skipping",
                lineno + 1,
                alias
            );
            continue;
        }

        let (host, host_switching) = tokens
            .get(1)
            .map(|t| parse_pair_field(t, lineno + 1, "host", MAX_HOST_LENGTH))
            .unwrap_or((["".to_string(), "".to_string()], None));
        let (port, port_switching) = tokens
            .get(2)
            .map(|t| parse_port_field(t))
            .unwrap_or(([DEFAULT_PORT, DEFAULT_PORT], None));

        let switching = host_switching.or(port_switching).unwrap_or_default();

        let poll_interval_s = tokens
            .get(3)
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_S);
        let connect_time_s = tokens
            .get(4)
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CONNECT_TIME_S);
        let disconnect_time_s = tokens
            .get(5)
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_DISCONNECT_TIME_S);
        let options = tokens
            .get(6)
            .and_then(|s| s.parse::<u32>().ok())
            .map(AfdOptions::from_bits_truncate)
            .unwrap_or_default();
        // A bare "-" is the only way to spell an explicit empty `rcmd` in a
        // whitespace-delimited grammar (an actually-empty token can't survive
        // `split_whitespace`); omitting the field entirely still defaults to
        // "rsh" per the documented trailing-field defaults.
        let rcmd = match tokens.get(7).copied() {
            Some("-") => String::new(),
            Some(s) => s.to_string(),
            None => "rsh".to_string(),
        };
        if !(rcmd.is_empty() || rcmd == "rsh" || rcmd == "ssh") {
            warn!(
                "AFD_MON_CONFIG line {}: unknown rcmd '{}', defaulting to 'rsh'",
                lineno + 1,
                rcmd
            );
        }

        let mut convert_username = Vec::new();
        for tok in tokens.iter().skip(8).take(MAX_CONVERT_USERNAME) {
            if let Some((from, to)) = tok.split_once("->") {
                convert_username.push(UsernameConversion {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            } else {
                warn!(
                    "AFD_MON_CONFIG line {}: malformed username conversion '{}', ignoring",
                    lineno + 1,
                    tok
                );
            }
        }

        let entry = ConfigEntry {
            alias,
            host,
            port,
            switching,
            poll_interval_s,
            connect_time_s,
            disconnect_time_s,
            rcmd,
            options,
            convert_username,
        };

        // Open Question (spec §9), resolved: a group header (empty rcmd)
        // never simultaneously carries a switching configuration, since a
        // group row has no connection identity of its own.
        if entry.is_group_header() && entry.switching != Switching::None {
            warn!(
                "AFD_MON_CONFIG line {}: group header '{}' may not configure switching; forcing none",
                lineno + 1,
                entry.alias
            );
            let mut entry = entry;
            entry.switching = Switching::None;
            entries.push(entry);
            continue;
        }

        entries.push(entry);
    }

    Ok(entries)
}

/// Parses a `host[|/host2]` field, returning the resolved `[host0, host1]`
/// pair and, if a separator was present, the switching mode it selects.
fn parse_pair_field(field: &str, lineno: usize, what: &str, max_len: usize) -> ([String; 2], Option<Switching>) {
    if let Some((a, b)) = field.split_once('|') {
        let a = truncate_with_warning(a, max_len, what, lineno);
        let b = truncate_with_warning(b, max_len, what, lineno);
        ([a, b], Some(Switching::Auto))
    } else if let Some((a, b)) = field.split_once('/') {
        let a = truncate_with_warning(a, max_len, what, lineno);
        let b = truncate_with_warning(b, max_len, what, lineno);
        ([a, b], Some(Switching::User))
    } else {
        let a = truncate_with_warning(field, max_len, what, lineno);
        let b = a.clone();
        ([a, b], None)
    }
}

/// Parses a `port[|/port2]` field; non-numeric ports revert to `DEFAULT_PORT`
/// (spec §4.C).
fn parse_port_field(field: &str) -> ([u16; 2], Option<Switching>) {
    let (raw0, raw1, switching) = if let Some((a, b)) = field.split_once('|') {
        (a, b, Some(Switching::Auto))
    } else if let Some((a, b)) = field.split_once('/') {
        (a, b, Some(Switching::User))
    } else {
        (field, field, None)
    };
    let p0 = raw0.parse().unwrap_or(DEFAULT_PORT);
    let p1 = raw1.parse().unwrap_or(DEFAULT_PORT);
    ([p0, p1], switching)
}

fn truncate_with_warning(value: &str, max_len: usize, what: &str, lineno: usize) -> String {
    if value.len() > max_len {
        warn!(
            "AFD_MON_CONFIG line {}: {} '{}' exceeds {} bytes, truncating",
            lineno, what, value, max_len
        );
        value.as_bytes()[..max_len]
            .iter()
            .map(|&b| b as char)
            .collect()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_line() {
        let entries = parse("alpha host1 4444\n").unwrap();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.alias, "alpha");
        assert_eq!(e.host, ["host1".to_string(), "host1".to_string()]);
        assert_eq!(e.port, [4444, 4444]);
        assert_eq!(e.switching, Switching::None);
        assert_eq!(e.poll_interval_s, DEFAULT_POLL_INTERVAL_S);
        assert_eq!(e.rcmd, "rsh");
    }

    #[test]
    fn parses_full_line_with_auto_switching_and_conversions() {
        let line = "beta hostA|hostB 100|200 5 5 60 16 ssh bob->robert alice->alicia\n";
        let entries = parse(line).unwrap();
        let e = &entries[0];
        assert_eq!(e.switching, Switching::Auto);
        assert_eq!(e.host, ["hostA".to_string(), "hostB".to_string()]);
        assert_eq!(e.port, [100, 200]);
        assert!(e.options.contains(AfdOptions::SYSTEM_LOG));
        assert_eq!(e.convert_username.len(), 2);
        assert_eq!(e.convert_username[0].from, "bob");
        assert_eq!(e.convert_username[0].to, "robert");
    }

    #[test]
    fn comments_and_blank_lines_skipped() {
        let entries = parse("# a comment\n\nalpha host1 4444\n").unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn non_numeric_port_reverts_to_default() {
        let entries = parse("alpha host1 not-a-port\n").unwrap();
        assert_eq!(entries[0].port, [DEFAULT_PORT, DEFAULT_PORT]);
    }

    #[test]
    fn over_long_alias_truncated() {
        let long = "a".repeat(MAX_ALIAS_LENGTH + 5);
        let entries = parse(&format!("{long} host1 4444\n")).unwrap();
        assert_eq!(entries[0].alias.len(), MAX_ALIAS_LENGTH);
    }

    #[test]
    fn duplicate_alias_is_dropped() {
        let entries = parse("alpha host1 4444\nalpha host2 5555\n").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].host[0], "host1");
    }

    #[test]
    fn group_header_has_empty_rcmd_and_no_switching() {
        let entries = parse("group1 hostA|hostB 100|200 5 5 60 0 -\n").unwrap();
        assert!(entries[0].is_group_header());
        assert_eq!(entries[0].switching, Switching::None);
    }

    #[test]
    fn omitted_trailing_rcmd_defaults_to_rsh_not_group_header() {
        let entries = parse("alpha host1 4444 5 5 60 0\n").unwrap();
        assert!(!entries[0].is_group_header());
        assert_eq!(entries[0].rcmd, "rsh");
    }
}
