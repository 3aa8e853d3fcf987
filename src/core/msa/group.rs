// src/core/msa/group.rs

//! `update_group_summary` (spec §4.B "Group aggregation"): a group-header
//! row's metrics are recomputed as the aggregate of the contiguous run of
//! non-group rows that follow it, up to (not including) the next group
//! header or the end of the table.

use super::row::{ComponentStatus, ConnectStatus, MsaRow, LOG_HISTORY_KINDS, LOG_HISTORY_LEN};

/// Recomputes every group header's aggregate fields from its member rows.
/// Idempotent: running it twice in a row leaves the table unchanged, since
/// the aggregation only ever reads member rows and overwrites header rows,
/// never vice versa (spec §8.2).
pub fn update_group_summary(rows: &mut [MsaRow]) {
    let mut i = 0;
    while i < rows.len() {
        if !rows[i].is_group_header {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < rows.len() && !rows[end].is_group_header {
            end += 1;
        }
        if end > start {
            aggregate_into(&mut rows[i], &rows[start..end]);
        }
        i = end;
    }
}

fn aggregate_into(header: &mut MsaRow, members: &[MsaRow]) {
    header.connect_status = members
        .iter()
        .map(|m| m.connect_status)
        .max()
        .unwrap_or(ConnectStatus::Disabled);

    for kind in 0..LOG_HISTORY_KINDS {
        for slot in 0..LOG_HISTORY_LEN {
            header.log_history[kind][slot] = members
                .iter()
                .map(|m| m.log_history[kind][slot])
                .max()
                .unwrap_or(0);
        }
    }

    header.no_of_transfers = members.iter().map(|m| m.no_of_transfers).sum();
    header.host_error_counter = members.iter().map(|m| m.host_error_counter).sum();
    header.jobs_in_queue = members.iter().map(|m| m.jobs_in_queue).sum();
    header.danger_no_of_jobs = members.iter().map(|m| m.danger_no_of_jobs).sum();
    header.fc = members.iter().map(|m| m.fc).sum();
    header.fs = members.iter().map(|m| m.fs).sum();
    header.tr = members.iter().map(|m| m.tr).sum();
    header.fr = members.iter().map(|m| m.fr).sum();
    header.ec = members.iter().map(|m| m.ec).sum();
    header.no_of_hosts = members.iter().map(|m| m.no_of_hosts).sum();
    header.no_of_dirs = members.iter().map(|m| m.no_of_dirs).sum();
    header.no_of_jobs = members.iter().map(|m| m.no_of_jobs).sum();
    // No distinct "max connections" field exists on MsaRow; the closest
    // available signal is the connections sum bucket's running total, which
    // we sum across members the same way as the other counters.
    header.connections.windows[0] = members.iter().map(|m| m.connections.windows[0]).sum();

    header.last_data_time = members.iter().map(|m| m.last_data_time).max().unwrap_or(0);

    header.amg = min_component_status(members.iter().map(|m| m.amg));
    header.fd = min_component_status(members.iter().map(|m| m.fd));
    header.archive_watch = min_component_status(members.iter().map(|m| m.archive_watch));

    if header.no_of_transfers > header.top_no_of_transfers[0] {
        header.top_no_of_transfers[0] = header.no_of_transfers;
    }
    if header.tr > header.top_tr[0] {
        header.top_tr[0] = header.tr;
    }
    if header.fr > header.top_fr[0] {
        header.top_fr[0] = header.fr;
    }
}

/// Minimum state across members, except that a mix of `Running` and
/// `ShuttingDown` resolves to `ShuttingDown` (partial shutdown wins, spec
/// §4.B).
fn min_component_status(mut states: impl Iterator<Item = ComponentStatus>) -> ComponentStatus {
    let Some(first) = states.next() else {
        return ComponentStatus::Unknown;
    };
    let mut min = first;
    let mut saw_running = first == ComponentStatus::Running;
    let mut saw_shutting_down = first == ComponentStatus::ShuttingDown;
    for s in states {
        saw_running |= s == ComponentStatus::Running;
        saw_shutting_down |= s == ComponentStatus::ShuttingDown;
        if s < min {
            min = s;
        }
    }
    if saw_running && saw_shutting_down {
        ComponentStatus::ShuttingDown
    } else {
        min
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_entry::{ConfigEntry, Switching};
    use crate::core::options::AfdOptions;

    fn member(alias: &str, transfers: u32) -> MsaRow {
        let entry = ConfigEntry {
            alias: alias.into(),
            host: ["h".into(), "h".into()],
            port: [4444, 4444],
            switching: Switching::None,
            poll_interval_s: 5,
            connect_time_s: 5,
            disconnect_time_s: 60,
            rcmd: "rsh".into(),
            options: AfdOptions::default(),
            convert_username: Vec::new(),
        };
        let mut row = MsaRow::new_from_entry(&entry);
        row.no_of_transfers = transfers;
        row.connect_status = ConnectStatus::Connected;
        row
    }

    fn header(alias: &str) -> MsaRow {
        let entry = ConfigEntry {
            alias: alias.into(),
            host: ["".into(), "".into()],
            port: [0, 0],
            switching: Switching::None,
            poll_interval_s: 5,
            connect_time_s: 5,
            disconnect_time_s: 60,
            rcmd: "".into(),
            options: AfdOptions::default(),
            convert_username: Vec::new(),
        };
        MsaRow::new_from_entry(&entry)
    }

    #[test]
    fn sums_transfers_and_picks_max_status() {
        let mut rows = vec![header("g"), member("a", 3), member("b", 5)];
        update_group_summary(&mut rows);
        assert_eq!(rows[0].no_of_transfers, 8);
        assert_eq!(rows[0].connect_status, ConnectStatus::Connected);
        assert_eq!(rows[0].top_no_of_transfers[0], 8);
    }

    #[test]
    fn idempotent() {
        let mut rows = vec![header("g"), member("a", 3), member("b", 5)];
        update_group_summary(&mut rows);
        let after_first = rows.clone();
        update_group_summary(&mut rows);
        assert_eq!(rows, after_first);
    }

    #[test]
    fn group_with_no_members_is_untouched() {
        let mut rows = vec![header("g")];
        let before = rows.clone();
        update_group_summary(&mut rows);
        assert_eq!(rows, before);
    }

    #[test]
    fn partial_shutdown_wins_over_running() {
        let mut rows = vec![header("g"), member("a", 1), member("b", 1)];
        rows[1].fd = ComponentStatus::Running;
        rows[2].fd = ComponentStatus::ShuttingDown;
        update_group_summary(&mut rows);
        assert_eq!(rows[0].fd, ComponentStatus::ShuttingDown);
    }
}
