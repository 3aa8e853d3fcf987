// src/core/monitor_worker.rs

//! Component F: the per-remote monitor worker. Polls one remote over the
//! reply-code client (A), updating its own MSA row every cycle (spec §4.F).

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::backoff::bounded_exponential;
use crate::core::config_entry::ConfigEntry;
use crate::core::errors::AfdMonError;
use crate::core::msa::store::MsaStore;
use crate::core::msa::ConnectStatus;
use crate::core::reply_client::ReplyClient;

/// Backoff applied between reconnect attempts after a disconnect or timeout
/// (spec §4.F step 4; the exact schedule is an Open Question resolved in
/// `SPEC_FULL.md` §4.1: bounded exponential backoff starting at
/// `poll_interval`, doubling per consecutive failed attempt, capped at
/// `4 * tcp_timeout`).
fn reconnect_backoff(entry: &ConfigEntry, tcp_timeout_s: u64, attempt: u32) -> Duration {
    bounded_exponential(entry.poll_interval_s as u64, tcp_timeout_s, attempt)
}

/// Runs the monitor-worker loop for row `row` until the supervisor kills the
/// process (SIGINT/SIGTERM) or a fatal configuration change is signaled.
/// Unlike the log worker, a disconnect here is never itself fatal: the
/// function only returns on an externally requested shutdown.
pub async fn run(store: &MsaStore, row: usize, entry: &ConfigEntry, tcp_timeout_s: u64, shutdown: &tokio::sync::Notify) {
    let mut afd_toggle: usize = 0;
    let mut attempt: u32 = 0;

    loop {
        store.set_connect_status(row, ConnectStatus::Connecting);

        let host = &entry.host[afd_toggle];
        let port = entry.port[afd_toggle];

        let connect = ReplyClient::connect(host, port, false, entry.options.contains(crate::core::options::AfdOptions::ENABLE_TLS));

        tokio::select! {
            _ = shutdown.notified() => {
                info!(alias = %entry.alias, "monitor worker received shutdown signal");
                return;
            }
            result = connect => {
                match result {
                    Ok(mut client) => {
                        attempt = 0;
                        store.set_connect_status(row, ConnectStatus::Connected);
                        info!(alias = %entry.alias, %host, port, "monitor worker connected");
                        let outcome = poll_loop(&mut client, store, row, entry, shutdown).await;
                        let _ = client.quit().await;
                        match outcome {
                            PollOutcome::Shutdown => return,
                            PollOutcome::Disconnected(e) => {
                                attempt += 1;
                                warn!(alias = %entry.alias, error = %e, "monitor worker disconnected, will reconnect");
                            }
                        }
                    }
                    Err(e) => {
                        attempt += 1;
                        warn!(alias = %entry.alias, %host, port, error = %e, "monitor worker connect failed");
                    }
                }
            }
        }

        store.set_connect_status(row, ConnectStatus::Defunct);
        if entry.switching == crate::core::config_entry::Switching::Auto {
            afd_toggle = 1 - afd_toggle;
        }

        tokio::select! {
            _ = shutdown.notified() => return,
            _ = tokio::time::sleep(reconnect_backoff(entry, tcp_timeout_s, attempt)) => {}
        }
    }
}

enum PollOutcome {
    Shutdown,
    Disconnected(AfdMonError),
}

/// The tight poll loop: issue status commands, update the row, sleep
/// `poll_interval`, repeat, until disconnect/timeout or shutdown (spec
/// §4.F step 3).
///
/// The real AFD wire protocol for counters/component status is an external
/// collaborator interface (§1 "OUT OF SCOPE": "we specify only the wire
/// messages this controller expects"); this polls with a `STAT` request and
/// treats any non-`211` reply as a disconnect, which is the one concrete
/// behavior the spec pins down for this loop.
async fn poll_loop(
    client: &mut ReplyClient,
    store: &MsaStore,
    row: usize,
    entry: &ConfigEntry,
    shutdown: &tokio::sync::Notify,
) -> PollOutcome {
    loop {
        if let Err(e) = client.command("STAT").await {
            return PollOutcome::Disconnected(e);
        }
        match client.read_reply().await {
            Ok(code) if ReplyClient::check_reply(code, &[211]) => {
                store.update_row(row, |r| {
                    r.last_data_time = now_unix();
                });
                debug!(alias = %entry.alias, "monitor poll tick ok");
            }
            Ok(code) => {
                return PollOutcome::Disconnected(AfdMonError::Internal(format!("unexpected reply code {code}")));
            }
            Err(e) => return PollOutcome::Disconnected(e),
        }

        tokio::select! {
            _ = shutdown.notified() => return PollOutcome::Shutdown,
            _ = tokio::time::sleep(Duration::from_secs(entry.poll_interval_s as u64)) => {}
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_entry::{ConfigEntry, Switching};
    use crate::core::options::AfdOptions;

    fn entry() -> ConfigEntry {
        ConfigEntry {
            alias: "a".into(),
            host: ["h".into(), "h".into()],
            port: [4444, 4444],
            switching: Switching::None,
            poll_interval_s: 5,
            connect_time_s: 5,
            disconnect_time_s: 60,
            rcmd: "rsh".into(),
            options: AfdOptions::default(),
            convert_username: Vec::new(),
        }
    }

    #[test]
    fn backoff_doubles_from_poll_interval() {
        let e = entry();
        assert_eq!(reconnect_backoff(&e, 10, 0), Duration::from_secs(5));
        assert_eq!(reconnect_backoff(&e, 10, 1), Duration::from_secs(10));
        assert_eq!(reconnect_backoff(&e, 10, 2), Duration::from_secs(20));
    }

    #[test]
    fn backoff_caps_at_four_times_tcp_timeout() {
        let e = entry();
        assert_eq!(reconnect_backoff(&e, 10, 10), Duration::from_secs(40));
    }
}
