// src/core/mon_log.rs

//! The `mon_log` fatal-line sink (spec §7 "Propagation"; `SPEC_FULL.md` §2.1).
//!
//! Every fatal condition already reported through `tracing` is additionally
//! written to the `mon_log` FIFO as a single `<LEVEL> <timestamp> <file:line>
//! : <message>` line, so an operator tailing the FIFO sees the same signal as
//! one watching `journalctl`/stdout.

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Formats and writes one fatal line to `fifodir/mon_log`.
///
/// Opened `O_NONBLOCK` for write: a FIFO with no reader yet attached fails
/// immediately with `ENXIO` instead of blocking the caller, since a missing
/// tail-reader is not itself a fatal condition. Failures are logged at
/// `debug` and swallowed.
pub fn write_fatal_line(fifodir: &Path, level: &str, location: &str, message: &str) {
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    let line = format!("{level} {timestamp} {location} : {message}\n");

    let path = fifodir.join("mon_log");
    match std::fs::OpenOptions::new().write(true).custom_flags(libc::O_NONBLOCK).open(&path) {
        Ok(mut f) => {
            if let Err(e) = f.write_all(line.as_bytes()) {
                tracing::debug!(error = %e, "failed writing fatal line to mon_log FIFO");
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "mon_log FIFO has no reader, dropping fatal line");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::stat::Mode;
    use nix::unistd::mkfifo;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn writes_formatted_line_to_reader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mon_log");
        mkfifo(&path, Mode::from_bits_truncate(0o600)).unwrap();

        let reader_path = path.clone();
        let reader = std::thread::spawn(move || {
            let mut f = std::fs::File::open(&reader_path).unwrap();
            let mut buf = String::new();
            f.read_to_string(&mut buf).unwrap();
            buf
        });

        // Give the reader a moment to block on open before we write, so the
        // writer's blocking open (no O_NONBLOCK on this side) pairs up.
        std::thread::sleep(std::time::Duration::from_millis(20));
        write_fatal_line(dir.path(), "ERROR", "mon_log.rs:1", "test message");
        drop(std::fs::OpenOptions::new().write(true).open(&path));

        let got = reader.join().unwrap();
        assert!(got.contains("ERROR"));
        assert!(got.contains("mon_log.rs:1"));
        assert!(got.contains("test message"));
    }

    #[test]
    fn missing_reader_does_not_panic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mon_log");
        mkfifo(&path, Mode::from_bits_truncate(0o600)).unwrap();
        write_fatal_line(dir.path(), "ERROR", "mon_log.rs:1", "no reader listening");
    }
}
