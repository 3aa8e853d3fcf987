// src/core/log_worker/rolling_log.rs

//! Local rolling log file management for one (remote, kind) pair (spec
//! §4.G "Log rotation bound" and the reshuffle/stale rules under "O-control
//! handling").
//!
//! Files are named `<prefix>.<n>`, with `<prefix>.0` always the active file
//! currently being appended to. Larger `n` means older, matching the AFD
//! convention the spec's reshuffle direction (`k ↦ k + shift`) assumes.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use crate::core::errors::AfdMonError;

use super::frame::LogKind;

pub struct RollingLog {
    dir: PathBuf,
    kind: LogKind,
    max_files: u32,
    active: Option<File>,
}

impl RollingLog {
    pub fn new(dir: PathBuf, kind: LogKind, max_files: u32) -> Self {
        Self { dir, kind, max_files, active: None }
    }

    fn path(&self, n: u32) -> PathBuf {
        self.dir.join(format!("{}.{}", self.kind.file_prefix(), n))
    }

    /// Appends `payload` to the active file, opening it append-only on
    /// first use (spec §4.G "Packet handling").
    pub fn append(&mut self, payload: &[u8]) -> Result<(), AfdMonError> {
        if self.active.is_none() {
            self.ensure_open()?;
        }
        if let Some(f) = self.active.as_mut() {
            f.write_all(payload)?;
        }
        Ok(())
    }

    /// Opens (creating if absent) the active file handle, without truncating
    /// existing content.
    pub fn ensure_open(&mut self) -> Result<(), AfdMonError> {
        if self.active.is_some() {
            return Ok(());
        }
        let f = OpenOptions::new().create(true).append(true).open(self.path(0))?;
        self.active = Some(f);
        Ok(())
    }

    /// Closes the active file, unlinks it, and opens a fresh empty one
    /// (spec §4.G "LOG_STALE").
    pub fn reopen_fresh(&mut self) -> Result<(), AfdMonError> {
        self.active = None;
        let _ = std::fs::remove_file(self.path(0));
        self.ensure_open()
    }

    /// Renames files in reverse so `k ↦ k + shift` for all `k >= shift_offset`,
    /// respecting `max_files` by unlinking anything that would land at or
    /// beyond the cap, then reopens a fresh active file (spec §4.G
    /// "LOG_RESHUFFLE").
    pub fn reshuffle(&mut self, shift_offset: u32, shift: u32) -> Result<(), AfdMonError> {
        self.active = None;
        if shift == 0 {
            return self.ensure_open();
        }

        // Walk from the highest existing index downward so a rename target
        // is never clobbered before it's read.
        let mut existing: Vec<u32> = (shift_offset..self.max_files + shift)
            .filter(|&n| self.path(n).exists())
            .collect();
        existing.sort_unstable_by(|a, b| b.cmp(a));

        for n in existing {
            let new_n = n + shift;
            if new_n >= self.max_files {
                let _ = std::fs::remove_file(self.path(n));
                continue;
            }
            let _ = std::fs::rename(self.path(n), self.path(new_n));
        }

        self.ensure_open()
    }

    /// Flushes and drops the active handle; called during session teardown.
    pub fn close(&mut self) {
        if let Some(mut f) = self.active.take() {
            let _ = f.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_creates_and_writes_active_file() {
        let dir = tempdir().unwrap();
        let mut log = RollingLog::new(dir.path().to_path_buf(), LogKind::Transfer, 7);
        log.append(b"hello ").unwrap();
        log.append(b"world").unwrap();
        log.close();
        let content = std::fs::read_to_string(dir.path().join("transfer.0")).unwrap();
        assert_eq!(content, "hello world");
    }

    #[test]
    fn reshuffle_renames_existing_files_upward() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("transfer.0"), b"active").unwrap();
        std::fs::write(dir.path().join("transfer.1"), b"older").unwrap();
        let mut log = RollingLog::new(dir.path().to_path_buf(), LogKind::Transfer, 7);
        log.reshuffle(0, 2).unwrap();

        assert!(dir.path().join("transfer.2").exists());
        assert!(dir.path().join("transfer.3").exists());
        assert_eq!(std::fs::read(dir.path().join("transfer.2")).unwrap(), b"active");
        // A fresh active file should now exist at index 0.
        assert!(dir.path().join("transfer.0").exists());
        let fresh = std::fs::read(dir.path().join("transfer.0")).unwrap();
        assert!(fresh.is_empty());
    }

    #[test]
    fn reshuffle_beyond_cap_unlinks_oldest() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("transfer.2"), b"oldest").unwrap();
        let mut log = RollingLog::new(dir.path().to_path_buf(), LogKind::Transfer, 3);
        log.reshuffle(0, 5).unwrap();
        assert!(!dir.path().join("transfer.7").exists());
    }

    #[test]
    fn reopen_fresh_truncates_active_file() {
        let dir = tempdir().unwrap();
        let mut log = RollingLog::new(dir.path().to_path_buf(), LogKind::System, 7);
        log.append(b"stale content").unwrap();
        log.reopen_fresh().unwrap();
        let content = std::fs::read_to_string(dir.path().join("system.0")).unwrap();
        assert!(content.is_empty());
    }
}
