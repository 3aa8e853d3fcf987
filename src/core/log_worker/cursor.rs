// src/core/log_worker/cursor.rs

//! Per-kind "last seen" cursor persistence (spec §4.G "Per-kind state").
//!
//! A cursor is the textual `"<inode> <logno>"` pair the remote uses to tell
//! us which of its rotated log files it's currently writing to. We persist
//! it next to the rolling log files themselves so a restarted worker can
//! resume a `LOG` session exactly where it left off instead of re-reading
//! from the remote's oldest retained file.

use std::path::Path;

use crate::core::errors::AfdMonError;

use super::frame::LogKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogCursor {
    inode: u64,
    logno: u32,
    loaded: bool,
}

impl LogCursor {
    /// Loads the persisted cursor for `kind` from `dir`, or an empty cursor
    /// if no cursor file exists yet.
    pub fn load(dir: &Path, kind: LogKind) -> Result<Self, AfdMonError> {
        let path = cursor_path(dir, kind);
        match std::fs::read_to_string(&path) {
            Ok(content) => parse_cursor_file(&content).ok_or_else(|| {
                AfdMonError::StaleMsa(format!("malformed cursor file {}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.loaded
    }

    pub fn inode_logno(&self) -> (u64, u32) {
        (self.inode, self.logno)
    }

    pub fn set(&mut self, inode: u64, logno: u32) {
        self.inode = inode;
        self.logno = logno;
        self.loaded = true;
    }

    /// Persists this cursor to `dir` for `kind`, overwriting any prior file.
    pub fn persist(&self, dir: &Path, kind: LogKind) -> Result<(), AfdMonError> {
        let path = cursor_path(dir, kind);
        std::fs::write(&path, format!("{} {}\n", self.inode, self.logno))?;
        Ok(())
    }
}

/// Spec §6.1: `rlog_dir/<alias>/<logname>.inode`.
fn cursor_path(dir: &Path, kind: LogKind) -> std::path::PathBuf {
    dir.join(format!("{}.inode", kind.file_prefix()))
}

fn parse_cursor_file(content: &str) -> Option<LogCursor> {
    let mut fields = content.trim().split(' ');
    let inode: u64 = fields.next()?.parse().ok()?;
    let logno: u32 = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some(LogCursor { inode, logno, loaded: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let mut cursor = LogCursor::default();
        assert!(cursor.is_empty());
        cursor.set(42, 3);
        cursor.persist(dir.path(), LogKind::Transfer).unwrap();

        let reloaded = LogCursor::load(dir.path(), LogKind::Transfer).unwrap();
        assert!(!reloaded.is_empty());
        assert_eq!(reloaded.inode_logno(), (42, 3));
    }

    #[test]
    fn missing_file_is_empty_cursor() {
        let dir = tempdir().unwrap();
        let cursor = LogCursor::load(dir.path(), LogKind::System).unwrap();
        assert!(cursor.is_empty());
    }

    #[test]
    fn malformed_file_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("system.inode"), "garbage\n").unwrap();
        assert!(LogCursor::load(dir.path(), LogKind::System).is_err());
    }
}
