// src/core/msa/store.rs

//! Component B: the MSA store. Owns the `msa.id` advisory-locked handoff
//! file and the `status.<N>` memory-mapped backing files, and is the only
//! component allowed to perform a rebuild (spec §4.B).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::core::config_entry::ConfigEntry;
use crate::core::errors::AfdMonError;
use crate::core::metrics;

use super::codec::{decode_row, decode_row_versioned, encode_row, row_size_for_version, ROW_SIZE};
use super::convert::convert_row;
use super::group::update_group_summary;
use super::header::{MsaHeader, CURRENT_VERSION, HEADER_LEN, STALE_COUNT};
use super::row::{ConnectStatus, MsaRow};

fn id_file_path(fifodir: &Path) -> PathBuf {
    fifodir.join("msa.id")
}

fn status_file_path(fifodir: &Path, msa_id: i32) -> PathBuf {
    fifodir.join(format!("status.{msa_id}"))
}

fn row_offset(row: usize) -> usize {
    HEADER_LEN + row * ROW_SIZE
}

/// A live attachment to one MSA region, read-only or read-write.
pub struct MsaStore {
    fifodir: PathBuf,
    msa_id: i32,
    row_count: usize,
    mmap: Arc<Mutex<MmapMut>>,
    writable: bool,
}

impl MsaStore {
    /// Maps the region currently named by the ID file, read-only (spec §4.B
    /// `attach_passive`).
    pub fn attach_passive(fifodir: &Path) -> Result<Self, AfdMonError> {
        Self::attach(fifodir, false)
    }

    /// Maps the region currently named by the ID file, read-write (spec §4.B
    /// `attach_active`). Multiple processes may hold this at once; the
    /// discipline that keeps that safe is each writer only touching its own
    /// row (spec §5), not mutual exclusion at the mapping layer.
    pub fn attach_active(fifodir: &Path) -> Result<Self, AfdMonError> {
        Self::attach(fifodir, true)
    }

    fn attach(fifodir: &Path, writable: bool) -> Result<Self, AfdMonError> {
        let msa_id = read_msa_id(fifodir)?;
        let path = status_file_path(fifodir, msa_id);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        let header = MsaHeader::decode(&mmap)?;
        if header.is_stale() {
            return Err(AfdMonError::StaleMsa(format!("status.{msa_id} observed with count=-1; re-resolve via msa.id")));
        }
        if header.version != CURRENT_VERSION {
            return Err(AfdMonError::UnsupportedMsaVersion(header.version));
        }
        let row_count = header.count as usize;
        Ok(Self {
            fifodir: fifodir.to_path_buf(),
            msa_id,
            row_count,
            mmap: Arc::new(Mutex::new(mmap)),
            writable,
        })
    }

    pub fn msa_id(&self) -> i32 {
        self.msa_id
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn read_row(&self, row: usize) -> MsaRow {
        let mmap = self.mmap.lock();
        let off = row_offset(row);
        decode_row(&mmap[off..off + ROW_SIZE])
    }

    pub fn read_all_rows(&self) -> Vec<MsaRow> {
        (0..self.row_count).map(|i| self.read_row(i)).collect()
    }

    fn write_row(&self, row: usize, f: impl FnOnce(&mut MsaRow)) {
        debug_assert!(self.writable, "attempted to write through a passive MSA attachment");
        let mut mmap = self.mmap.lock();
        let off = row_offset(row);
        let mut r = decode_row(&mmap[off..off + ROW_SIZE]);
        f(&mut r);
        encode_row(&r, &mut mmap[off..off + ROW_SIZE]);
    }

    /// Updates `connect_status` on this worker's own row (spec §5:
    /// "the monitor worker owns all counters except `log_bytes_received`").
    pub fn set_connect_status(&self, row: usize, status: ConnectStatus) {
        self.write_row(row, |r| r.connect_status = status);
    }

    /// Adds to `log_bytes_received[CURRENT_SUM]` on this worker's own row
    /// (spec §5: "the log worker owns `log_bytes_received`").
    pub fn add_log_bytes_received(&self, row: usize, bytes: u64) {
        self.write_row(row, |r| r.log_bytes_received.add_current(bytes as f64));
        metrics::LOG_BYTES_RECEIVED_TOTAL.with_label_values(&[&self.read_row(row).alias]).inc_by(bytes as f64);
    }

    /// Applies an arbitrary mutation to one row, for the monitor worker's
    /// poll-loop field updates.
    pub fn update_row(&self, row: usize, f: impl FnOnce(&mut MsaRow)) {
        self.write_row(row, f);
    }

    /// Recomputes every group header's aggregate fields in place (spec §4.B
    /// "Group aggregation"). Called by the supervisor on a schedule, or by
    /// a status dumper before reading.
    pub fn refresh_group_summaries(&self) {
        let mut rows = self.read_all_rows();
        update_group_summary(&mut rows);
        let mut mmap = self.mmap.lock();
        for (i, row) in rows.iter().enumerate() {
            let off = row_offset(i);
            encode_row(row, &mut mmap[off..off + ROW_SIZE]);
        }
    }

    /// Detaches from the mapped region. A no-op beyond dropping the mmap
    /// handle: the backing file is only ever unlinked by a concurrent
    /// `rebuild`, never by a reader going away.
    pub fn detach(self) {
        drop(self);
    }

    /// The key operation (spec §4.B "Rebuild algorithm"): atomically
    /// publishes a new MSA derived from `new_config`, carrying over runtime
    /// state from the previous region by alias when one exists.
    pub fn rebuild(fifodir: &Path, new_config: &[ConfigEntry]) -> Result<Self, AfdMonError> {
        std::fs::create_dir_all(fifodir)?;
        let id_path = id_file_path(fifodir);
        let mut id_file = OpenOptions::new().read(true).write(true).create(true).open(&id_path)?;
        id_file
            .lock_exclusive()
            .map_err(|e| AfdMonError::LockFailed(format!("msa.id: {e}")))?;

        let result = Self::rebuild_locked(fifodir, new_config, &mut id_file);
        let _ = fs2::FileExt::unlock(&id_file);
        result
    }

    fn rebuild_locked(fifodir: &Path, new_config: &[ConfigEntry], id_file: &mut File) -> Result<Self, AfdMonError> {
        let old_msa_id = read_locked_msa_id(id_file)?;

        let old_rows: Vec<MsaRow> = if let Some(old_id) = old_msa_id {
            let old_path = status_file_path(fifodir, old_id);
            match read_and_stale_old_region(&old_path) {
                Ok((header, mut rows)) => {
                    if header.version != CURRENT_VERSION {
                        for row in &mut rows {
                            convert_row(row, header.version, CURRENT_VERSION);
                        }
                    }
                    rows
                }
                Err(e) => {
                    warn!("previous MSA region unreadable during rebuild, starting fresh: {e}");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let new_msa_id = old_msa_id.map(|id| id + 1).unwrap_or(0);
        let new_path = status_file_path(fifodir, new_msa_id);

        let mut gotcha = vec![false; old_rows.len()];
        let mut new_rows = Vec::with_capacity(new_config.len());
        for entry in new_config {
            let carried = old_rows.iter().enumerate().find(|(i, r)| !gotcha[*i] && r.alias == entry.alias);
            let row = if let Some((idx, old_row)) = carried {
                gotcha[idx] = true;
                let mut row = old_row.clone();
                row.refresh_config_fields(entry);
                row.is_group_header = entry.is_group_header();
                row
            } else {
                MsaRow::new_from_entry(entry)
            };
            new_rows.push(row);
        }

        let total_len = HEADER_LEN + new_rows.len() * ROW_SIZE;
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&new_path)?;
        file.set_len(total_len as u64)?;

        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        let header = MsaHeader::new(new_rows.len() as i32, CURRENT_VERSION, page_size());
        mmap[..HEADER_LEN].copy_from_slice(&header.encode());
        for (i, row) in new_rows.iter().enumerate() {
            let off = row_offset(i);
            encode_row(row, &mut mmap[off..off + ROW_SIZE]);
        }
        mmap.flush()?;

        if let Some(old_id) = old_msa_id {
            let old_path = status_file_path(fifodir, old_id);
            let _ = std::fs::remove_file(&old_path);
        }

        write_locked_msa_id(id_file, new_msa_id)?;
        metrics::MSA_REBUILDS_TOTAL.inc();
        metrics::MSA_ID.set(new_msa_id as f64);
        metrics::MSA_ROW_COUNT.set(new_rows.len() as f64);
        info!(msa_id = new_msa_id, rows = new_rows.len(), "MSA rebuild complete");

        Ok(Self {
            fifodir: fifodir.to_path_buf(),
            msa_id: new_msa_id,
            row_count: new_rows.len(),
            mmap: Arc::new(Mutex::new(mmap)),
            writable: true,
        })
    }
}

fn page_size() -> i32 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf with _SC_PAGESIZE never fails on a supported platform.
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) as i32 }
    }
    #[cfg(not(unix))]
    {
        4096
    }
}

fn read_msa_id(fifodir: &Path) -> Result<i32, AfdMonError> {
    let mut file = OpenOptions::new().read(true).open(id_file_path(fifodir))?;
    file.lock_shared().map_err(|e| AfdMonError::LockFailed(format!("msa.id: {e}")))?;
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)?;
    let _ = fs2::FileExt::unlock(&file);
    Ok(i32::from_le_bytes(buf))
}

fn read_locked_msa_id(file: &mut File) -> Result<Option<i32>, AfdMonError> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; 4];
    match file.read_exact(&mut buf) {
        Ok(()) => Ok(Some(i32::from_le_bytes(buf))),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_locked_msa_id(file: &mut File, msa_id: i32) -> Result<(), AfdMonError> {
    file.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    file.write_all(&msa_id.to_le_bytes())?;
    file.flush()?;
    Ok(())
}

/// Reads an old region, stamping its header `count = -1` in place before
/// returning its decoded rows (spec §4.B step 3: mark stale before anything
/// else happens to the new region).
///
/// Rows are decoded using the *old* region's own schema version, not the
/// current one: a v0/v1/v2 region has narrower rows than `ROW_SIZE` (spec
/// §4.B "Conversion rules"), so decoding it with the current-version layout
/// would read past the end of the mapped region. `convert_row` (called by
/// `rebuild_locked` after this returns) does the semantic upgrade once every
/// row has been decoded with the layout it was actually written with.
fn read_and_stale_old_region(path: &Path) -> Result<(MsaHeader, Vec<MsaRow>), AfdMonError> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut mmap = unsafe { MmapMut::map_mut(&file)? };
    let header = MsaHeader::decode(&mmap)?;
    if header.is_stale() {
        return Err(AfdMonError::StaleMsa(format!("{} already stale", path.display())));
    }

    let row_count = header.count as usize;
    let old_row_size = row_size_for_version(header.version)?;
    let required_len = HEADER_LEN + row_count * old_row_size;
    if mmap.len() < required_len {
        return Err(AfdMonError::StaleMsa(format!(
            "{} is truncated: header claims {row_count} v{} rows ({required_len} bytes) but region is only {} bytes",
            path.display(),
            header.version,
            mmap.len(),
        )));
    }

    MsaHeader::stamp_count(&mut mmap[..HEADER_LEN], STALE_COUNT);
    mmap.flush()?;

    let mut rows = Vec::with_capacity(row_count);
    for i in 0..row_count {
        let off = HEADER_LEN + i * old_row_size;
        rows.push(decode_row_versioned(&mmap[off..off + old_row_size], header.version)?);
    }
    Ok((header, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_entry::Switching;
    use crate::core::options::AfdOptions;
    use tempfile::tempdir;

    fn entry(alias: &str) -> ConfigEntry {
        ConfigEntry {
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
        }
    }

    #[test]
    fn initial_rebuild_creates_disconnected_rows() {
        let dir = tempdir().unwrap();
        let store = MsaStore::rebuild(dir.path(), &[entry("a"), entry("b")]).unwrap();
        assert_eq!(store.msa_id(), 0);
        assert_eq!(store.row_count(), 2);
        let row0 = store.read_row(0);
        assert_eq!(row0.alias, "a");
        assert_eq!(row0.connect_status, ConnectStatus::Disconnected);
        assert_eq!(row0.afd_id, super::super::row::checksum("a"));
    }

    #[test]
    fn second_rebuild_carries_over_runtime_counters() {
        let dir = tempdir().unwrap();
        let store = MsaStore::rebuild(dir.path(), &[entry("a")]).unwrap();
        store.update_row(0, |r| r.fc = 99);
        drop(store);

        let store2 = MsaStore::rebuild(dir.path(), &[entry("a"), entry("b")]).unwrap();
        assert_eq!(store2.msa_id(), 1);
        let row_a = store2.read_row(0);
        assert_eq!(row_a.fc, 99);
        let row_b = store2.read_row(1);
        assert_eq!(row_b.fc, 0);
    }

    #[test]
    fn empty_config_yields_header_only_region() {
        let dir = tempdir().unwrap();
        let store = MsaStore::rebuild(dir.path(), &[]).unwrap();
        assert_eq!(store.row_count(), 0);
    }

    #[test]
    fn attach_passive_rejects_stale_region() {
        let dir = tempdir().unwrap();
        let store = MsaStore::rebuild(dir.path(), &[entry("a")]).unwrap();
        let msa_id = store.msa_id();
        drop(store);
        // Simulate a half-swapped region by staling it without publishing a
        // successor, then confirm attach refuses it.
        let path = status_file_path(dir.path(), msa_id);
        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let mut mmap = unsafe { MmapMut::map_mut(&file).unwrap() };
        MsaHeader::stamp_count(&mut mmap[..HEADER_LEN], STALE_COUNT);
        mmap.flush().unwrap();

        assert!(MsaStore::attach_passive(dir.path()).is_err());
    }

    /// Spec scenario S2: pre-seed `status.7` with a v0-layout region and
    /// confirm a rebuild produces `status.8` with the current (v3) layout,
    /// `afd_id` correctly recomputed and the carried-over counters intact.
    #[test]
    fn rebuild_upgrades_a_v0_region_in_place() {
        use super::super::codec::test_encode_row_v0;

        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();

        let mut id_file = OpenOptions::new().read(true).write(true).create(true).open(id_file_path(dir.path())).unwrap();
        id_file.write_all(&7i32.to_le_bytes()).unwrap();
        drop(id_file);

        let mut row = MsaRow::new_from_entry(&entry("a"));
        row.fc = 4242;
        row.fs = 7;
        row.tr = 8;
        row.top_tr[0] = 11;
        row.last_data_time = 55;
        let row_bytes = test_encode_row_v0(&row);

        let header = MsaHeader::new(1, 0, page_size());
        let mut region = header.encode().to_vec();
        region.extend_from_slice(&row_bytes);
        std::fs::write(status_file_path(dir.path(), 7), &region).unwrap();

        let store = MsaStore::rebuild(dir.path(), &[entry("a"), entry("b")]).unwrap();
        assert_eq!(store.msa_id(), 8);
        assert_eq!(store.row_count(), 2);

        let row_a = store.read_row(0);
        assert_eq!(row_a.alias, "a");
        assert_eq!(row_a.afd_id, super::super::row::checksum("a"));
        assert_eq!(row_a.fc, 4242);
        assert_eq!(row_a.fs, 7);
        assert_eq!(row_a.tr, 8);
        assert_eq!(row_a.top_tr[0], 11);
        assert_eq!(row_a.danger_no_of_jobs, 0);

        let row_b = store.read_row(1);
        assert_eq!(row_b.alias, "b");
        assert_eq!(row_b.connect_status, ConnectStatus::Disconnected);
    }
}
