// src/core/msa/codec.rs

//! Fixed-layout encode/decode of a single `MsaRow` to/from the bytes backing
//! an mmap'd region. Every field has a fixed offset and width so the layout
//! is stable across processes that attach independently (spec §3.2: the MSA
//! is a shared-memory table, not a serde document).

use crate::core::config_entry::MAX_ALIAS_LENGTH;
use crate::core::errors::AfdMonError;
use crate::core::options::AfdOptions;

use super::row::{
    ComponentStatus, ConnectStatus, MsaRow, SpecialFlags, SumBuckets,
    LOG_HISTORY_KINDS, LOG_HISTORY_LEN, SUM_BUCKETS, TOP_N,
};

const MAX_HOST_LEN: usize = 39;

pub const ROW_SIZE: usize = MAX_ALIAS_LENGTH // alias
    + 4 // afd_id
    + MAX_HOST_LEN * 2 // host[2]
    + 2 * 2 // port[2]
    + 1 // is_group_header
    + 1 // connect_status
    + 1 // afd_toggle
    + 1 // special_flag
    + 3 // amg, fd, archive_watch
    + 4 * 7 // jobs_in_queue, danger_no_of_jobs, no_of_transfers, host_error_counter, no_of_hosts, no_of_dirs, no_of_jobs
    + 8 * 5 // fc, fs, tr, fr, ec
    + 4 * TOP_N // top_no_of_transfers
    + 8 * TOP_N // top_tr
    + 8 * TOP_N // top_fr
    + 8 * TOP_N // top_timestamps
    + 8 * SUM_BUCKETS * 7 // 7 sum-bucket metrics x 6 windows x f64
    + LOG_HISTORY_KINDS * LOG_HISTORY_LEN // log_history
    + 4 // options
    + 4 // log_capabilities
    + 8; // last_data_time

/// v2 lacks `afd_id`, added at v2→v3 (spec §4.B "Conversion rules").
pub const ROW_SIZE_V2: usize = ROW_SIZE - 4;
/// v1 additionally lacks `danger_no_of_jobs`, added at v1→v2.
pub const ROW_SIZE_V1: usize = ROW_SIZE_V2 - 4;
/// v0 additionally lacks `special_flag` (1), `no_of_dirs` (4),
/// `log_capabilities` (4), all seven sum buckets (7×6×8 = 336), and stores
/// `fs`/`tr`/`top_tr[]` as 32-bit rather than 64-bit (4 + 4 + 4×7 = 36) —
/// all introduced or widened at v0→v1.
pub const ROW_SIZE_V0: usize = ROW_SIZE_V1 - (1 + 4 + 4 + 336 + 36);

/// The on-disk row width for a given schema version (spec §3.1 "MsaRow",
/// §4.B). Rejects anything outside the supported chain the same way
/// `MsaHeader::decode` does, so a corrupt version byte is caught before any
/// slicing is attempted (spec §7 "Corruption of on-disk state").
pub fn row_size_for_version(version: u8) -> Result<usize, AfdMonError> {
    match version {
        0 => Ok(ROW_SIZE_V0),
        1 => Ok(ROW_SIZE_V1),
        2 => Ok(ROW_SIZE_V2),
        3 => Ok(ROW_SIZE),
        v => Err(AfdMonError::UnsupportedMsaVersion(v)),
    }
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put_bytes(&mut self, len: usize, src: &[u8]) {
        let n = src.len().min(len);
        self.buf[self.pos..self.pos + n].copy_from_slice(&src[..n]);
        for b in &mut self.buf[self.pos + n..self.pos + len] {
            *b = 0;
        }
        self.pos += len;
    }

    fn put_str(&mut self, len: usize, s: &str) {
        self.put_bytes(len, s.as_bytes());
    }

    fn put_u8(&mut self, v: u8) {
        self.buf[self.pos] = v;
        self.pos += 1;
    }

    fn put_u16(&mut self, v: u16) {
        self.buf[self.pos..self.pos + 2].copy_from_slice(&v.to_le_bytes());
        self.pos += 2;
    }

    fn put_u32(&mut self, v: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
    }

    fn put_u64(&mut self, v: u64) {
        self.buf[self.pos..self.pos + 8].copy_from_slice(&v.to_le_bytes());
        self.pos += 8;
    }

    fn put_i64(&mut self, v: i64) {
        self.buf[self.pos..self.pos + 8].copy_from_slice(&v.to_le_bytes());
        self.pos += 8;
    }

    fn put_f64(&mut self, v: f64) {
        self.buf[self.pos..self.pos + 8].copy_from_slice(&v.to_le_bytes());
        self.pos += 8;
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn get_str(&mut self, len: usize) -> String {
        let raw = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }

    fn get_u8(&mut self) -> u8 {
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }

    fn get_u16(&mut self) -> u16 {
        let v = u16::from_le_bytes(self.buf[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        v
    }

    fn get_u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn get_u64(&mut self) -> u64 {
        let v = u64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }

    fn get_i64(&mut self) -> i64 {
        let v = i64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }

    fn get_f64(&mut self) -> f64 {
        let v = f64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }
}

fn connect_status_from_u8(v: u8) -> ConnectStatus {
    match v {
        0 => ConnectStatus::Disabled,
        1 => ConnectStatus::Disconnected,
        2 => ConnectStatus::Defunct,
        3 => ConnectStatus::Connecting,
        _ => ConnectStatus::Connected,
    }
}

fn component_status_from_u8(v: u8) -> ComponentStatus {
    match v {
        0 => ComponentStatus::Stopped,
        1 => ComponentStatus::Starting,
        2 => ComponentStatus::Running,
        3 => ComponentStatus::ShuttingDown,
        _ => ComponentStatus::Unknown,
    }
}

pub fn encode_row(row: &MsaRow, out: &mut [u8]) {
    debug_assert_eq!(out.len(), ROW_SIZE);
    let mut w = Writer::new(out);
    w.put_str(MAX_ALIAS_LENGTH, &row.alias);
    w.put_u32(row.afd_id);
    w.put_str(MAX_HOST_LEN, &row.host[0]);
    w.put_str(MAX_HOST_LEN, &row.host[1]);
    w.put_u16(row.port[0]);
    w.put_u16(row.port[1]);
    w.put_u8(row.is_group_header as u8);
    w.put_u8(row.connect_status as u8);
    w.put_u8(row.afd_toggle);
    w.put_u8(row.special_flag.bits());
    w.put_u8(row.amg as u8);
    w.put_u8(row.fd as u8);
    w.put_u8(row.archive_watch as u8);
    w.put_u32(row.jobs_in_queue);
    w.put_u32(row.danger_no_of_jobs);
    w.put_u32(row.no_of_transfers);
    w.put_u32(row.host_error_counter);
    w.put_u32(row.no_of_hosts);
    w.put_u32(row.no_of_dirs);
    w.put_u32(row.no_of_jobs);
    w.put_u64(row.fc);
    w.put_u64(row.fs);
    w.put_u64(row.tr);
    w.put_u64(row.fr);
    w.put_u64(row.ec);
    for v in row.top_no_of_transfers {
        w.put_u32(v);
    }
    for v in row.top_tr {
        w.put_u64(v);
    }
    for v in row.top_fr {
        w.put_u64(v);
    }
    for v in row.top_timestamps {
        w.put_i64(v);
    }
    for bucket in [
        &row.bytes_sent,
        &row.bytes_received,
        &row.log_bytes_received,
        &row.files_sent,
        &row.files_received,
        &row.connections,
        &row.total_errors,
    ] {
        for v in bucket.windows {
            w.put_f64(v);
        }
    }
    for kind in &row.log_history {
        for &v in kind {
            w.put_u8(v);
        }
    }
    w.put_u32(row.options.bits());
    w.put_u32(row.log_capabilities.bits());
    w.put_i64(row.last_data_time);
}

pub fn decode_row(buf: &[u8]) -> MsaRow {
    debug_assert_eq!(buf.len(), ROW_SIZE);
    let mut r = Reader::new(buf);
    let alias = r.get_str(MAX_ALIAS_LENGTH);
    let afd_id = r.get_u32();
    let host0 = r.get_str(MAX_HOST_LEN);
    let host1 = r.get_str(MAX_HOST_LEN);
    let port0 = r.get_u16();
    let port1 = r.get_u16();
    let is_group_header = r.get_u8() != 0;
    let connect_status = connect_status_from_u8(r.get_u8());
    let afd_toggle = r.get_u8();
    let special_flag = SpecialFlags::from_bits_truncate(r.get_u8());
    let amg = component_status_from_u8(r.get_u8());
    let fd = component_status_from_u8(r.get_u8());
    let archive_watch = component_status_from_u8(r.get_u8());
    let jobs_in_queue = r.get_u32();
    let danger_no_of_jobs = r.get_u32();
    let no_of_transfers = r.get_u32();
    let host_error_counter = r.get_u32();
    let no_of_hosts = r.get_u32();
    let no_of_dirs = r.get_u32();
    let no_of_jobs = r.get_u32();
    let fc = r.get_u64();
    let fs = r.get_u64();
    let tr = r.get_u64();
    let fr = r.get_u64();
    let ec = r.get_u64();
    let mut top_no_of_transfers = [0u32; TOP_N];
    for v in &mut top_no_of_transfers {
        *v = r.get_u32();
    }
    let mut top_tr = [0u64; TOP_N];
    for v in &mut top_tr {
        *v = r.get_u64();
    }
    let mut top_fr = [0u64; TOP_N];
    for v in &mut top_fr {
        *v = r.get_u64();
    }
    let mut top_timestamps = [0i64; TOP_N];
    for v in &mut top_timestamps {
        *v = r.get_i64();
    }
    let mut buckets = [SumBuckets::default(); 7];
    for bucket in &mut buckets {
        for v in &mut bucket.windows {
            *v = r.get_f64();
        }
    }
    let [bytes_sent, bytes_received, log_bytes_received, files_sent, files_received, connections, total_errors] = buckets;

    let mut log_history = [[0u8; LOG_HISTORY_LEN]; LOG_HISTORY_KINDS];
    for kind in &mut log_history {
        for v in kind.iter_mut() {
            *v = r.get_u8();
        }
    }
    let options = AfdOptions::from_bits_truncate(r.get_u32());
    let log_capabilities = AfdOptions::from_bits_truncate(r.get_u32());
    let last_data_time = r.get_i64();

    MsaRow {
        alias,
        afd_id,
        host: [host0, host1],
        port: [port0, port1],
        is_group_header,
        connect_status,
        afd_toggle,
        special_flag,
        amg,
        fd,
        archive_watch,
        jobs_in_queue,
        danger_no_of_jobs,
        no_of_transfers,
        host_error_counter,
        no_of_hosts,
        no_of_dirs,
        no_of_jobs,
        fc,
        fs,
        tr,
        fr,
        ec,
        top_no_of_transfers,
        top_tr,
        top_fr,
        top_timestamps,
        bytes_sent,
        bytes_received,
        log_bytes_received,
        files_sent,
        files_received,
        connections,
        total_errors,
        log_history,
        options,
        log_capabilities,
        last_data_time,
    }
}

/// Decodes one row using the layout for `version`, filling any field the
/// older schema doesn't carry with the default a fresh row would have
/// (spec §4.B "Conversion rules"). The caller is still expected to run
/// `convert::convert_row` afterward for the semantic upgrades that aren't
/// just "field didn't exist yet" — recomputing `afd_id` chief among them.
pub fn decode_row_versioned(buf: &[u8], version: u8) -> Result<MsaRow, AfdMonError> {
    match version {
        0 => Ok(decode_row_v0(buf)),
        1 => Ok(decode_row_v1(buf)),
        2 => Ok(decode_row_v2(buf)),
        3 => Ok(decode_row(buf)),
        v => Err(AfdMonError::UnsupportedMsaVersion(v)),
    }
}

/// v2 layout: identical to v3 but without `afd_id`, and with the seven sum
/// buckets stored as integer `u64` windows rather than `f64` (the v2→v3
/// widening converts the numeric value, not just the bit pattern).
fn decode_row_v2(buf: &[u8]) -> MsaRow {
    debug_assert_eq!(buf.len(), ROW_SIZE_V2);
    let mut r = Reader::new(buf);
    let alias = r.get_str(MAX_ALIAS_LENGTH);
    let host0 = r.get_str(MAX_HOST_LEN);
    let host1 = r.get_str(MAX_HOST_LEN);
    let port0 = r.get_u16();
    let port1 = r.get_u16();
    let is_group_header = r.get_u8() != 0;
    let connect_status = connect_status_from_u8(r.get_u8());
    let afd_toggle = r.get_u8();
    let special_flag = SpecialFlags::from_bits_truncate(r.get_u8());
    let amg = component_status_from_u8(r.get_u8());
    let fd = component_status_from_u8(r.get_u8());
    let archive_watch = component_status_from_u8(r.get_u8());
    let jobs_in_queue = r.get_u32();
    let danger_no_of_jobs = r.get_u32();
    let no_of_transfers = r.get_u32();
    let host_error_counter = r.get_u32();
    let no_of_hosts = r.get_u32();
    let no_of_dirs = r.get_u32();
    let no_of_jobs = r.get_u32();
    let fc = r.get_u64();
    let fs = r.get_u64();
    let tr = r.get_u64();
    let fr = r.get_u64();
    let ec = r.get_u64();
    let mut top_no_of_transfers = [0u32; TOP_N];
    for v in &mut top_no_of_transfers {
        *v = r.get_u32();
    }
    let mut top_tr = [0u64; TOP_N];
    for v in &mut top_tr {
        *v = r.get_u64();
    }
    let mut top_fr = [0u64; TOP_N];
    for v in &mut top_fr {
        *v = r.get_u64();
    }
    let mut top_timestamps = [0i64; TOP_N];
    for v in &mut top_timestamps {
        *v = r.get_i64();
    }
    let mut buckets = [SumBuckets::default(); 7];
    for bucket in &mut buckets {
        for v in &mut bucket.windows {
            *v = r.get_u64() as f64;
        }
    }
    let [bytes_sent, bytes_received, log_bytes_received, files_sent, files_received, connections, total_errors] = buckets;

    let mut log_history = [[0u8; LOG_HISTORY_LEN]; LOG_HISTORY_KINDS];
    for kind in &mut log_history {
        for v in kind.iter_mut() {
            *v = r.get_u8();
        }
    }
    let options = AfdOptions::from_bits_truncate(r.get_u32());
    let log_capabilities = AfdOptions::from_bits_truncate(r.get_u32());
    let last_data_time = r.get_i64();

    MsaRow {
        alias,
        afd_id: 0,
        host: [host0, host1],
        port: [port0, port1],
        is_group_header,
        connect_status,
        afd_toggle,
        special_flag,
        amg,
        fd,
        archive_watch,
        jobs_in_queue,
        danger_no_of_jobs,
        no_of_transfers,
        host_error_counter,
        no_of_hosts,
        no_of_dirs,
        no_of_jobs,
        fc,
        fs,
        tr,
        fr,
        ec,
        top_no_of_transfers,
        top_tr,
        top_fr,
        top_timestamps,
        bytes_sent,
        bytes_received,
        log_bytes_received,
        files_sent,
        files_received,
        connections,
        total_errors,
        log_history,
        options,
        log_capabilities,
        last_data_time,
    }
}

/// v1 layout: as v2, but without `danger_no_of_jobs` (added at v1→v2).
fn decode_row_v1(buf: &[u8]) -> MsaRow {
    debug_assert_eq!(buf.len(), ROW_SIZE_V1);
    let mut r = Reader::new(buf);
    let alias = r.get_str(MAX_ALIAS_LENGTH);
    let host0 = r.get_str(MAX_HOST_LEN);
    let host1 = r.get_str(MAX_HOST_LEN);
    let port0 = r.get_u16();
    let port1 = r.get_u16();
    let is_group_header = r.get_u8() != 0;
    let connect_status = connect_status_from_u8(r.get_u8());
    let afd_toggle = r.get_u8();
    let special_flag = SpecialFlags::from_bits_truncate(r.get_u8());
    let amg = component_status_from_u8(r.get_u8());
    let fd = component_status_from_u8(r.get_u8());
    let archive_watch = component_status_from_u8(r.get_u8());
    let jobs_in_queue = r.get_u32();
    let no_of_transfers = r.get_u32();
    let host_error_counter = r.get_u32();
    let no_of_hosts = r.get_u32();
    let no_of_dirs = r.get_u32();
    let no_of_jobs = r.get_u32();
    let fc = r.get_u64();
    let fs = r.get_u64();
    let tr = r.get_u64();
    let fr = r.get_u64();
    let ec = r.get_u64();
    let mut top_no_of_transfers = [0u32; TOP_N];
    for v in &mut top_no_of_transfers {
        *v = r.get_u32();
    }
    let mut top_tr = [0u64; TOP_N];
    for v in &mut top_tr {
        *v = r.get_u64();
    }
    let mut top_fr = [0u64; TOP_N];
    for v in &mut top_fr {
        *v = r.get_u64();
    }
    let mut top_timestamps = [0i64; TOP_N];
    for v in &mut top_timestamps {
        *v = r.get_i64();
    }
    let mut buckets = [SumBuckets::default(); 7];
    for bucket in &mut buckets {
        for v in &mut bucket.windows {
            *v = r.get_u64() as f64;
        }
    }
    let [bytes_sent, bytes_received, log_bytes_received, files_sent, files_received, connections, total_errors] = buckets;

    let mut log_history = [[0u8; LOG_HISTORY_LEN]; LOG_HISTORY_KINDS];
    for kind in &mut log_history {
        for v in kind.iter_mut() {
            *v = r.get_u8();
        }
    }
    let options = AfdOptions::from_bits_truncate(r.get_u32());
    let log_capabilities = AfdOptions::from_bits_truncate(r.get_u32());
    let last_data_time = r.get_i64();

    MsaRow {
        alias,
        afd_id: 0,
        host: [host0, host1],
        port: [port0, port1],
        is_group_header,
        connect_status,
        afd_toggle,
        special_flag,
        amg,
        fd,
        archive_watch,
        jobs_in_queue,
        danger_no_of_jobs: 0,
        no_of_transfers,
        host_error_counter,
        no_of_hosts,
        no_of_dirs,
        no_of_jobs,
        fc,
        fs,
        tr,
        fr,
        ec,
        top_no_of_transfers,
        top_tr,
        top_fr,
        top_timestamps,
        bytes_sent,
        bytes_received,
        log_bytes_received,
        files_sent,
        files_received,
        connections,
        total_errors,
        log_history,
        options,
        log_capabilities,
        last_data_time,
    }
}

/// v0 layout: no `afd_id`, `special_flag`, `no_of_dirs`, `log_capabilities`,
/// `danger_no_of_jobs`, or sum buckets; `fs`/`tr`/`top_tr[]` are 32-bit
/// (all introduced or widened at v0→v1).
fn decode_row_v0(buf: &[u8]) -> MsaRow {
    debug_assert_eq!(buf.len(), ROW_SIZE_V0);
    let mut r = Reader::new(buf);
    let alias = r.get_str(MAX_ALIAS_LENGTH);
    let host0 = r.get_str(MAX_HOST_LEN);
    let host1 = r.get_str(MAX_HOST_LEN);
    let port0 = r.get_u16();
    let port1 = r.get_u16();
    let is_group_header = r.get_u8() != 0;
    let connect_status = connect_status_from_u8(r.get_u8());
    let afd_toggle = r.get_u8();
    let amg = component_status_from_u8(r.get_u8());
    let fd = component_status_from_u8(r.get_u8());
    let archive_watch = component_status_from_u8(r.get_u8());
    let jobs_in_queue = r.get_u32();
    let no_of_transfers = r.get_u32();
    let host_error_counter = r.get_u32();
    let no_of_hosts = r.get_u32();
    let no_of_jobs = r.get_u32();
    let fc = r.get_u64();
    let fs = r.get_u32() as u64;
    let tr = r.get_u32() as u64;
    let fr = r.get_u64();
    let ec = r.get_u64();
    let mut top_no_of_transfers = [0u32; TOP_N];
    for v in &mut top_no_of_transfers {
        *v = r.get_u32();
    }
    let mut top_tr = [0u64; TOP_N];
    for v in &mut top_tr {
        *v = r.get_u32() as u64;
    }
    let mut top_fr = [0u64; TOP_N];
    for v in &mut top_fr {
        *v = r.get_u64();
    }
    let mut top_timestamps = [0i64; TOP_N];
    for v in &mut top_timestamps {
        *v = r.get_i64();
    }

    let mut log_history = [[0u8; LOG_HISTORY_LEN]; LOG_HISTORY_KINDS];
    for kind in &mut log_history {
        for v in kind.iter_mut() {
            *v = r.get_u8();
        }
    }
    let options = AfdOptions::from_bits_truncate(r.get_u32());
    let last_data_time = r.get_i64();

    MsaRow {
        alias,
        afd_id: 0,
        host: [host0, host1],
        port: [port0, port1],
        is_group_header,
        connect_status,
        afd_toggle,
        special_flag: SpecialFlags::empty(),
        amg,
        fd,
        archive_watch,
        jobs_in_queue,
        danger_no_of_jobs: 0,
        no_of_transfers,
        host_error_counter,
        no_of_hosts,
        no_of_dirs: 0,
        no_of_jobs,
        fc,
        fs,
        tr,
        fr,
        ec,
        top_no_of_transfers,
        top_tr,
        top_fr,
        top_timestamps,
        bytes_sent: SumBuckets::default(),
        bytes_received: SumBuckets::default(),
        log_bytes_received: SumBuckets::default(),
        files_sent: SumBuckets::default(),
        files_received: SumBuckets::default(),
        connections: SumBuckets::default(),
        total_errors: SumBuckets::default(),
        log_history,
        options,
        log_capabilities: AfdOptions::empty(),
        last_data_time,
    }
}

/// Encodes `row` using the v0 layout, for tests elsewhere in this module
/// tree that need to pre-seed a region as though it were written by a v0
/// build (spec scenario: "pre-seed `status.N` with v0 layout").
#[cfg(test)]
pub(crate) fn test_encode_row_v0(row: &MsaRow) -> Vec<u8> {
    let mut buf = vec![0u8; ROW_SIZE_V0];
    let mut w = Writer::new(&mut buf);
    w.put_str(MAX_ALIAS_LENGTH, &row.alias);
    w.put_str(MAX_HOST_LEN, &row.host[0]);
    w.put_str(MAX_HOST_LEN, &row.host[1]);
    w.put_u16(row.port[0]);
    w.put_u16(row.port[1]);
    w.put_u8(row.is_group_header as u8);
    w.put_u8(row.connect_status as u8);
    w.put_u8(row.afd_toggle);
    w.put_u8(row.amg as u8);
    w.put_u8(row.fd as u8);
    w.put_u8(row.archive_watch as u8);
    w.put_u32(row.jobs_in_queue);
    w.put_u32(row.no_of_transfers);
    w.put_u32(row.host_error_counter);
    w.put_u32(row.no_of_hosts);
    w.put_u32(row.no_of_jobs);
    w.put_u64(row.fc);
    w.put_u32(row.fs as u32);
    w.put_u32(row.tr as u32);
    w.put_u64(row.fr);
    w.put_u64(row.ec);
    for v in row.top_no_of_transfers {
        w.put_u32(v);
    }
    for v in row.top_tr {
        w.put_u32(v as u32);
    }
    for v in row.top_fr {
        w.put_u64(v);
    }
    for v in row.top_timestamps {
        w.put_i64(v);
    }
    for kind in &row.log_history {
        for &v in kind {
            w.put_u8(v);
        }
    }
    w.put_u32(row.options.bits());
    w.put_i64(row.last_data_time);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_entry::{ConfigEntry, Switching};

    #[test]
    fn round_trips_a_fresh_row() {
        let entry = ConfigEntry {
            alias: "alpha".into(),
            host: ["h1".into(), "h2".into()],
            port: [4444, 5555],
            switching: Switching::Auto,
            poll_interval_s: 5,
            connect_time_s: 5,
            disconnect_time_s: 60,
            rcmd: "rsh".into(),
            options: AfdOptions::SYSTEM_LOG,
            convert_username: Vec::new(),
        };
        let mut row = MsaRow::new_from_entry(&entry);
        row.fc = 123456789;
        row.top_tr[0] = 42;
        row.log_history[1][2] = 5;

        let mut buf = vec![0u8; ROW_SIZE];
        encode_row(&row, &mut buf);
        let decoded = decode_row(&buf);
        assert_eq!(decoded, row);
    }

    #[test]
    fn row_sizes_shrink_down_the_version_chain() {
        assert_eq!(row_size_for_version(3).unwrap(), ROW_SIZE);
        assert!(row_size_for_version(2).unwrap() < ROW_SIZE);
        assert!(row_size_for_version(1).unwrap() < row_size_for_version(2).unwrap());
        assert!(row_size_for_version(0).unwrap() < row_size_for_version(1).unwrap());
        assert!(row_size_for_version(4).is_err());
    }

    /// Hand-writes a v0-layout row (no `afd_id`, no sum buckets, `fs`/`tr`/
    /// `top_tr[]` as 32-bit) and checks `decode_row_v0` reads it back with
    /// sensible defaults for everything v0 didn't carry.
    #[test]
    fn decode_row_v0_reads_narrow_layout() {
        let mut buf = vec![0u8; ROW_SIZE_V0];
        let mut w = Writer::new(&mut buf);
        w.put_str(MAX_ALIAS_LENGTH, "bravo");
        w.put_str(MAX_HOST_LEN, "h1");
        w.put_str(MAX_HOST_LEN, "h2");
        w.put_u16(111);
        w.put_u16(222);
        w.put_u8(0); // is_group_header
        w.put_u8(ConnectStatus::Connected as u8);
        w.put_u8(0); // afd_toggle
        w.put_u8(ComponentStatus::Running as u8); // amg
        w.put_u8(ComponentStatus::Running as u8); // fd
        w.put_u8(ComponentStatus::Stopped as u8); // archive_watch
        w.put_u32(7); // jobs_in_queue
        w.put_u32(3); // no_of_transfers
        w.put_u32(1); // host_error_counter
        w.put_u32(2); // no_of_hosts
        w.put_u32(9); // no_of_jobs
        w.put_u64(1_000); // fc
        w.put_u32(500); // fs (32-bit in v0)
        w.put_u32(600); // tr (32-bit in v0)
        w.put_u64(2_000); // fr
        w.put_u64(3_000); // ec
        for _ in 0..TOP_N {
            w.put_u32(0);
        }
        for i in 0..TOP_N {
            w.put_u32(if i == 0 { 42 } else { 0 }); // top_tr (32-bit in v0)
        }
        for _ in 0..TOP_N {
            w.put_u64(0);
        }
        for _ in 0..TOP_N {
            w.put_i64(0);
        }
        for _ in 0..LOG_HISTORY_KINDS * LOG_HISTORY_LEN {
            w.put_u8(0);
        }
        w.put_u32(AfdOptions::SYSTEM_LOG.bits());
        w.put_i64(99);

        let row = decode_row_v0(&buf);
        assert_eq!(row.alias, "bravo");
        assert_eq!(row.afd_id, 0);
        assert_eq!(row.fc, 1_000);
        assert_eq!(row.fs, 500);
        assert_eq!(row.tr, 600);
        assert_eq!(row.top_tr[0], 42);
        assert_eq!(row.danger_no_of_jobs, 0);
        assert_eq!(row.no_of_dirs, 0);
        assert!(row.special_flag.is_empty());
        assert!(row.log_capabilities.is_empty());
        assert_eq!(row.bytes_sent.windows, [0.0; SUM_BUCKETS]);
        assert_eq!(row.last_data_time, 99);
    }

    #[test]
    fn decode_row_versioned_dispatches_by_version() {
        let entry_row_buf = vec![0u8; ROW_SIZE_V0];
        assert!(decode_row_versioned(&entry_row_buf, 0).is_ok());
        assert!(decode_row_versioned(&vec![0u8; ROW_SIZE_V1], 1).is_ok());
        assert!(decode_row_versioned(&vec![0u8; ROW_SIZE_V2], 2).is_ok());
        assert!(decode_row_versioned(&vec![0u8; ROW_SIZE], 3).is_ok());
        assert!(decode_row_versioned(&vec![0u8; ROW_SIZE], 9).is_err());
    }
}
