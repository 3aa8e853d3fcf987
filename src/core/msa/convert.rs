// src/core/msa/convert.rs

//! The v0→v1→v2→v3 schema upgrade chain (spec §4.B "Conversion rules").
//!
//! Each step only ever *adds* information; nothing is dropped. Multi-step
//! conversions (v0→v2, v0→v3) are defined by the spec as direct transitions
//! "with the combined effects" — we realize that by composing the
//! single-step functions rather than hand-writing every pairwise jump
//! (Open Question, resolved in `SPEC_FULL.md` §4.3).

use super::row::MsaRow;

/// Applies every upgrade step needed to take a row from `from_version` to
/// `to_version` (`from_version <= to_version <= 3`), by simple composition.
///
/// This runs on rows already decoded with `codec::decode_row_versioned`
/// (i.e. with the *old* region's own byte layout, not the current one), so
/// a field that's merely absent from an older schema has already been
/// filled with its zero default by the decoder. What's left for each step
/// here is the part decoding can't do on its own: recomputing a derived
/// value, or otherwise transforming data that did exist under the old
/// layout.
pub fn convert_row(row: &mut MsaRow, from_version: u8, to_version: u8) {
    let mut v = from_version;
    while v < to_version {
        match v {
            0 => upgrade_v0_to_v1(row),
            1 => upgrade_v1_to_v2(row),
            2 => upgrade_v2_to_v3(row),
            _ => unreachable!("to_version beyond CURRENT_VERSION should have been rejected earlier"),
        }
        v += 1;
    }
}

/// v0→v1: widen `fs`, `tr`, `top_tr[]` to 64-bit, and introduce sum buckets,
/// `no_of_dirs`, `log_capabilities`, `special_flag`. `decode_row_v0` already
/// produces these with the widened type and a zero default, so there's no
/// further transformation left to perform; the step stays in the chain only
/// so it's explicit and auditable alongside the steps that do real work.
fn upgrade_v0_to_v1(_row: &mut MsaRow) {}

/// v1→v2: add `danger_no_of_jobs`, initialized to 0.
fn upgrade_v1_to_v2(row: &mut MsaRow) {
    row.danger_no_of_jobs = 0;
}

/// v2→v3: recompute `afd_id` from `alias`; sum-bucket byte counters are
/// already `f64` in this implementation's native representation.
fn upgrade_v2_to_v3(row: &mut MsaRow) {
    row.afd_id = super::row::checksum(&row.alias);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_entry::{ConfigEntry, Switching};
    use crate::core::options::AfdOptions;

    fn sample_row() -> MsaRow {
        let entry = ConfigEntry {
            alias: "alpha".into(),
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
        MsaRow::new_from_entry(&entry)
    }

    #[test]
    fn v0_to_v3_recomputes_afd_id() {
        let mut row = sample_row();
        row.afd_id = 0;
        convert_row(&mut row, 0, 3);
        assert_eq!(row.afd_id, super::super::row::checksum("alpha"));
    }

    #[test]
    fn v1_to_v2_zeroes_danger_jobs() {
        let mut row = sample_row();
        row.danger_no_of_jobs = 7;
        convert_row(&mut row, 1, 2);
        assert_eq!(row.danger_no_of_jobs, 0);
    }

    #[test]
    fn same_version_is_a_no_op() {
        let mut row = sample_row();
        let before = row.clone();
        convert_row(&mut row, 3, 3);
        assert_eq!(row, before);
    }
}
