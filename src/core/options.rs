// src/core/options.rs

//! The option/capability bitset shared by `ConfigEntry.options` and a row's
//! log capability/option fields (spec §6.2). Options and capabilities share
//! the same numeric space, so a single `bitflags` type serves both.

use bitflags::bitflags;

bitflags! {
    /// Per-remote option bits. Values and effects per spec §6.2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AfdOptions: u32 {
        /// SSH transport compression.
        const COMPRESS              = 0x0001;
        /// Pass `-Y` on `ssh` invocation.
        const MINUS_Y               = 0x0002;
        /// Use short script names (don't use the full path).
        const DONT_USE_FULL_PATH    = 0x0004;
        /// Wrap the TCP connection in TLS (component A).
        const ENABLE_TLS            = 0x0008;
        /// Request the system-log stream.
        const SYSTEM_LOG            = 0x0010;
        /// Request the receive-log stream.
        const RECEIVE_LOG           = 0x0020;
        /// Request the transfer-log stream.
        const TRANSFER_LOG          = 0x0040;
        /// Request the transfer-debug-log stream.
        const TRANSFER_DEBUG_LOG    = 0x0080;
        /// Request the input-log stream.
        const INPUT_LOG             = 0x0100;
        /// Request the production-log stream.
        const PRODUCTION_LOG        = 0x0200;
        /// Request the output-log stream.
        const OUTPUT_LOG            = 0x0400;
        /// Request the delete-log stream.
        const DELETE_LOG            = 0x0800;
        /// Request job-id data.
        const JOB_DATA              = 0x1000;
        /// Use compression profile 1.
        const COMPRESSION_1         = 0x2000;
        /// Request the event-log stream.
        const EVENT_LOG             = 0x4000;
        /// Request the distribution-log stream.
        const DISTRIBUTION_LOG      = 0x8000;
        /// Request the confirmation-log stream.
        const CONFIRMATION_LOG      = 0x1_0000;
        /// Skip the SSH host-key check.
        const NO_STRICT_SSH_HOSTKEY = 0x80_0000;
    }
}

impl AfdOptions {
    /// All bits that select a remote log stream to request via `LOG` (component G).
    pub fn requested_log_kinds(self) -> Vec<super::log_worker::LogKind> {
        use super::log_worker::LogKind;
        let mut kinds = Vec::new();
        if self.contains(AfdOptions::SYSTEM_LOG) {
            kinds.push(LogKind::System);
        }
        if self.contains(AfdOptions::RECEIVE_LOG) {
            kinds.push(LogKind::Receive);
        }
        if self.contains(AfdOptions::TRANSFER_LOG) {
            kinds.push(LogKind::Transfer);
        }
        if self.contains(AfdOptions::TRANSFER_DEBUG_LOG) {
            kinds.push(LogKind::TransferDebug);
        }
        if self.contains(AfdOptions::INPUT_LOG) {
            kinds.push(LogKind::Input);
        }
        if self.contains(AfdOptions::PRODUCTION_LOG) {
            kinds.push(LogKind::Production);
        }
        if self.contains(AfdOptions::OUTPUT_LOG) {
            kinds.push(LogKind::Output);
        }
        if self.contains(AfdOptions::DELETE_LOG) {
            kinds.push(LogKind::Delete);
        }
        if self.contains(AfdOptions::EVENT_LOG) {
            kinds.push(LogKind::Event);
        }
        if self.contains(AfdOptions::DISTRIBUTION_LOG) {
            kinds.push(LogKind::Distribution);
        }
        // CONFIRMATION_LOG is capability-only: it has no wire letter in the
        // `LOG`/packet grammar (spec §4.G), so it never selects a stream to
        // request here (`LogKind::Confirmation` exists only for
        // `AfdOptions` symmetry; see `frame.rs`).
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_log_kinds_reflects_bits() {
        let opts = AfdOptions::TRANSFER_LOG | AfdOptions::SYSTEM_LOG | AfdOptions::ENABLE_TLS;
        let kinds = opts.requested_log_kinds();
        assert_eq!(kinds.len(), 2);
    }

    #[test]
    fn bits_match_spec_table() {
        assert_eq!(AfdOptions::COMPRESS.bits(), 0x0001);
        assert_eq!(AfdOptions::NO_STRICT_SSH_HOSTKEY.bits(), 0x80_0000);
        assert_eq!(AfdOptions::CONFIRMATION_LOG.bits(), 0x1_0000);
    }
}
