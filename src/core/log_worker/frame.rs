// src/core/log_worker/frame.rs

//! The log stream's frame grammar (spec §4.G):
//!
//! ```text
//! frame    := packet | ocontrol | nop
//! packet   := 'L' KIND ' ' options ' ' pktno ' ' length '\0' payload[length]
//! ocontrol := 'O' KIND ' ' inode ' ' logno '\r\n'
//! nop      := 'LN\r\n'
//! ```
//!
//! `parse_one` is written for incremental use: given however many bytes have
//! arrived so far, it returns `Ok(None)` when the buffer doesn't yet hold a
//! complete frame rather than blocking or erroring, so the caller can simply
//! append more bytes and retry.

use crate::core::errors::AfdMonError;

/// One remote log stream. Letters per spec §4.G's `KIND` production.
/// `Confirmation` has no letter in the streaming grammar: it is a capability
/// bit only (spec §6.2), never a packet kind on the wire, so it is tracked
/// here for `AfdOptions::requested_log_kinds` symmetry but `as_letter`/
/// `from_letter` never produce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    System,
    Event,
    Receive,
    Transfer,
    TransferDebug,
    Input,
    Production,
    Output,
    Distribution,
    Delete,
    Confirmation,
}

impl LogKind {
    pub fn as_letter(self) -> char {
        match self {
            LogKind::System => 'S',
            LogKind::Event => 'E',
            LogKind::Receive => 'R',
            LogKind::Transfer => 'T',
            LogKind::TransferDebug => 'B',
            LogKind::Input => 'I',
            LogKind::Production => 'U',
            LogKind::Output => 'P',
            LogKind::Distribution => 'O',
            LogKind::Delete => 'D',
            LogKind::Confirmation => '?',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        match c {
            'S' => Some(LogKind::System),
            'E' => Some(LogKind::Event),
            'R' => Some(LogKind::Receive),
            'T' => Some(LogKind::Transfer),
            'B' => Some(LogKind::TransferDebug),
            'I' => Some(LogKind::Input),
            'U' => Some(LogKind::Production),
            'P' => Some(LogKind::Output),
            'O' => Some(LogKind::Distribution),
            'D' => Some(LogKind::Delete),
            _ => None,
        }
    }

    /// Short directory-safe name used for rolling log file prefixes.
    pub fn file_prefix(self) -> &'static str {
        match self {
            LogKind::System => "system",
            LogKind::Event => "event",
            LogKind::Receive => "receive",
            LogKind::Transfer => "transfer",
            LogKind::TransferDebug => "transfer_debug",
            LogKind::Input => "input",
            LogKind::Production => "production",
            LogKind::Output => "output",
            LogKind::Distribution => "distribution",
            LogKind::Delete => "delete",
            LogKind::Confirmation => "confirmation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Packet {
        kind: LogKind,
        options: u32,
        pktno: u32,
        payload: Vec<u8>,
    },
    OControl {
        kind: LogKind,
        inode: u64,
        logno: u32,
    },
    Nop,
}

/// A structural parse failure: the buffer's leading byte does not open any
/// known frame. The caller discards the buffer and counts a framing failure.
#[derive(Debug)]
pub struct FrameSyntaxError;

/// Attempts to parse exactly one frame from the front of `buf`.
///
/// Returns `Ok(Some((frame, consumed)))` on a complete frame, `Ok(None)` if
/// `buf` is a valid-so-far prefix that simply needs more bytes, or
/// `Err(FrameSyntaxError)` if the leading byte cannot start any frame.
pub fn parse_one(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameSyntaxError> {
    if buf.is_empty() {
        return Ok(None);
    }
    match buf[0] {
        b'L' => {
            if buf.len() >= 2 && buf[1] == b'N' {
                return parse_nop(buf);
            }
            parse_packet(buf)
        }
        b'O' => parse_ocontrol(buf),
        _ => Err(FrameSyntaxError),
    }
}

fn parse_nop(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameSyntaxError> {
    const NOP: &[u8] = b"LN\r\n";
    if buf.len() < NOP.len() {
        if NOP.starts_with(buf) {
            return Ok(None);
        }
        return Err(FrameSyntaxError);
    }
    if &buf[..NOP.len()] != NOP {
        return Err(FrameSyntaxError);
    }
    Ok(Some((Frame::Nop, NOP.len())))
}

/// `'L' KIND ' ' options ' ' pktno ' ' length '\0' payload[length]`
fn parse_packet(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameSyntaxError> {
    // Header ends at the NUL byte; we need that before we know where the
    // payload starts, let alone whether it's fully buffered.
    let Some(nul_pos) = buf.iter().position(|&b| b == 0) else {
        // No NUL yet: could still be an in-flight header, unless it's
        // already unreasonably long, which indicates garbage.
        if buf.len() > 256 {
            return Err(FrameSyntaxError);
        }
        return Ok(None);
    };
    let header = std::str::from_utf8(&buf[..nul_pos]).map_err(|_| FrameSyntaxError)?;
    let mut fields = header.split(' ');
    let head = fields.next().ok_or(FrameSyntaxError)?;
    if head.len() != 2 || !head.starts_with('L') {
        return Err(FrameSyntaxError);
    }
    let kind = LogKind::from_letter(head.as_bytes()[1] as char).ok_or(FrameSyntaxError)?;
    let options: u32 = fields.next().ok_or(FrameSyntaxError)?.parse().map_err(|_| FrameSyntaxError)?;
    let pktno: u32 = fields.next().ok_or(FrameSyntaxError)?.parse().map_err(|_| FrameSyntaxError)?;
    let length: usize = fields.next().ok_or(FrameSyntaxError)?.parse().map_err(|_| FrameSyntaxError)?;
    if fields.next().is_some() {
        return Err(FrameSyntaxError);
    }

    let payload_start = nul_pos + 1;
    let total_len = payload_start + length;
    if buf.len() < total_len {
        return Ok(None);
    }
    let payload = buf[payload_start..total_len].to_vec();
    Ok(Some((
        Frame::Packet { kind, options, pktno, payload },
        total_len,
    )))
}

/// `'O' KIND ' ' inode ' ' logno '\r\n'`
fn parse_ocontrol(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameSyntaxError> {
    let Some(term_pos) = find_crlf(buf) else {
        if buf.len() > 128 {
            return Err(FrameSyntaxError);
        }
        return Ok(None);
    };
    let line = std::str::from_utf8(&buf[..term_pos]).map_err(|_| FrameSyntaxError)?;
    let mut fields = line.split(' ');
    let head = fields.next().ok_or(FrameSyntaxError)?;
    if head.len() != 2 || !head.starts_with('O') {
        return Err(FrameSyntaxError);
    }
    let kind = LogKind::from_letter(head.as_bytes()[1] as char).ok_or(FrameSyntaxError)?;
    let inode: u64 = fields.next().ok_or(FrameSyntaxError)?.parse().map_err(|_| FrameSyntaxError)?;
    let logno: u32 = fields.next().ok_or(FrameSyntaxError)?.parse().map_err(|_| FrameSyntaxError)?;
    if fields.next().is_some() {
        return Err(FrameSyntaxError);
    }
    Ok(Some((Frame::OControl { kind, inode, logno }, term_pos + 2)))
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nop() {
        let (frame, consumed) = parse_one(b"LN\r\ntrailing").unwrap().unwrap();
        assert_eq!(frame, Frame::Nop);
        assert_eq!(consumed, 4);
    }

    #[test]
    fn parses_packet() {
        let mut buf = b"LT 0 1 5\0".to_vec();
        buf.extend_from_slice(b"hello");
        buf.extend_from_slice(b"extra");
        let (frame, consumed) = parse_one(&buf).unwrap().unwrap();
        match frame {
            Frame::Packet { kind, pktno, payload, .. } => {
                assert_eq!(kind, LogKind::Transfer);
                assert_eq!(pktno, 1);
                assert_eq!(payload, b"hello");
            }
            _ => panic!("expected packet"),
        }
        assert_eq!(consumed, buf.len() - 5);
    }

    #[test]
    fn incomplete_packet_requests_more_bytes() {
        let buf = b"LT 0 1 500\0short".to_vec();
        assert!(parse_one(&buf).unwrap().is_none());
    }

    #[test]
    fn parses_ocontrol() {
        let (frame, consumed) = parse_one(b"OS 12345 3\r\nrest").unwrap().unwrap();
        assert_eq!(frame, Frame::OControl { kind: LogKind::System, inode: 12345, logno: 3 });
        assert_eq!(consumed, 12);
    }

    #[test]
    fn garbage_byte_is_a_syntax_error() {
        assert!(parse_one(b"Xgarbage").is_err());
    }

    #[test]
    fn incomplete_ocontrol_requests_more_bytes() {
        assert!(parse_one(b"OS 12345").unwrap().is_none());
    }
}
