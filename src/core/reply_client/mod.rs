// src/core/reply_client/mod.rs

//! Component A: the TCP/TLS reply-code client shared by the monitor worker
//! (F) and the log worker (G). Speaks a small line-oriented reply-code
//! protocol (220/221/421/211- style) over either cleartext or TLS, with a
//! one-shot TLS→cleartext downgrade retry (spec §4.A).

mod tls;

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::core::errors::AfdMonError;

/// Read buffer size backing every connection (spec §4.A "Semantics": "Read
/// buffer is a single fixed-size buffer `MAX_RET_MSG_LENGTH`").
pub const MAX_RET_MSG_LENGTH: usize = 4096;

/// Sticky flag recording why the last read failed, so `quit()` knows to
/// skip a reply read that would only time out again (spec §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeoutFlag {
    Off,
    On,
    ConReset,
    Neither,
}

enum Transport {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Transport {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf).await,
            Transport::Tls(s) => s.read(buf).await,
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Transport::Plain(s) => s.write_all(buf).await,
            Transport::Tls(s) => s.write_all(buf).await,
        }
    }

    async fn shutdown(&mut self) {
        match self {
            Transport::Plain(s) => {
                let _ = s.shutdown().await;
            }
            Transport::Tls(s) => {
                // TLS sessions double-shutdown: once for the TLS close_notify,
                // once for the underlying TCP stream (spec §4.A "quit()").
                let _ = s.shutdown().await;
                let (tcp, _) = s.get_mut();
                let _ = tcp.shutdown().await;
            }
        }
    }
}

pub struct ReplyClient {
    transport: Transport,
    buf: Vec<u8>,
    buf_len: usize,
    timeout_flag: TimeoutFlag,
    tcp_timeout: Duration,
    tls_fallback_used: bool,
    host: String,
    port: u16,
    sending_logdata: bool,
}

impl ReplyClient {
    /// Resolves `host`, connects, optionally performs a TLS handshake, and
    /// validates the initial `220` greeting (spec §4.A `connect`).
    pub async fn connect(host: &str, port: u16, sending_logdata: bool, encrypt: bool) -> Result<Self, AfdMonError> {
        let tcp_timeout = Duration::from_secs(10);
        let addr = (host, port);
        let stream = timeout(tcp_timeout, connect_tcp(addr))
            .await
            .map_err(|_| AfdMonError::Timeout)??;

        apply_socket_options(&stream, sending_logdata)?;

        let mut client = if encrypt {
            let fallback = stream.try_clone_for_fallback();
            match tls::handshake(stream, host, tcp_timeout).await {
                Ok(tls_stream) => Self {
                    transport: Transport::Tls(Box::new(tls_stream)),
                    buf: vec![0u8; MAX_RET_MSG_LENGTH],
                    buf_len: 0,
                    timeout_flag: TimeoutFlag::Off,
                    tcp_timeout,
                    tls_fallback_used: false,
                    host: host.to_string(),
                    port,
                    sending_logdata,
                },
                Err(e) => {
                    warn!(%host, port, error = %e, "TLS handshake failed, retrying in cleartext");
                    let fallback = fallback.ok_or(AfdMonError::Tls(e.to_string()))?;
                    Self {
                        transport: Transport::Plain(fallback),
                        buf: vec![0u8; MAX_RET_MSG_LENGTH],
                        buf_len: 0,
                        timeout_flag: TimeoutFlag::Off,
                        tcp_timeout,
                        tls_fallback_used: true,
                        host: host.to_string(),
                        port,
                        sending_logdata,
                    }
                }
            }
        } else {
            Self {
                transport: Transport::Plain(stream),
                buf: vec![0u8; MAX_RET_MSG_LENGTH],
                buf_len: 0,
                timeout_flag: TimeoutFlag::Off,
                tcp_timeout,
                tls_fallback_used: false,
                host: host.to_string(),
                port,
                sending_logdata,
            }
        };

        let code = client.read_reply().await?;
        if code != 220 {
            return Err(AfdMonError::Incorrect);
        }
        Ok(client)
    }

    /// Formats and sends a single CRLF-terminated command line (spec §4.A
    /// `command`).
    pub async fn command(&mut self, line: &str) -> Result<(), AfdMonError> {
        if line.len() + 2 > MAX_RET_MSG_LENGTH {
            return Err(AfdMonError::Incorrect);
        }
        let mut out = Vec::with_capacity(line.len() + 2);
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
        self.transport.write_all(&out).await.map_err(|e| {
            self.timeout_flag = TimeoutFlag::Neither;
            AfdMonError::from(e)
        })
    }

    /// Returns exactly one CRLF-delimited line, reading more bytes from the
    /// transport as needed, compacting the unread tail to the front of the
    /// fixed buffer between calls (spec §4.A `read_msg`).
    pub async fn read_msg(&mut self) -> Result<String, AfdMonError> {
        loop {
            if let Some(pos) = find_crlf(&self.buf[..self.buf_len]) {
                let line = String::from_utf8_lossy(&self.buf[..pos]).into_owned();
                let rest_start = pos + 2;
                self.buf.copy_within(rest_start..self.buf_len, 0);
                self.buf_len -= rest_start;
                return Ok(line);
            }
            if self.buf_len == self.buf.len() {
                // Buffer full with no CRLF found: the line is too long,
                // treat this the same as a protocol failure.
                self.buf_len = 0;
                return Err(AfdMonError::Incorrect);
            }
            let n = match timeout(self.tcp_timeout, self.transport.read(&mut self.buf[self.buf_len..])).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    if let Some(fallback) = self.maybe_downgrade_tls(&e).await {
                        fallback?;
                        continue;
                    }
                    self.timeout_flag = TimeoutFlag::Neither;
                    return Err(e.into());
                }
                Err(_) => {
                    self.timeout_flag = TimeoutFlag::On;
                    return Err(AfdMonError::Timeout);
                }
            };
            if n == 0 {
                self.timeout_flag = TimeoutFlag::ConReset;
                return Err(AfdMonError::RemoteHangup);
            }
            self.buf_len += n;
        }
    }

    /// Reads raw bytes directly off the transport, for the log worker's
    /// byte-stream frame parser (spec §4.G), which does not read line by
    /// line. Returns whatever was already buffered for `read_msg` first.
    pub async fn read_raw(&mut self) -> Result<Vec<u8>, AfdMonError> {
        if self.buf_len > 0 {
            let out = self.buf[..self.buf_len].to_vec();
            self.buf_len = 0;
            return Ok(out);
        }
        let mut tmp = vec![0u8; MAX_RET_MSG_LENGTH];
        let n = self.transport.read(&mut tmp).await?;
        tmp.truncate(n);
        Ok(tmp)
    }

    /// Repeatedly reads lines, discarding anything that is not `DDD ` / `DDD-`,
    /// and returns the decoded three-digit reply code (spec §4.A `read_reply`).
    pub async fn read_reply(&mut self) -> Result<u16, AfdMonError> {
        loop {
            let line = self.read_msg().await?;
            if line.len() < 4 {
                continue;
            }
            let (code_str, rest) = line.split_at(3);
            if !code_str.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            let Some(sep) = rest.chars().next() else { continue };
            if sep != '-' && !sep.is_whitespace() {
                continue;
            }
            return code_str.parse::<u16>().map_err(|_| AfdMonError::Incorrect);
        }
    }

    /// Compares a decoded reply code against an expected set (spec §4.A
    /// `check_reply`).
    pub fn check_reply(code: u16, expected: &[u16]) -> bool {
        expected.contains(&code)
    }

    /// Sends `QUIT` and shuts the session down gracefully, skipping the
    /// reply read if the sticky timeout flag is already set (spec §4.A
    /// `quit`). Idempotent.
    pub async fn quit(&mut self) -> Result<(), AfdMonError> {
        if self.timeout_flag == TimeoutFlag::On {
            self.transport.shutdown().await;
            return Ok(());
        }
        let _ = self.command("QUIT").await;
        if self.timeout_flag != TimeoutFlag::On {
            match self.read_reply().await {
                Ok(code) if Self::check_reply(code, &[221, 421]) => {}
                _ => debug!(host = %self.host, port = self.port, "QUIT reply was not 221/421"),
            }
        }
        self.transport.shutdown().await;
        Ok(())
    }

    /// Handles the single permitted TLS→cleartext downgrade retry (spec
    /// §4.A: "may transparently close the TLS session and retry the same
    /// read in cleartext... at most once per connection"). Returns `None`
    /// when the error isn't TLS-related or the fallback was already used.
    async fn maybe_downgrade_tls(&mut self, _e: &std::io::Error) -> Option<Result<(), AfdMonError>> {
        if self.tls_fallback_used {
            return None;
        }
        let Transport::Tls(tls) = &mut self.transport else {
            return None;
        };
        self.tls_fallback_used = true;
        let (tcp, _) = tls.get_mut();
        let peer = match tcp.try_clone_for_fallback() {
            Some(s) => s,
            None => return None,
        };
        self.transport = Transport::Plain(peer);
        Some(Ok(()))
    }
}

async fn connect_tcp(addr: (&str, u16)) -> std::io::Result<TcpStream> {
    TcpStream::connect(addr).await
}

fn apply_socket_options(stream: &TcpStream, sending_logdata: bool) -> Result<(), AfdMonError> {
    use std::os::unix::io::AsRawFd;
    stream.set_nodelay(true)?;

    let fd = stream.as_raw_fd();
    // SAFETY: fd is a valid, open socket for the lifetime of this call.
    unsafe {
        let keepalive: libc::c_int = 1;
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            &keepalive as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        // IPTOS_LOWDELAY for polling traffic, IPTOS_THROUGHPUT while
        // streaming log data (spec §4.G "enables keepalive and throughput ToS").
        let tos: libc::c_int = if sending_logdata { 0x08 } else { 0x10 };
        libc::setsockopt(
            fd,
            libc::IPPROTO_IP,
            libc::IP_TOS,
            &tos as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
    Ok(())
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Lets the TLS downgrade path hand the underlying TCP stream back to a
/// plain `Transport` by `dup`-ing the raw fd, without an extra `connect()`
/// round trip or consuming the original (still TLS-owned) stream.
trait TlsFallback {
    fn try_clone_for_fallback(&self) -> Option<TcpStream>;
}

impl TlsFallback for TcpStream {
    fn try_clone_for_fallback(&self) -> Option<TcpStream> {
        use std::os::unix::io::{AsRawFd, FromRawFd};
        let dup_fd = unsafe { libc::dup(self.as_raw_fd()) };
        if dup_fd < 0 {
            return None;
        }
        // SAFETY: dup_fd is a freshly duplicated, open, valid socket fd.
        let std_stream = unsafe { std::net::TcpStream::from_raw_fd(dup_fd) };
        std_stream.set_nonblocking(true).ok()?;
        TcpStream::from_std(std_stream).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_reply_matches_expected_set() {
        assert!(ReplyClient::check_reply(221, &[221, 421]));
        assert!(!ReplyClient::check_reply(500, &[221, 421]));
    }

    #[test]
    fn find_crlf_locates_terminator() {
        assert_eq!(find_crlf(b"hello\r\nworld"), Some(5));
        assert_eq!(find_crlf(b"no terminator"), None);
    }
}
