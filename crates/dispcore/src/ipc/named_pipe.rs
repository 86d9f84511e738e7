// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Anonymous-pipe handshake and the Windows named-pipe [`Transport`]
//! (spec §4.1 "Handshake (anonymous variant)", §6 "Handshake message").
//!
//! The handshake byte-codec (`encode_handshake_name`/`decode_handshake_name`)
//! is plain data manipulation and is compiled and tested on every platform;
//! only the actual pipe I/O is gated behind `cfg(windows)`, since
//! `tokio::net::windows::named_pipe` does not exist elsewhere.

use std::time::Duration;

use thiserror::Error;

/// 80 bytes = 40 UTF-16LE code units, null-terminated (spec §6).
pub const HANDSHAKE_NAME_BYTES: usize = 80;
const HANDSHAKE_NAME_UNITS: usize = HANDSHAKE_NAME_BYTES / 2;

pub const ACK_BYTE: u8 = 0x02;

/// Server's wait for the client ACK after sending the pipe name (spec §4.1).
pub const HANDSHAKE_ACK_TIMEOUT: Duration = Duration::from_millis(1200);

/// Client's retry budget dialing the data pipe once it has the name
/// (spec §4.1 "dialed with up to 5 s of retry").
pub const DATA_PIPE_CONNECT_RETRY_BUDGET: Duration = Duration::from_secs(5);

/// Overall IPC connect timeout, shrunk during shutdown (spec §5 "Timeouts").
pub const IPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(8);
pub const IPC_CONNECT_TIMEOUT_SHUTDOWN: Duration = Duration::from_millis(500);
pub const IPC_SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("pipe name is not valid UTF-16")]
    InvalidUtf16,
    #[error("pipe name has no null terminator within {HANDSHAKE_NAME_BYTES} bytes")]
    Unterminated,
    #[error("pipe name too long to fit in {HANDSHAKE_NAME_BYTES} bytes")]
    TooLong,
}

/// Encode `name` as the fixed-width, null-terminated UTF-16LE handshake
/// payload. Returns `TooLong` if `name` (plus its terminator) does not fit.
pub fn encode_handshake_name(name: &str) -> Result<[u8; HANDSHAKE_NAME_BYTES], HandshakeError> {
    let units: Vec<u16> = name.encode_utf16().collect();
    if units.len() + 1 > HANDSHAKE_NAME_UNITS {
        return Err(HandshakeError::TooLong);
    }
    let mut buf = [0u8; HANDSHAKE_NAME_BYTES];
    for (i, unit) in units.iter().enumerate() {
        buf[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    Ok(buf)
}

/// Decode the fixed-width handshake payload back into a pipe name,
/// stopping at the first null code unit.
pub fn decode_handshake_name(buf: &[u8; HANDSHAKE_NAME_BYTES]) -> Result<String, HandshakeError> {
    let units: Vec<u16> =
        buf.chunks_exact(2).map(|pair| u16::from_le_bytes([pair[0], pair[1]])).collect();
    let nul_at = units.iter().position(|&u| u == 0).ok_or(HandshakeError::Unterminated)?;
    String::from_utf16(&units[..nul_at]).map_err(|_| HandshakeError::InvalidUtf16)
}

/// Generate a random pipe name under the anonymous namespace the handshake
/// hands to the client (spec §4.1: "sends a single... random pipe name").
pub fn generate_pipe_name(prefix: &str) -> String {
    let suffix: u64 = rand::random();
    format!(r"\\.\pipe\{prefix}-{suffix:016x}")
}

#[cfg(windows)]
pub use platform::{client_handshake, server_handshake, NamedPipeTransport, PeekedPipe};

#[cfg(windows)]
mod platform {
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions};
    use tokio::time::timeout;

    use super::{decode_handshake_name, encode_handshake_name, HANDSHAKE_ACK_TIMEOUT};
    use crate::ipc::duplex::DuplexTransport;
    use crate::ipc::frame::FrameError;
    use crate::ipc::transport::Transport;

    pub type NamedPipeTransport = DuplexTransport;

    /// A [`NamedPipeServer`] with at most one byte already read off its
    /// front. Used by the control-pipe-as-data-pipe fallback (spec §4.1): the
    /// byte consumed while probing for the handshake ACK is replayed as the
    /// first byte the frame codec reads, so nothing is lost.
    pub struct PeekedPipe {
        prefix: Option<u8>,
        inner: NamedPipeServer,
    }

    impl PeekedPipe {
        fn fresh(inner: NamedPipeServer) -> Self {
            Self { prefix: None, inner }
        }

        fn prefixed(byte: u8, inner: NamedPipeServer) -> Self {
            Self { prefix: Some(byte), inner }
        }
    }

    impl AsyncRead for PeekedPipe {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let this = self.get_mut();
            if let Some(byte) = this.prefix.take() {
                buf.put_slice(&[byte]);
                return Poll::Ready(Ok(()));
            }
            Pin::new(&mut this.inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for PeekedPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_flush(cx)
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
        }
    }

    /// Server side of the anonymous handshake: accept a control connection,
    /// send the data-pipe name, wait for the ACK, then open the data pipe
    /// (spec §4.1). Falls back to treating the control connection itself as
    /// the data pipe if the peer speaks the framed protocol directly instead
    /// of ACKing.
    pub async fn server_handshake(
        control_pipe_name: &str,
        data_pipe_prefix: &str,
    ) -> Result<PeekedPipe, FrameError> {
        let mut control =
            ServerOptions::new().create(control_pipe_name).map_err(FrameError::Io)?;
        control.connect().await.map_err(FrameError::Io)?;

        let data_pipe_name = super::generate_pipe_name(data_pipe_prefix);
        let name_bytes = encode_handshake_name(&data_pipe_name)
            .map_err(|e| FrameError::Protocol(e.to_string()))?;

        use tokio::io::AsyncWriteExt;
        control.write_all(&name_bytes).await.map_err(FrameError::Io)?;

        use tokio::io::AsyncReadExt;
        let mut ack = [0u8; 1];
        match timeout(HANDSHAKE_ACK_TIMEOUT, control.read_exact(&mut ack)).await {
            Ok(Ok(_)) if ack[0] == super::ACK_BYTE => {
                let mut data_server =
                    ServerOptions::new().create(&data_pipe_name).map_err(FrameError::Io)?;
                data_server.connect().await.map_err(FrameError::Io)?;
                Ok(PeekedPipe::fresh(data_server))
            }
            // The peer skipped the ACK and started writing a framed message
            // straight onto the control pipe: treat the control pipe as the
            // data pipe, replaying the byte already consumed above as the
            // frame codec's first byte.
            Ok(Ok(_)) => Ok(PeekedPipe::prefixed(ack[0], control)),
            Ok(Err(e)) => Err(FrameError::Io(e)),
            Err(_) => Err(FrameError::Protocol("handshake ACK not received".into())),
        }
    }

    /// Client side: dial the control pipe, read the data-pipe name, ACK it,
    /// then dial the data pipe with a bounded retry budget.
    pub async fn client_handshake(
        control_pipe_name: &str,
        retry_budget: Duration,
    ) -> Result<NamedPipeClient, FrameError> {
        let mut control = ClientOptions::new().open(control_pipe_name).map_err(FrameError::Io)?;

        use tokio::io::AsyncReadExt;
        let mut name_bytes = [0u8; super::HANDSHAKE_NAME_BYTES];
        control.read_exact(&mut name_bytes).await.map_err(FrameError::Io)?;
        let data_pipe_name =
            decode_handshake_name(&name_bytes).map_err(|e| FrameError::Protocol(e.to_string()))?;

        use tokio::io::AsyncWriteExt;
        control.write_all(&[super::ACK_BYTE]).await.map_err(FrameError::Io)?;

        let deadline = tokio::time::Instant::now() + retry_budget;
        loop {
            match ClientOptions::new().open(&data_pipe_name) {
                Ok(client) => return Ok(client),
                Err(_) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => return Err(FrameError::Io(e)),
            }
        }
    }
}

#[cfg(test)]
#[path = "named_pipe_tests.rs"]
mod tests;
