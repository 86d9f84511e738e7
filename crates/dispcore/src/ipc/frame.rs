// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Length-prefixed frame codec (spec §4.1, §6): `len: u32 LE` followed by
//! `len` payload bytes, first payload byte a [`MsgType`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Payloads above this size are a protocol error (spec §4.1).
pub const MAX_PAYLOAD_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Apply,
    Revert,
    Reset,
    ExportGolden,
    SnapshotCurrent,
    Ping,
    Stop,
}

impl MsgType {
    pub fn to_byte(self) -> u8 {
        match self {
            MsgType::Apply => 0x01,
            MsgType::Revert => 0x02,
            MsgType::Reset => 0x03,
            MsgType::ExportGolden => 0x04,
            MsgType::SnapshotCurrent => 0x05,
            MsgType::Ping => 0xFE,
            MsgType::Stop => 0xFF,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(MsgType::Apply),
            0x02 => Some(MsgType::Revert),
            0x03 => Some(MsgType::Reset),
            0x04 => Some(MsgType::ExportGolden),
            0x05 => Some(MsgType::SnapshotCurrent),
            0xFE => Some(MsgType::Ping),
            0xFF => Some(MsgType::Stop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub msg_type: MsgType,
    pub body: Bytes,
}

impl Frame {
    pub fn new(msg_type: MsgType, body: impl Into<Bytes>) -> Self {
        Self { msg_type, body: body.into() }
    }

    pub fn empty(msg_type: MsgType) -> Self {
        Self::new(msg_type, Bytes::new())
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("peer disconnected")]
    Disconnected,
    #[error("timed out waiting for a frame")]
    Timeout,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialize one frame onto the wire: `len(u32 LE) | type(u8) | body`.
pub fn encode(frame: &Frame) -> Bytes {
    let len = 1 + frame.body.len();
    let mut buf = BytesMut::with_capacity(4 + len);
    buf.put_u32_le(len as u32);
    buf.put_u8(frame.msg_type.to_byte());
    buf.extend_from_slice(&frame.body);
    buf.freeze()
}

/// Read exactly one whole frame from `reader`, never delivering a partial
/// frame even if the underlying stream arrives in chunks (spec §4.1
/// `receive`).
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, FrameError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::Disconnected)
        }
        Err(e) => return Err(FrameError::Io(e)),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len == 0 {
        return Err(FrameError::Protocol("empty frame".into()));
    }
    if len > MAX_PAYLOAD_BYTES {
        return Err(FrameError::Protocol(format!("oversized frame: {len} bytes")));
    }

    let mut body = BytesMut::zeroed(len);
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::Disconnected
        } else {
            FrameError::Io(e)
        }
    })?;

    let msg_type = MsgType::from_byte(body[0])
        .ok_or_else(|| FrameError::Protocol(format!("unknown msg type 0x{:02x}", body[0])))?;
    body.advance(1);
    Ok(Frame { msg_type, body: body.freeze() })
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), FrameError> {
    writer.write_all(&encode(frame)).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
