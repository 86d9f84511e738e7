// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Length-prefixed duplex IPC channel (spec §4.1): framing, the `Transport`
//! trait and self-healing wrapper, the in-memory test transport, and the
//! Windows named-pipe transport with its anonymous-pipe handshake.

pub mod duplex;
pub mod frame;
pub mod named_pipe;
pub mod transport;

pub use duplex::DuplexTransport;
pub use frame::{encode, read_frame, write_frame, Frame, FrameError, MsgType, MAX_PAYLOAD_BYTES};
pub use transport::{SelfHealingTransport, Transport};
