//! Error types for the l2mux library
//!
//! This module defines the error types used throughout the library.

use thiserror::Error;

use crate::types::ChannelId;

/// Errors returned by the fallible channel and scheduler APIs
#[derive(Debug, Error, PartialEq, Eq)]
pub enum L2capError {
    #[error("Channel {0:#06x} is already attached")]
    AlreadyAttached(ChannelId),

    #[error("Channel {0:#06x} not found")]
    ChannelNotFound(ChannelId),

    #[error("Scheduler end of channel {0:#06x} is already in use")]
    QueueEndInUse(ChannelId),

    #[error("Payload of {size} bytes exceeds MTU {mtu}")]
    MtuExceeded { size: usize, mtu: u16 },

    #[error("Queue is full")]
    QueueFull,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for L2CAP operations
pub type L2capResult<T> = std::result::Result<T, L2capError>;

/// Reasons an inbound frame is rejected during reassembly.
///
/// These never leave the data controller as errors; they are logged,
/// counted and followed by a reset of the reassembly state.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("Frame too short")]
    Truncated,

    #[error("Supervisory frames are not handled by this channel")]
    SupervisoryFrame,

    #[error("Unexpected sequence number: got {received}, expected {expected}")]
    OutOfSequence { expected: u8, received: u8 },

    #[error("Peer sent a frame without credits")]
    CreditUnderflow,

    #[error("Fragment of {size} bytes exceeds MPS {mps}")]
    OversizedFragment { size: usize, mps: u16 },

    #[error("SDU length {length} exceeds MTU {mtu}")]
    SduTooLarge { length: usize, mtu: u16 },

    #[error("Start of a new SDU while one is being reassembled")]
    UnexpectedStart,

    #[error("Continuation or end segment without a start")]
    UnexpectedContinuation,

    #[error("SDU length mismatch: declared {declared}, assembled {assembled}")]
    LengthMismatch { declared: usize, assembled: usize },
}
