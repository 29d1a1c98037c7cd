//! Type definitions for L2CAP scheduling
//!
//! This module contains core data structures shared by the scheduler,
//! the senders and the data controllers.

use std::fmt;

use super::constants::*;
use super::error::{L2capError, L2capResult};

/// Channel Identifier (CID)
pub type ChannelId = u16;

/// Segmentation and Reassembly marker carried in the control field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sar {
    /// Complete SDU in a single frame
    Unsegmented,
    /// First segment, carries the SDU length
    Start,
    /// Last segment
    End,
    /// Middle segment
    Continuation,
}

impl Sar {
    /// Get the two-bit SAR value
    pub fn value(&self) -> u8 {
        match self {
            Sar::Unsegmented => L2CAP_SAR_UNSEGMENTED,
            Sar::Start => L2CAP_SAR_START,
            Sar::End => L2CAP_SAR_END,
            Sar::Continuation => L2CAP_SAR_CONTINUATION,
        }
    }

    /// Decode a SAR value; only the low two bits are considered
    pub fn from_value(value: u8) -> Self {
        match value & 0x03 {
            L2CAP_SAR_UNSEGMENTED => Sar::Unsegmented,
            L2CAP_SAR_START => Sar::Start,
            L2CAP_SAR_END => Sar::End,
            _ => Sar::Continuation,
        }
    }
}

impl fmt::Display for Sar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsegmented => write!(f, "Unsegmented"),
            Self::Start => write!(f, "Start"),
            Self::End => write!(f, "End"),
            Self::Continuation => write!(f, "Continuation"),
        }
    }
}

/// Flow control mode of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControlMode {
    /// Frames are sent whenever the link has room
    None,
    /// Credit-based flow control
    Credit {
        /// Credits the peer granted us at setup; one per outbound frame
        initial_credits: u16,
        /// Credits we granted the peer at setup; one per inbound frame
        peer_credits: u16,
    },
}

impl FlowControlMode {
    /// Whether this mode counts credits
    pub fn is_credit_based(&self) -> bool {
        matches!(self, FlowControlMode::Credit { .. })
    }
}

/// Kind of channel, which determines scheduling priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Fixed channel (signaling, ATT, SMP...) with implicit configuration
    Fixed,
    /// Dynamically allocated connection-oriented channel
    Dynamic,
}

/// Negotiated configuration of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Maximum SDU size
    pub mtu: u16,
    /// Maximum information bytes per frame
    pub mps: u16,
    /// Flow control mode
    pub flow_control: FlowControlMode,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            mtu: L2CAP_DEFAULT_MTU,
            mps: L2CAP_DEFAULT_MTU,
            flow_control: FlowControlMode::None,
        }
    }
}

impl ChannelConfig {
    /// Create a configuration without flow control; MPS follows MTU up to
    /// the largest frame the length field can describe
    pub fn new(mtu: u16) -> Self {
        Self {
            mtu,
            mps: mtu.min(L2CAP_MAX_MPS),
            flow_control: FlowControlMode::None,
        }
    }

    /// Set the maximum frame payload size
    pub fn with_mps(mut self, mps: u16) -> Self {
        self.mps = mps;
        self
    }

    /// Switch to credit-based flow control
    pub fn with_credits(mut self, initial_credits: u16, peer_credits: u16) -> Self {
        self.flow_control = FlowControlMode::Credit {
            initial_credits,
            peer_credits,
        };
        self
    }

    /// Validates that the parameters are usable for segmentation
    pub fn validate(&self) -> L2capResult<()> {
        if self.mtu < L2CAP_MIN_MTU {
            return Err(L2capError::InvalidParameter(format!(
                "MTU {} below minimum {}",
                self.mtu, L2CAP_MIN_MTU
            )));
        }

        if self.mps == 0 {
            return Err(L2capError::InvalidParameter("MPS must be non-zero".into()));
        }

        if self.mps > L2CAP_MAX_MPS {
            return Err(L2capError::InvalidParameter(format!(
                "MPS {} above maximum {}",
                self.mps, L2CAP_MAX_MPS
            )));
        }

        Ok(())
    }
}
