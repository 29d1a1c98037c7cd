//! Per-channel segmentation and reassembly
//!
//! A [`DataController`] turns outbound SDUs into link frames and inbound
//! frames back into SDUs for exactly one channel. Inbound frames come from
//! an untrusted peer: anything malformed is dropped, counted and followed by
//! a reset of the reassembly state so the next SDU starts clean.

use log::{debug, trace, warn};
use std::fmt;

use super::constants::*;
use super::error::ReassemblyError;
use super::packet::{encode_frame, FrameBody, L2capControlField};
use super::queue::{QueueFull, QueueProducer};
use super::types::{ChannelConfig, ChannelId, FlowControlMode, Sar};

/// One frame produced by [`DataController::segment`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Encoded frame, ready for the link queue
    pub frame: Vec<u8>,
    /// Whether this frame carried the last bytes of the payload
    pub exhausted: bool,
}

/// Diagnostic counters; never used for control flow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataControllerStats {
    /// Frames produced by segmentation
    pub frames_segmented: u64,
    /// SDUs pushed into the channel's inbound queue
    pub sdus_delivered: u64,
    /// SDUs dropped because the inbound queue was full
    pub sdus_dropped_backpressure: u64,
    /// Inbound frames dropped as malformed
    pub frames_dropped_malformed: u64,
}

/// Reassembly state machine
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReassemblyState {
    Idle,
    Accumulating { sdu_length: usize, buffer: Vec<u8> },
}

/// Segmentation and reassembly for one channel
pub struct DataController {
    cid: ChannelId,
    config: ChannelConfig,
    /// Producer side of the channel's inbound queue
    inbound: QueueProducer<Vec<u8>>,
    /// Bytes of the current outbound payload already segmented
    tx_offset: usize,
    /// TxSeq for the next outbound frame
    next_tx_seq: u8,
    /// TxSeq expected on the next inbound frame
    expected_tx_seq: u8,
    state: ReassemblyState,
    /// Credits granted to the peer; `None` without credit-based flow control
    peer_credits: Option<u16>,
    stats: DataControllerStats,
}

impl DataController {
    /// Create a data controller delivering SDUs into `inbound`
    pub fn new(cid: ChannelId, config: ChannelConfig, inbound: QueueProducer<Vec<u8>>) -> Self {
        let peer_credits = match config.flow_control {
            FlowControlMode::None => None,
            FlowControlMode::Credit { peer_credits, .. } => Some(peer_credits),
        };

        Self {
            cid,
            config,
            inbound,
            tx_offset: 0,
            next_tx_seq: 0,
            expected_tx_seq: 0,
            state: ReassemblyState::Idle,
            peer_credits,
            stats: DataControllerStats::default(),
        }
    }

    /// Get the Channel Identifier (CID)
    pub fn cid(&self) -> ChannelId {
        self.cid
    }

    /// Maximum SDU size accepted on reassembly
    pub fn mtu(&self) -> u16 {
        self.config.mtu
    }

    /// Maximum information bytes per frame
    pub fn mps(&self) -> u16 {
        self.config.mps
    }

    pub fn stats(&self) -> DataControllerStats {
        self.stats
    }

    /// Whether an SDU is partially reassembled
    pub fn is_reassembling(&self) -> bool {
        matches!(self.state, ReassemblyState::Accumulating { .. })
    }

    /// Whether segmentation stopped partway through a payload
    pub fn is_segmenting(&self) -> bool {
        self.tx_offset != 0
    }

    /// Credits remaining for the peer, if the channel counts credits
    pub fn peer_credits(&self) -> Option<u16> {
        self.peer_credits
    }

    /// Record credits granted to the peer by the signaling layer
    pub fn grant_peer_credits(&mut self, credits: u16) {
        match self.peer_credits.as_mut() {
            Some(remaining) => *remaining = remaining.saturating_add(credits),
            None => warn!(
                "Ignoring peer credit grant on channel {:#06x} without flow control",
                self.cid
            ),
        }
    }

    /// Produce the next frame of `payload`.
    ///
    /// Repeated calls with the same payload walk through it; once the last
    /// frame is returned (`exhausted`) the cursor resets for the next
    /// payload.
    pub fn segment(&mut self, payload: &[u8]) -> Segment {
        let mps = self.config.mps.clamp(1, L2CAP_MAX_MPS) as usize;
        let start = self.tx_offset.min(payload.len());
        let end = (start + mps).min(payload.len());
        let exhausted = end == payload.len();

        let (sar, sdu_length) = match (start == 0, exhausted) {
            (true, true) => (Sar::Unsegmented, None),
            // SDU length is bounded by the MTU, a u16
            (true, false) => (Sar::Start, Some(payload.len() as u16)),
            (false, true) => (Sar::End, None),
            (false, false) => (Sar::Continuation, None),
        };

        let control = L2capControlField::new_i_frame(self.next_tx_seq, sar);
        let frame = encode_frame(self.cid, control, sdu_length, &payload[start..end]);

        self.next_tx_seq = (self.next_tx_seq + 1) % L2CAP_SEQ_MODULUS;
        self.tx_offset = if exhausted { 0 } else { end };
        self.stats.frames_segmented += 1;

        trace!(
            "Channel {:#06x} segmented {} frame, bytes {}..{} of {}",
            self.cid,
            sar,
            start,
            end,
            payload.len()
        );

        Segment { frame, exhausted }
    }

    /// Abandon the payload currently being segmented
    pub fn reset_segmentation(&mut self) {
        self.tx_offset = 0;
    }

    /// Feed one inbound frame body (everything after the basic header).
    ///
    /// Returns the SDU once the final segment arrives. Malformed input is
    /// dropped and leaves the state machine idle.
    pub fn reassemble(&mut self, body: &[u8]) -> Option<Vec<u8>> {
        match self.try_reassemble(body) {
            Ok(sdu) => sdu,
            Err(err) => {
                warn!(
                    "Dropping malformed frame on channel {:#06x}: {}",
                    self.cid, err
                );
                trace!("Malformed frame body: {}", hex::encode(body));
                self.stats.frames_dropped_malformed += 1;
                self.reset_reassembly();
                None
            }
        }
    }

    /// Reassemble `body` and push any completed SDU into the inbound queue.
    ///
    /// A full inbound queue drops the SDU. Returns whether an SDU was
    /// delivered.
    pub fn on_frame(&mut self, body: &[u8]) -> bool {
        let Some(sdu) = self.reassemble(body) else {
            return false;
        };

        match self.inbound.try_enqueue(sdu) {
            Ok(()) => {
                self.stats.sdus_delivered += 1;
                true
            }
            Err(QueueFull(sdu)) => {
                debug!(
                    "Inbound queue of channel {:#06x} is full, dropping {} byte SDU",
                    self.cid,
                    sdu.len()
                );
                self.stats.sdus_dropped_backpressure += 1;
                false
            }
        }
    }

    /// Discard any partially reassembled SDU
    pub fn reset_reassembly(&mut self) {
        self.state = ReassemblyState::Idle;
    }

    /// Tear down, returning the channel's inbound producer
    pub(crate) fn into_inbound(self) -> QueueProducer<Vec<u8>> {
        self.inbound
    }

    fn try_reassemble(&mut self, body: &[u8]) -> Result<Option<Vec<u8>>, ReassemblyError> {
        let frame = FrameBody::parse(body)?;

        // The peer's TxSeq advanced even if this frame gets dropped below
        let received = frame.control.tx_seq;
        let expected = self.expected_tx_seq;
        self.expected_tx_seq = (received + 1) % L2CAP_SEQ_MODULUS;
        if received != expected {
            return Err(ReassemblyError::OutOfSequence { expected, received });
        }

        if let Some(remaining) = self.peer_credits.as_mut() {
            if *remaining == 0 {
                return Err(ReassemblyError::CreditUnderflow);
            }
            *remaining -= 1;
        }

        let mps = self.config.mps;
        if frame.information.len() > mps as usize {
            return Err(ReassemblyError::OversizedFragment {
                size: frame.information.len(),
                mps,
            });
        }

        let mtu = self.config.mtu;
        let state = std::mem::replace(&mut self.state, ReassemblyState::Idle);

        match (frame.control.sar, state) {
            (Sar::Unsegmented, ReassemblyState::Idle) => {
                if frame.information.len() > mtu as usize {
                    return Err(ReassemblyError::SduTooLarge {
                        length: frame.information.len(),
                        mtu,
                    });
                }
                Ok(Some(frame.information.to_vec()))
            }
            (Sar::Start, ReassemblyState::Idle) => {
                let sdu_length = frame.sdu_length.unwrap_or_default() as usize;
                if sdu_length > mtu as usize {
                    return Err(ReassemblyError::SduTooLarge {
                        length: sdu_length,
                        mtu,
                    });
                }
                // A Start frame must leave something for an End frame
                if frame.information.len() >= sdu_length {
                    return Err(ReassemblyError::LengthMismatch {
                        declared: sdu_length,
                        assembled: frame.information.len(),
                    });
                }

                let mut buffer = Vec::with_capacity(sdu_length);
                buffer.extend_from_slice(frame.information);
                self.state = ReassemblyState::Accumulating { sdu_length, buffer };
                Ok(None)
            }
            (Sar::Continuation, ReassemblyState::Accumulating { sdu_length, mut buffer }) => {
                let assembled = buffer.len() + frame.information.len();
                if assembled >= sdu_length {
                    return Err(ReassemblyError::LengthMismatch {
                        declared: sdu_length,
                        assembled,
                    });
                }

                buffer.extend_from_slice(frame.information);
                self.state = ReassemblyState::Accumulating { sdu_length, buffer };
                Ok(None)
            }
            (Sar::End, ReassemblyState::Accumulating { sdu_length, mut buffer }) => {
                let assembled = buffer.len() + frame.information.len();
                if assembled != sdu_length {
                    return Err(ReassemblyError::LengthMismatch {
                        declared: sdu_length,
                        assembled,
                    });
                }

                buffer.extend_from_slice(frame.information);
                Ok(Some(buffer))
            }
            (Sar::Unsegmented | Sar::Start, ReassemblyState::Accumulating { .. }) => {
                Err(ReassemblyError::UnexpectedStart)
            }
            (Sar::Continuation | Sar::End, ReassemblyState::Idle) => {
                Err(ReassemblyError::UnexpectedContinuation)
            }
        }
    }
}

impl fmt::Debug for DataController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataController")
            .field("cid", &self.cid)
            .field("config", &self.config)
            .field("reassembling", &self.is_reassembling())
            .field("tx_offset", &self.tx_offset)
            .field("peer_credits", &self.peer_credits)
            .field("stats", &self.stats)
            .finish()
    }
}
