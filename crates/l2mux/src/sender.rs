//! Per-channel outbound adapter
//!
//! A [`Sender`] drains one channel's outbound queue on behalf of the
//! scheduler. It keeps the payload currently being segmented, enforces the
//! credit budget of credit-based channels and reports readiness transitions
//! so the scheduler knows which channels to consider.

use log::{debug, warn};
use std::fmt;

use super::data_controller::DataController;
use super::packet::OutboundPayload;
use super::queue::QueueConsumer;
use super::types::{ChannelConfig, ChannelId, FlowControlMode};

/// Outbound side of one attached channel
pub struct Sender {
    cid: ChannelId,
    mtu: u16,
    /// Consumer side of the channel's outbound queue
    outbound: QueueConsumer<OutboundPayload>,
    /// Serialized payload being segmented
    current: Option<Vec<u8>>,
    /// Remaining credits; `None` without credit-based flow control
    credits: Option<u16>,
    /// Whether readiness has been reported since the sender last ran dry
    reported_ready: bool,
}

impl Sender {
    /// Create a sender draining `outbound`
    pub fn new(
        cid: ChannelId,
        config: ChannelConfig,
        outbound: QueueConsumer<OutboundPayload>,
    ) -> Self {
        let credits = match config.flow_control {
            FlowControlMode::None => None,
            FlowControlMode::Credit { initial_credits, .. } => Some(initial_credits),
        };

        Self {
            cid,
            mtu: config.mtu,
            outbound,
            current: None,
            credits,
            reported_ready: false,
        }
    }

    /// Get the Channel Identifier (CID)
    pub fn cid(&self) -> ChannelId {
        self.cid
    }

    /// Remaining credits, if the channel counts credits
    pub fn credits(&self) -> Option<u16> {
        self.credits
    }

    /// Payloads waiting, including one partially segmented
    pub fn queue_depth(&self) -> usize {
        self.outbound.len() + usize::from(self.current.is_some())
    }

    /// Whether `produce_next_fragment` would be allowed to emit a frame
    pub fn has_fragment_ready(&self) -> bool {
        self.ready_estimate() > 0
    }

    /// Number of frames this sender expects to supply right now
    pub fn ready_estimate(&self) -> usize {
        let depth = self.queue_depth();
        match self.credits {
            Some(credits) => depth.min(credits as usize),
            None => depth,
        }
    }

    /// Report a transition to ready.
    ///
    /// Returns the estimated frame count the first time the sender is found
    /// ready after being idle; `None` otherwise.
    pub fn poll_ready(&mut self) -> Option<usize> {
        let ready = self.ready_estimate();
        if ready == 0 {
            self.reported_ready = false;
            return None;
        }

        if self.reported_ready {
            return None;
        }

        self.reported_ready = true;
        Some(ready)
    }

    /// Add credits granted by the peer.
    ///
    /// Returns a fresh readiness estimate when the new credits let the
    /// sender emit frames.
    pub fn add_credits(&mut self, credits: u16) -> Option<usize> {
        let Some(remaining) = self.credits.as_mut() else {
            warn!(
                "Ignoring credits for channel {:#06x} without flow control",
                self.cid
            );
            return None;
        };

        *remaining = remaining.saturating_add(credits);
        debug!("Channel {:#06x} now has {} credits", self.cid, remaining);

        self.reported_ready = false;
        self.poll_ready()
    }

    /// Produce the next frame for the link queue.
    ///
    /// Returns `None` when nothing is queued or no credits are left.
    pub fn produce_next_fragment(
        &mut self,
        data_controller: &mut DataController,
    ) -> Option<Vec<u8>> {
        if self.credits == Some(0) {
            self.reported_ready = false;
            return None;
        }

        if self.current.is_none() {
            self.current = self.next_payload();
        }

        let Some(payload) = self.current.as_deref() else {
            self.reported_ready = false;
            return None;
        };

        let segment = data_controller.segment(payload);
        if segment.exhausted {
            self.current = None;
        }

        if let Some(remaining) = self.credits.as_mut() {
            *remaining -= 1;
        }

        if self.ready_estimate() == 0 {
            self.reported_ready = false;
        }

        Some(segment.frame)
    }

    /// Drop the current payload and everything still queued
    pub fn discard(&mut self, data_controller: &mut DataController) -> usize {
        let dropped = self.outbound.clear() + usize::from(self.current.take().is_some());
        data_controller.reset_segmentation();
        self.reported_ready = false;
        dropped
    }

    /// Tear down, returning the channel's outbound consumer
    pub(crate) fn into_outbound(self) -> QueueConsumer<OutboundPayload> {
        self.outbound
    }

    fn next_payload(&mut self) -> Option<Vec<u8>> {
        loop {
            let builder = self.outbound.try_dequeue()?;
            let bytes = builder.to_vec();

            if bytes.len() > self.mtu as usize {
                warn!(
                    "Dropping {} byte payload on channel {:#06x}: exceeds MTU {}",
                    bytes.len(),
                    self.cid,
                    self.mtu
                );
                continue;
            }

            return Some(bytes);
        }
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("cid", &self.cid)
            .field("queue_depth", &self.queue_depth())
            .field("credits", &self.credits)
            .field("reported_ready", &self.reported_ready)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{route, FrameBody};
    use crate::queue::{bounded, QueueProducer};

    struct Fixture {
        sender: Sender,
        dc: DataController,
        outbound: QueueProducer<OutboundPayload>,
    }

    fn fixture(config: ChannelConfig) -> Fixture {
        let (outbound, consumer) = bounded(8);
        let (inbound, _) = bounded(8);

        Fixture {
            sender: Sender::new(0x0040, config, consumer),
            dc: DataController::new(0x0040, config, inbound),
            outbound,
        }
    }

    fn queue(fixture: &Fixture, payload: Vec<u8>) {
        let boxed: OutboundPayload = Box::new(payload);
        assert!(fixture.outbound.try_enqueue(boxed).is_ok());
    }

    #[test]
    fn test_empty_queue_is_not_ready() {
        let mut f = fixture(ChannelConfig::default());

        assert!(!f.sender.has_fragment_ready());
        assert_eq!(f.sender.poll_ready(), None);
        assert_eq!(f.sender.produce_next_fragment(&mut f.dc), None);
    }

    #[test]
    fn test_ready_reported_once_per_transition() {
        let mut f = fixture(ChannelConfig::default());

        queue(&f, vec![1]);
        queue(&f, vec![2]);
        assert_eq!(f.sender.poll_ready(), Some(2));
        assert_eq!(f.sender.poll_ready(), None);

        assert!(f.sender.produce_next_fragment(&mut f.dc).is_some());
        assert!(f.sender.produce_next_fragment(&mut f.dc).is_some());
        assert_eq!(f.sender.poll_ready(), None);

        // Queue refills after running dry
        queue(&f, vec![3]);
        assert_eq!(f.sender.poll_ready(), Some(1));
    }

    #[test]
    fn test_multi_fragment_payload_stays_current() {
        let mut f = fixture(ChannelConfig::default().with_mps(4));

        queue(&f, (0..10).collect());
        assert_eq!(f.sender.queue_depth(), 1);

        let mut frames = Vec::new();
        while let Some(frame) = f.sender.produce_next_fragment(&mut f.dc) {
            frames.push(frame);
        }

        assert_eq!(frames.len(), 3);
        assert_eq!(f.sender.queue_depth(), 0);

        let last = FrameBody::parse(route(&frames[2]).unwrap().1).unwrap();
        assert_eq!(last.information, &[8, 9]);
    }

    #[test]
    fn test_zero_credits_blocks_sending() {
        let mut f = fixture(ChannelConfig::default().with_credits(0, 0));

        queue(&f, vec![1]);
        assert!(!f.sender.has_fragment_ready());
        assert_eq!(f.sender.poll_ready(), None);
        assert_eq!(f.sender.produce_next_fragment(&mut f.dc), None);

        assert_eq!(f.sender.add_credits(3), Some(1));
        assert!(f.sender.produce_next_fragment(&mut f.dc).is_some());
        assert_eq!(f.sender.credits(), Some(2));
    }

    #[test]
    fn test_credits_bound_emitted_fragments() {
        let mut f = fixture(ChannelConfig::default().with_mps(2).with_credits(0, 0));

        queue(&f, vec![0; 20]);
        f.sender.add_credits(3);

        let mut emitted = 0;
        while f.sender.produce_next_fragment(&mut f.dc).is_some() {
            emitted += 1;
        }

        assert_eq!(emitted, 3);
        assert_eq!(f.sender.credits(), Some(0));
        assert!(f.dc.is_segmenting());
    }

    #[test]
    fn test_credits_ignored_without_flow_control() {
        let mut f = fixture(ChannelConfig::default());

        assert_eq!(f.sender.add_credits(5), None);
        assert_eq!(f.sender.credits(), None);
    }

    #[test]
    fn test_oversized_payload_skipped() {
        let mut f = fixture(ChannelConfig::new(30));

        queue(&f, vec![0; 31]);
        queue(&f, vec![7; 3]);

        let frame = f.sender.produce_next_fragment(&mut f.dc).unwrap();
        let body = FrameBody::parse(route(&frame).unwrap().1).unwrap();
        assert_eq!(body.information, &[7, 7, 7]);
    }

    #[test]
    fn test_discard_drops_everything() {
        let mut f = fixture(ChannelConfig::default().with_mps(2));

        queue(&f, vec![0; 10]);
        queue(&f, vec![1; 10]);
        f.sender.produce_next_fragment(&mut f.dc);

        assert_eq!(f.sender.discard(&mut f.dc), 2);
        assert_eq!(f.sender.queue_depth(), 0);
        assert!(!f.dc.is_segmenting());
        assert_eq!(f.sender.produce_next_fragment(&mut f.dc), None);
    }
}
