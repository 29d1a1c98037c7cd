//! Outgoing-packet scheduling across channels
//!
//! The scheduler owns the link end of the shared ACL queue and, for every
//! attached channel, a [`Sender`] and a [`DataController`]. Each time the
//! link can take one more frame it picks a ready channel, asks that
//! channel's sender for its next frame and pushes it down. Inbound frames
//! travel the other way: they are routed by channel ID to the matching data
//! controller, or dropped when no channel is attached under that ID.

use log::{debug, error, info, trace, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::Weak;

use super::channel::{ChannelHandle, L2capChannel};
use super::data_controller::DataController;
use super::error::{L2capError, L2capResult};
use super::packet;
use super::queue::{BidiQueueEnd, QueueFull};
use super::sender::Sender;
use super::types::{ChannelId, ChannelKind};

/// Scheduler end of the shared link queue: frames go down, frames come up
pub type LinkQueueUpEnd = BidiQueueEnd<Vec<u8>, Vec<u8>>;

/// Channel attachment and outbound scheduling
pub trait Scheduler {
    /// Attach a channel; attaching an already attached CID is a logged no-op
    fn attach_channel(&mut self, cid: ChannelId, channel: &ChannelHandle);

    /// Detach a channel, dropping its in-flight data; unknown CIDs are ignored
    fn detach_channel(&mut self, cid: ChannelId);

    /// Hint from a sender that `number_packets` frames can be dequeued
    fn on_packets_ready(&mut self, cid: ChannelId, number_packets: usize);

    /// Data controller used to reassemble frames received for `cid`
    fn data_controller(&mut self, cid: ChannelId) -> Option<&mut DataController>;
}

/// Scheduler that accepts nothing and schedules nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullScheduler;

impl Scheduler for NullScheduler {
    fn attach_channel(&mut self, _cid: ChannelId, _channel: &ChannelHandle) {}

    fn detach_channel(&mut self, _cid: ChannelId) {}

    fn on_packets_ready(&mut self, _cid: ChannelId, _number_packets: usize) {}

    fn data_controller(&mut self, _cid: ChannelId) -> Option<&mut DataController> {
        None
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Serve ready fixed channels before any dynamic channel
    pub fixed_channel_priority: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fixed_channel_priority: true,
        }
    }
}

/// Diagnostic counters; never used for control flow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Frames pushed onto the link queue
    pub fragments_sent: u64,
    /// Frames taken from the link queue
    pub frames_received: u64,
    /// Inbound frames whose header could not be parsed
    pub frames_unroutable: u64,
    /// Inbound frames for a CID with no attached channel
    pub frames_unknown_channel: u64,
    /// Ready channels that had nothing to send when asked
    pub empty_dequeues: u64,
}

struct AttachedChannel {
    /// Non-owning reference; the registry owns the channel
    channel: Weak<L2capChannel>,
    kind: ChannelKind,
    sender: Sender,
    data_controller: DataController,
}

/// Last channel served in each rotation
#[derive(Debug, Default, Clone, Copy)]
struct Rotation {
    fixed: Option<ChannelId>,
    dynamic: Option<ChannelId>,
    all: Option<ChannelId>,
}

/// Round-robin scheduler over attached channels in CID order.
///
/// With `fixed_channel_priority` set, ready fixed channels are always served
/// before dynamic ones, each class rotating independently.
pub struct RoundRobinScheduler {
    link: LinkQueueUpEnd,
    config: SchedulerConfig,
    channels: BTreeMap<ChannelId, AttachedChannel>,
    /// Readiness hints per channel; always re-checked against the sender
    ready: BTreeMap<ChannelId, usize>,
    rotation: Rotation,
    stats: SchedulerStats,
}

impl RoundRobinScheduler {
    /// Create a scheduler feeding `link`
    pub fn new(link: LinkQueueUpEnd, config: SchedulerConfig) -> Self {
        Self {
            link,
            config,
            channels: BTreeMap::new(),
            ready: BTreeMap::new(),
            rotation: Rotation::default(),
            stats: SchedulerStats::default(),
        }
    }

    /// Attach a channel, reporting why it could not be attached
    pub fn try_attach_channel(
        &mut self,
        cid: ChannelId,
        channel: &ChannelHandle,
    ) -> L2capResult<()> {
        if self.channels.contains_key(&cid) {
            return Err(L2capError::AlreadyAttached(cid));
        }

        if channel.cid() != cid {
            return Err(L2capError::InvalidParameter(format!(
                "Channel handle carries CID {:#06x}, attached as {:#06x}",
                channel.cid(),
                cid
            )));
        }

        let config = channel.config();
        config.validate()?;

        let (inbound, outbound) = channel.take_scheduler_end()?.into_parts();
        let mut sender = Sender::new(cid, config, outbound);
        let ready = sender.poll_ready();

        self.channels.insert(
            cid,
            AttachedChannel {
                channel: ChannelHandle::downgrade(channel),
                kind: channel.kind(),
                sender,
                data_controller: DataController::new(cid, config, inbound),
            },
        );

        info!(
            "Attached {:?} channel {:#06x} (MTU {}, MPS {}, {:?})",
            channel.kind(),
            cid,
            config.mtu,
            config.mps,
            config.flow_control
        );

        // Payloads queued before attach
        if let Some(number_packets) = ready {
            self.on_packets_ready(cid, number_packets);
        }

        Ok(())
    }

    /// Detach a channel, reporting unknown CIDs
    pub fn try_detach_channel(&mut self, cid: ChannelId) -> L2capResult<()> {
        if !self.channels.contains_key(&cid) {
            return Err(L2capError::ChannelNotFound(cid));
        }

        self.detach_channel(cid);
        Ok(())
    }

    /// Detach every channel
    pub fn detach_all(&mut self) {
        let cids: Vec<ChannelId> = self.channels.keys().copied().collect();
        for cid in cids {
            self.detach_channel(cid);
        }
    }

    /// CIDs of all attached channels, in scheduling order
    pub fn attached_cids(&self) -> Vec<ChannelId> {
        self.channels.keys().copied().collect()
    }

    pub fn is_attached(&self, cid: ChannelId) -> bool {
        self.channels.contains_key(&cid)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Remaining send credits of a credit-based channel
    pub fn credits(&self, cid: ChannelId) -> Option<u16> {
        self.channels.get(&cid).and_then(|entry| entry.sender.credits())
    }

    /// Add send credits granted by the peer. Returns false for unknown CIDs.
    pub fn add_credits(&mut self, cid: ChannelId, credits: u16) -> bool {
        let Some(entry) = self.channels.get_mut(&cid) else {
            warn!("Credits for unknown channel {:#06x}", cid);
            return false;
        };

        if let Some(number_packets) = entry.sender.add_credits(credits) {
            self.on_packets_ready(cid, number_packets);
        }

        true
    }

    /// Record credits granted to the peer. Returns false for unknown CIDs.
    pub fn grant_peer_credits(&mut self, cid: ChannelId, credits: u16) -> bool {
        match self.channels.get_mut(&cid) {
            Some(entry) => {
                entry.data_controller.grant_peer_credits(credits);
                true
            }
            None => {
                warn!("Peer credit grant for unknown channel {:#06x}", cid);
                false
            }
        }
    }

    /// Collect readiness from every sender and send what the link accepts.
    ///
    /// Channels whose handle was dropped by the registry are detached.
    /// Returns the number of frames sent.
    pub fn poll_senders(&mut self) -> usize {
        let dead: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|(_, entry)| entry.channel.strong_count() == 0)
            .map(|(cid, _)| *cid)
            .collect();

        for cid in dead {
            info!("Channel {:#06x} was released by its owner, detaching", cid);
            self.detach_channel(cid);
        }

        let transitions: Vec<(ChannelId, usize)> = self
            .channels
            .iter_mut()
            .filter_map(|(cid, entry)| entry.sender.poll_ready().map(|n| (*cid, n)))
            .collect();

        for (cid, number_packets) in transitions {
            self.record_ready(cid, number_packets);
        }

        self.send_ready_fragments()
    }

    /// The link can accept frames again. Returns the number of frames sent.
    pub fn on_link_ready(&mut self) -> usize {
        self.send_ready_fragments()
    }

    /// Frames arrived on the link. Returns the number of frames processed.
    pub fn on_fragment_arrived(&mut self) -> usize {
        let mut processed = 0;

        while let Some(frame) = self.link.try_dequeue() {
            processed += 1;
            self.stats.frames_received += 1;
            self.route_inbound(&frame);
        }

        processed
    }

    fn route_inbound(&mut self, frame: &[u8]) {
        let Some((cid, body)) = packet::route(frame) else {
            warn!("Dropping unroutable frame of {} bytes", frame.len());
            trace!("Unroutable frame: {}", hex::encode(frame));
            self.stats.frames_unroutable += 1;
            return;
        };

        match self.channels.get_mut(&cid) {
            Some(entry) => {
                entry.data_controller.on_frame(body);
            }
            None => {
                debug!("Dropping frame for unattached channel {:#06x}", cid);
                self.stats.frames_unknown_channel += 1;
            }
        }
    }

    fn record_ready(&mut self, cid: ChannelId, number_packets: usize) {
        if !self.channels.contains_key(&cid) {
            debug!("Readiness for unattached channel {:#06x} ignored", cid);
            return;
        }

        if number_packets == 0 {
            return;
        }

        trace!("Channel {:#06x} has {} frames ready", cid, number_packets);
        self.ready.insert(cid, number_packets);
    }

    fn send_ready_fragments(&mut self) -> usize {
        let mut sent = 0;

        while self.link.has_capacity() {
            let Some(cid) = self.select_next() else {
                break;
            };

            let Some(entry) = self.channels.get_mut(&cid) else {
                self.ready.remove(&cid);
                continue;
            };

            let Some(frame) = entry.sender.produce_next_fragment(&mut entry.data_controller) else {
                // Benign: the hint was stale
                trace!("Channel {:#06x} had nothing to send", cid);
                self.stats.empty_dequeues += 1;
                self.ready.remove(&cid);
                continue;
            };

            let kind = entry.kind;
            let remaining = match self.ready.get(&cid) {
                Some(&hint) if hint > 1 => hint - 1,
                _ => entry.sender.ready_estimate(),
            };

            if remaining == 0 {
                self.ready.remove(&cid);
            } else {
                self.ready.insert(cid, remaining);
            }
            self.advance_rotation(cid, kind);

            if let Err(QueueFull(frame)) = self.link.try_enqueue(frame) {
                error!(
                    "Link queue rejected a {} byte frame from channel {:#06x}",
                    frame.len(),
                    cid
                );
                break;
            }

            trace!("Sent frame for channel {:#06x}", cid);
            self.stats.fragments_sent += 1;
            sent += 1;
        }

        sent
    }

    fn select_next(&self) -> Option<ChannelId> {
        if !self.config.fixed_channel_priority {
            return self.next_in_rotation(self.rotation.all, None);
        }

        self.next_in_rotation(self.rotation.fixed, Some(ChannelKind::Fixed))
            .or_else(|| self.next_in_rotation(self.rotation.dynamic, Some(ChannelKind::Dynamic)))
    }

    /// First ready channel after `last` in CID order, wrapping around
    fn next_in_rotation(
        &self,
        last: Option<ChannelId>,
        kind: Option<ChannelKind>,
    ) -> Option<ChannelId> {
        let eligible = |cid: &ChannelId| match kind {
            Some(kind) => self.channels.get(cid).is_some_and(|entry| entry.kind == kind),
            None => self.channels.contains_key(cid),
        };

        let after = last.map_or(Bound::Unbounded, Bound::Excluded);

        self.ready
            .range((after, Bound::Unbounded))
            .map(|(cid, _)| *cid)
            .find(|cid| eligible(cid))
            .or_else(|| self.ready.keys().copied().find(|cid| eligible(cid)))
    }

    fn advance_rotation(&mut self, cid: ChannelId, kind: ChannelKind) {
        self.rotation.all = Some(cid);
        match kind {
            ChannelKind::Fixed => self.rotation.fixed = Some(cid),
            ChannelKind::Dynamic => self.rotation.dynamic = Some(cid),
        }
    }
}

impl Scheduler for RoundRobinScheduler {
    fn attach_channel(&mut self, cid: ChannelId, channel: &ChannelHandle) {
        if let Err(err) = self.try_attach_channel(cid, channel) {
            warn!("Cannot attach channel {:#06x}: {}", cid, err);
        }
    }

    fn detach_channel(&mut self, cid: ChannelId) {
        let Some(entry) = self.channels.remove(&cid) else {
            debug!("Detach of unattached channel {:#06x} ignored", cid);
            return;
        };
        self.ready.remove(&cid);

        let AttachedChannel {
            channel,
            mut sender,
            mut data_controller,
            ..
        } = entry;

        let dropped = sender.discard(&mut data_controller);
        if data_controller.is_reassembling() {
            debug!("Discarding partial SDU on channel {:#06x}", cid);
        }

        let end = BidiQueueEnd::from_parts(data_controller.into_inbound(), sender.into_outbound());
        if let Some(channel) = channel.upgrade() {
            channel.restore_scheduler_end(end);
        }

        info!(
            "Detached channel {:#06x}, dropped {} queued payloads",
            cid, dropped
        );
    }

    fn on_packets_ready(&mut self, cid: ChannelId, number_packets: usize) {
        self.record_ready(cid, number_packets);
        self.send_ready_fragments();
    }

    fn data_controller(&mut self, cid: ChannelId) -> Option<&mut DataController> {
        self.channels
            .get_mut(&cid)
            .map(|entry| &mut entry.data_controller)
    }
}

impl Drop for RoundRobinScheduler {
    fn drop(&mut self) {
        self.detach_all();
    }
}

impl fmt::Debug for RoundRobinScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundRobinScheduler")
            .field("config", &self.config)
            .field("channels", &self.attached_cids())
            .field("ready", &self.ready)
            .field("rotation", &self.rotation)
            .field("stats", &self.stats)
            .finish()
    }
}
