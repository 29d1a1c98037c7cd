//! L2CAP Channel implementation
//!
//! This module provides the channel object the scheduler attaches. A channel
//! is owned by a registry outside the scheduler; the scheduler only keeps a
//! weak reference to it and borrows its scheduler-side queue end while the
//! channel is attached.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use super::constants::DEFAULT_CHANNEL_QUEUE_CAPACITY;
use super::error::{L2capError, L2capResult};
use super::packet::{OutboundPayload, PacketBuilder};
use super::queue::{bidi, BidiQueueEnd, QueueFull};
use super::types::{ChannelConfig, ChannelId, ChannelKind};

/// Shared handle to a channel
pub type ChannelHandle = Arc<L2capChannel>;

/// Scheduler side of a channel's queue: delivers SDUs up, drains payloads
pub(crate) type SchedulerEnd = BidiQueueEnd<Vec<u8>, OutboundPayload>;

/// L2CAP Channel structure
pub struct L2capChannel {
    /// Local Channel Identifier (CID)
    cid: ChannelId,
    /// Channel kind
    kind: ChannelKind,
    /// Negotiated configuration
    config: ChannelConfig,
    /// Scheduler end, present while no scheduler holds it
    scheduler_end: Mutex<Option<SchedulerEnd>>,
}

impl L2capChannel {
    /// Create a new channel.
    ///
    /// Returns the shared handle and the user end used by the upper layer
    /// to queue outbound payloads and collect reassembled SDUs.
    pub fn new(
        cid: ChannelId,
        kind: ChannelKind,
        config: ChannelConfig,
        queue_capacity: usize,
    ) -> (ChannelHandle, ChannelUserEnd) {
        let (user, scheduler) = bidi::<OutboundPayload, Vec<u8>>(queue_capacity, queue_capacity);

        let channel = Arc::new(Self {
            cid,
            kind,
            config,
            scheduler_end: Mutex::new(Some(scheduler)),
        });

        let user_end = ChannelUserEnd {
            cid,
            mtu: config.mtu,
            end: user,
        };

        (channel, user_end)
    }

    /// Create a new fixed channel with the implicit default configuration
    pub fn new_fixed(cid: ChannelId) -> (ChannelHandle, ChannelUserEnd) {
        Self::new(
            cid,
            ChannelKind::Fixed,
            ChannelConfig::default(),
            DEFAULT_CHANNEL_QUEUE_CAPACITY,
        )
    }

    /// Create a new dynamic channel with a negotiated configuration
    pub fn new_dynamic(cid: ChannelId, config: ChannelConfig) -> (ChannelHandle, ChannelUserEnd) {
        Self::new(cid, ChannelKind::Dynamic, config, DEFAULT_CHANNEL_QUEUE_CAPACITY)
    }

    /// Get the Channel Identifier (CID)
    pub fn cid(&self) -> ChannelId {
        self.cid
    }

    /// Get the channel kind
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Check if the channel is fixed
    pub fn is_fixed(&self) -> bool {
        self.kind == ChannelKind::Fixed
    }

    /// Get the negotiated configuration
    pub fn config(&self) -> ChannelConfig {
        self.config
    }

    /// Whether a scheduler currently holds this channel's queue end
    pub fn is_attached(&self) -> bool {
        self.scheduler_end
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Hand the scheduler end to the caller; only one holder at a time
    pub(crate) fn take_scheduler_end(&self) -> L2capResult<SchedulerEnd> {
        self.scheduler_end
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(L2capError::QueueEndInUse(self.cid))
    }

    /// Give the scheduler end back after detach
    pub(crate) fn restore_scheduler_end(&self, end: SchedulerEnd) {
        *self
            .scheduler_end
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(end);
    }
}

impl fmt::Debug for L2capChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("L2capChannel")
            .field("cid", &self.cid)
            .field("kind", &self.kind)
            .field("config", &self.config)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Upper-layer end of a channel
pub struct ChannelUserEnd {
    cid: ChannelId,
    mtu: u16,
    end: BidiQueueEnd<OutboundPayload, Vec<u8>>,
}

impl ChannelUserEnd {
    /// Get the Channel Identifier (CID)
    pub fn cid(&self) -> ChannelId {
        self.cid
    }

    /// Queue a payload for transmission.
    ///
    /// Fails immediately when the payload exceeds the MTU or the outbound
    /// queue is full; never blocks.
    pub fn send<B>(&self, payload: B) -> L2capResult<()>
    where
        B: PacketBuilder + Send + 'static,
    {
        let size = payload.size();
        if size > self.mtu as usize {
            return Err(L2capError::MtuExceeded {
                size,
                mtu: self.mtu,
            });
        }

        self.end
            .try_enqueue(Box::new(payload))
            .map_err(|QueueFull(_)| L2capError::QueueFull)
    }

    /// Take the next reassembled SDU, if any
    pub fn receive(&self) -> Option<Vec<u8>> {
        self.end.try_dequeue()
    }

    /// Number of reassembled SDUs waiting to be received
    pub fn pending(&self) -> usize {
        self.end.pending()
    }
}

impl fmt::Debug for ChannelUserEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelUserEnd")
            .field("cid", &self.cid)
            .field("mtu", &self.mtu)
            .field("pending", &self.pending())
            .finish()
    }
}
