//! Scoped link adapter
//!
//! A [`Link`] is created when an ACL link comes up. It builds the shared
//! link queue, gives the transport its end exactly once and owns the
//! scheduler for the lifetime of the link. Dropping the link detaches every
//! channel, so teardown happens on every exit path.

use log::info;
use std::fmt;

use super::channel::ChannelHandle;
use super::constants::DEFAULT_LINK_QUEUE_CAPACITY;
use super::data_controller::DataController;
use super::error::L2capResult;
use super::queue::{bidi, BidiQueueEnd};
use super::scheduler::{RoundRobinScheduler, Scheduler, SchedulerConfig, SchedulerStats};
use super::types::ChannelId;

/// Transport end of the link queue: pulls outbound frames, pushes inbound frames
pub type TransportEnd = BidiQueueEnd<Vec<u8>, Vec<u8>>;

/// Link configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// Frames buffered per direction on the shared link queue
    pub link_queue_capacity: usize,
    /// Scheduling policy
    pub scheduler: SchedulerConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            link_queue_capacity: DEFAULT_LINK_QUEUE_CAPACITY,
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// One ACL link and the channels multiplexed over it
pub struct Link {
    scheduler: RoundRobinScheduler,
}

impl Link {
    /// Bring up a link, returning it together with the transport's queue end
    pub fn start(config: LinkConfig) -> (Self, TransportEnd) {
        let capacity = config.link_queue_capacity.max(1);
        let (up, transport) = bidi(capacity, capacity);

        info!("Link started (queue capacity {})", capacity);

        let link = Self {
            scheduler: RoundRobinScheduler::new(up, config.scheduler),
        };

        (link, transport)
    }

    /// Attach a channel to this link
    pub fn attach_channel(&mut self, channel: &ChannelHandle) -> L2capResult<()> {
        self.scheduler.try_attach_channel(channel.cid(), channel)
    }

    /// Detach a channel from this link
    pub fn detach_channel(&mut self, cid: ChannelId) {
        self.scheduler.detach_channel(cid);
    }

    /// Add send credits to a credit-based channel
    pub fn add_credits(&mut self, cid: ChannelId, credits: u16) -> bool {
        self.scheduler.add_credits(cid, credits)
    }

    /// Record credits granted to the peer on a credit-based channel
    pub fn grant_peer_credits(&mut self, cid: ChannelId, credits: u16) -> bool {
        self.scheduler.grant_peer_credits(cid, credits)
    }

    pub fn data_controller(&mut self, cid: ChannelId) -> Option<&mut DataController> {
        self.scheduler.data_controller(cid)
    }

    /// Run one worker iteration.
    ///
    /// Delivers inbound frames, picks up newly queued payloads and fills the
    /// link queue. Returns the number of frames sent.
    pub fn service(&mut self) -> usize {
        self.scheduler.on_fragment_arrived();
        self.scheduler.poll_senders()
    }

    /// The transport drained frames and can take more
    pub fn on_link_ready(&mut self) -> usize {
        self.scheduler.on_link_ready()
    }

    /// The transport pushed frames
    pub fn on_fragment_arrived(&mut self) -> usize {
        self.scheduler.on_fragment_arrived()
    }

    pub fn scheduler(&self) -> &RoundRobinScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut RoundRobinScheduler {
        &mut self.scheduler
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        let stats = self.scheduler.stats();
        self.scheduler.detach_all();
        info!(
            "Link stopped after sending {} and receiving {} frames",
            stats.fragments_sent, stats.frames_received
        );
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
