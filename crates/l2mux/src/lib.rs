//! l2mux - L2CAP outgoing-packet scheduling over a single ACL link
//!
//! This library multiplexes many logical L2CAP channels over one shared link
//! queue. It provides:
//! - A scheduler that picks which channel supplies the next fragment
//! - Per-channel senders enforcing credit-based flow control
//! - Per-channel data controllers for segmentation and reassembly
//! - A scoped link adapter that owns the shared link queue
//!
//! Channel establishment signaling and the HCI transport are external
//! collaborators; they only meet this crate through the queues in [`queue`].

pub mod channel;
pub mod constants;
pub mod data_controller;
pub mod error;
pub mod link;
pub mod packet;
pub mod queue;
pub mod scheduler;
pub mod sender;
pub mod types;


// Re-export common types for convenience
pub use channel::{ChannelHandle, ChannelUserEnd, L2capChannel};
pub use data_controller::{DataController, DataControllerStats, Segment};
pub use error::{L2capError, L2capResult, ReassemblyError};
pub use link::{Link, LinkConfig, TransportEnd};
pub use packet::{OutboundPayload, PacketBuilder, RawBuilder};
pub use scheduler::{
    NullScheduler, RoundRobinScheduler, Scheduler, SchedulerConfig, SchedulerStats,
};
pub use sender::Sender;
pub use types::{ChannelConfig, ChannelId, ChannelKind, FlowControlMode, Sar};
