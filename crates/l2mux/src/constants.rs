//! L2CAP constants
//!
//! Header sizes, control field layout and default channel parameters.

/// Size of the basic L2CAP header (length + channel ID)
pub const L2CAP_BASIC_HEADER_SIZE: usize = 4;
/// Size of the I-frame control field
pub const L2CAP_CONTROL_FIELD_SIZE: usize = 2;
/// Size of the SDU length field carried by Start frames
pub const L2CAP_SDU_LENGTH_FIELD_SIZE: usize = 2;

// Control field layout
pub const L2CAP_CTRL_FRAME_TYPE_MASK: u16 = 0x0001;
pub const L2CAP_CTRL_TXSEQ_MASK: u16 = 0x007E;
pub const L2CAP_CTRL_TXSEQ_SHIFT: u16 = 1;
pub const L2CAP_CTRL_REQSEQ_MASK: u16 = 0x3F00;
pub const L2CAP_CTRL_REQSEQ_SHIFT: u16 = 8;
pub const L2CAP_CTRL_SAR_MASK: u16 = 0xC000;
pub const L2CAP_CTRL_SAR_SHIFT: u16 = 14;

/// TxSeq numbers wrap at this modulus
pub const L2CAP_SEQ_MODULUS: u8 = 64;

// Segmentation and Reassembly (SAR) values
pub const L2CAP_SAR_UNSEGMENTED: u8 = 0;
pub const L2CAP_SAR_START: u8 = 1;
pub const L2CAP_SAR_END: u8 = 2;
pub const L2CAP_SAR_CONTINUATION: u8 = 3;

/// Largest MPS whose Start frame length still fits the u16 length field
pub const L2CAP_MAX_MPS: u16 =
    u16::MAX - (L2CAP_CONTROL_FIELD_SIZE + L2CAP_SDU_LENGTH_FIELD_SIZE) as u16;

/// Default MTU for BR/EDR channels, also used for fixed channels
pub const L2CAP_DEFAULT_MTU: u16 = 672;
/// Minimum MTU a channel may be configured with
pub const L2CAP_MIN_MTU: u16 = 23;

// Fixed channel identifiers
pub const L2CAP_SIGNALING_CID: u16 = 0x0001;
pub const L2CAP_CONNECTIONLESS_CID: u16 = 0x0002;
pub const L2CAP_ATTRIBUTE_PROTOCOL_CID: u16 = 0x0004;
pub const L2CAP_LE_SIGNALING_CID: u16 = 0x0005;
pub const L2CAP_SECURITY_MANAGER_CID: u16 = 0x0006;

/// Default capacity of a channel's queues (payloads per direction)
pub const DEFAULT_CHANNEL_QUEUE_CAPACITY: usize = 10;
/// Default capacity of the shared link queue (frames per direction)
pub const DEFAULT_LINK_QUEUE_CAPACITY: usize = 16;
