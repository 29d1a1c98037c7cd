//! L2CAP frame handling
//!
//! This module provides the on-link frame layout used by the scheduler:
//! a basic header, an I-frame control field, an optional SDU length and the
//! information payload. It also defines the builders channels use to queue
//! outbound payloads.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

use super::constants::*;
use super::error::ReassemblyError;
use super::types::{ChannelId, Sar};

/// L2CAP Packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2capHeader {
    /// Length of the L2CAP payload in bytes
    pub length: u16,
    /// Channel Identifier
    pub channel_id: ChannelId,
}

impl L2capHeader {
    /// Create a new L2CAP header
    pub fn new(length: u16, channel_id: ChannelId) -> Self {
        Self { length, channel_id }
    }

    /// Parse an L2CAP header from raw bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < L2CAP_BASIC_HEADER_SIZE {
            return None;
        }

        let mut cursor = Cursor::new(data);
        let length = cursor.read_u16::<LittleEndian>().ok()?;
        let channel_id = cursor.read_u16::<LittleEndian>().ok()?;

        Some(Self { length, channel_id })
    }

    /// Serialize the header to bytes
    pub fn to_bytes(&self) -> [u8; L2CAP_BASIC_HEADER_SIZE] {
        let mut result = [0u8; L2CAP_BASIC_HEADER_SIZE];

        LittleEndian::write_u16(&mut result[0..2], self.length);
        LittleEndian::write_u16(&mut result[2..4], self.channel_id);

        result
    }
}

/// Control field of an information frame (I-frame)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2capControlField {
    /// TxSeq number
    pub tx_seq: u8,
    /// ReqSeq number; not used by this layer and always written as 0
    pub req_seq: u8,
    /// Segmentation and Reassembly marker
    pub sar: Sar,
}

impl L2capControlField {
    /// Create a new control field for an Information frame (I-frame)
    pub fn new_i_frame(tx_seq: u8, sar: Sar) -> Self {
        Self {
            tx_seq: tx_seq % L2CAP_SEQ_MODULUS,
            req_seq: 0,
            sar,
        }
    }

    /// Parse the control field from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self, ReassemblyError> {
        if data.len() < L2CAP_CONTROL_FIELD_SIZE {
            return Err(ReassemblyError::Truncated);
        }

        let control = LittleEndian::read_u16(&data[..L2CAP_CONTROL_FIELD_SIZE]);

        if control & L2CAP_CTRL_FRAME_TYPE_MASK != 0 {
            return Err(ReassemblyError::SupervisoryFrame);
        }

        Ok(Self {
            tx_seq: ((control & L2CAP_CTRL_TXSEQ_MASK) >> L2CAP_CTRL_TXSEQ_SHIFT) as u8,
            req_seq: ((control & L2CAP_CTRL_REQSEQ_MASK) >> L2CAP_CTRL_REQSEQ_SHIFT) as u8,
            sar: Sar::from_value(((control & L2CAP_CTRL_SAR_MASK) >> L2CAP_CTRL_SAR_SHIFT) as u8),
        })
    }

    /// Convert the control field to a u16 value
    pub fn to_u16(&self) -> u16 {
        let mut control: u16 = 0;

        control |= (self.tx_seq as u16) << L2CAP_CTRL_TXSEQ_SHIFT;
        control |= ((self.req_seq as u16) << L2CAP_CTRL_REQSEQ_SHIFT) & L2CAP_CTRL_REQSEQ_MASK;
        control |= (self.sar.value() as u16) << L2CAP_CTRL_SAR_SHIFT;

        control
    }

    /// Serialize the control field to bytes
    pub fn to_bytes(&self) -> [u8; L2CAP_CONTROL_FIELD_SIZE] {
        let mut result = [0u8; L2CAP_CONTROL_FIELD_SIZE];
        LittleEndian::write_u16(&mut result, self.to_u16());
        result
    }
}

/// Borrowed view of a frame body (everything after the basic header)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBody<'a> {
    /// Control field
    pub control: L2capControlField,
    /// Total SDU length, present on Start frames only
    pub sdu_length: Option<u16>,
    /// Information payload
    pub information: &'a [u8],
}

impl<'a> FrameBody<'a> {
    /// Parse a frame body
    pub fn parse(body: &'a [u8]) -> Result<Self, ReassemblyError> {
        let control = L2capControlField::parse(body)?;
        let rest = &body[L2CAP_CONTROL_FIELD_SIZE..];

        if control.sar != Sar::Start {
            return Ok(Self {
                control,
                sdu_length: None,
                information: rest,
            });
        }

        if rest.len() < L2CAP_SDU_LENGTH_FIELD_SIZE {
            return Err(ReassemblyError::Truncated);
        }

        Ok(Self {
            control,
            sdu_length: Some(LittleEndian::read_u16(&rest[..L2CAP_SDU_LENGTH_FIELD_SIZE])),
            information: &rest[L2CAP_SDU_LENGTH_FIELD_SIZE..],
        })
    }
}

/// Encode a complete frame ready for the link queue
pub fn encode_frame(
    channel_id: ChannelId,
    control: L2capControlField,
    sdu_length: Option<u16>,
    information: &[u8],
) -> Vec<u8> {
    let sdu_field = if sdu_length.is_some() { L2CAP_SDU_LENGTH_FIELD_SIZE } else { 0 };
    let body_length = L2CAP_CONTROL_FIELD_SIZE + sdu_field + information.len();
    let mut result = Vec::with_capacity(L2CAP_BASIC_HEADER_SIZE + body_length);

    // Information is bounded by MPS (u16), so the body always fits
    result.extend_from_slice(&L2capHeader::new(body_length as u16, channel_id).to_bytes());
    result.extend_from_slice(&control.to_bytes());

    if let Some(length) = sdu_length {
        let mut field = [0u8; L2CAP_SDU_LENGTH_FIELD_SIZE];
        LittleEndian::write_u16(&mut field, length);
        result.extend_from_slice(&field);
    }

    result.extend_from_slice(information);

    result
}

/// Default inbound router: read the channel ID from the basic header.
///
/// Returns the channel and the frame body, or `None` when the header is
/// missing or its length field disagrees with the frame size.
pub fn route(frame: &[u8]) -> Option<(ChannelId, &[u8])> {
    let header = L2capHeader::parse(frame)?;
    let body = &frame[L2CAP_BASIC_HEADER_SIZE..];

    if body.len() != header.length as usize {
        return None;
    }

    Some((header.channel_id, body))
}

/// A lazily serialized outbound message
pub trait PacketBuilder {
    /// Number of bytes `serialize` will append
    fn size(&self) -> usize;

    /// Append the serialized bytes to `out`
    fn serialize(&self, out: &mut Vec<u8>);

    /// Serialize into a fresh buffer
    fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        self.serialize(&mut out);
        out
    }
}

/// Payload type queued by channels for transmission
pub type OutboundPayload = Box<dyn PacketBuilder + Send>;

impl PacketBuilder for Vec<u8> {
    fn size(&self) -> usize {
        self.len()
    }

    fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl PacketBuilder for &'static [u8] {
    fn size(&self) -> usize {
        self.len()
    }

    fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

/// Builder assembling a payload from little-endian fields and raw bytes
#[derive(Debug, Clone, Default)]
pub struct RawBuilder {
    bytes: Vec<u8>,
}

impl RawBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single octet
    pub fn add_u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    /// Append a little-endian u16
    pub fn add_u16(&mut self, value: u16) -> &mut Self {
        let mut field = [0u8; 2];
        LittleEndian::write_u16(&mut field, value);
        self.bytes.extend_from_slice(&field);
        self
    }

    /// Append a little-endian u32
    pub fn add_u32(&mut self, value: u32) -> &mut Self {
        let mut field = [0u8; 4];
        LittleEndian::write_u32(&mut field, value);
        self.bytes.extend_from_slice(&field);
        self
    }

    /// Append raw octets
    pub fn add_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(data);
        self
    }
}

impl PacketBuilder for RawBuilder {
    fn size(&self) -> usize {
        self.bytes.len()
    }

    fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2cap_header() {
        let header = L2capHeader::new(10, 0x0040);

        let bytes = header.to_bytes();
        assert_eq!(bytes, [0x0A, 0x00, 0x40, 0x00]);

        let parsed = L2capHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);

        // Too short to hold a header
        assert!(L2capHeader::parse(&bytes[..3]).is_none());
    }

    #[test]
    fn test_control_field_layout() {
        let control = L2capControlField::new_i_frame(5, Sar::Start);
        // TxSeq in bits 1..=6, SAR in bits 14..=15
        assert_eq!(control.to_u16(), (5 << 1) | (1 << 14));

        let parsed = L2capControlField::parse(&control.to_bytes()).unwrap();
        assert_eq!(parsed.tx_seq, 5);
        assert_eq!(parsed.sar, Sar::Start);

        // TxSeq wraps at 64
        assert_eq!(L2capControlField::new_i_frame(65, Sar::End).tx_seq, 1);
    }

    #[test]
    fn test_supervisory_frame_rejected() {
        assert_eq!(
            L2capControlField::parse(&[0x01, 0x00]),
            Err(ReassemblyError::SupervisoryFrame)
        );
        assert_eq!(L2capControlField::parse(&[0x00]), Err(ReassemblyError::Truncated));
    }

    #[test]
    fn test_encode_start_frame() {
        let control = L2capControlField::new_i_frame(0, Sar::Start);
        let frame = encode_frame(0x0041, control, Some(300), &[1, 2, 3]);

        // header(4) + control(2) + sdu length(2) + information(3)
        assert_eq!(frame.len(), 11);
        assert_eq!(&frame[0..4], &[7, 0, 0x41, 0]);
        assert_eq!(&frame[6..8], &300u16.to_le_bytes());

        let (cid, body) = route(&frame).unwrap();
        assert_eq!(cid, 0x0041);

        let parsed = FrameBody::parse(body).unwrap();
        assert_eq!(parsed.sdu_length, Some(300));
        assert_eq!(parsed.information, &[1, 2, 3]);
    }

    #[test]
    fn test_route_rejects_length_mismatch() {
        let control = L2capControlField::new_i_frame(0, Sar::Unsegmented);
        let mut frame = encode_frame(0x0040, control, None, &[9, 9]);
        frame.push(0xFF);

        assert!(route(&frame).is_none());
        assert!(route(&[0x01]).is_none());
    }

    #[test]
    fn test_truncated_start_frame() {
        let control = L2capControlField::new_i_frame(0, Sar::Start);
        let mut body = control.to_bytes().to_vec();
        body.push(0x10);

        assert_eq!(FrameBody::parse(&body), Err(ReassemblyError::Truncated));
    }

    #[test]
    fn test_raw_builder() {
        let mut builder = RawBuilder::new();
        builder.add_u8(0x12).add_u16(0x3456).add_bytes(&[0xAA]);

        assert_eq!(builder.size(), 4);
        assert_eq!(builder.to_vec(), vec![0x12, 0x56, 0x34, 0xAA]);
    }
}
