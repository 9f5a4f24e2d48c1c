//! # Link Codec - Framing for the Inter-Controller Serial Link
//!
//! This module implements the byte-level framing used between the Primary and the
//! Secondary controller. Every frame on the wire has the same shape:
//!
//! ```text
//! +--------+--------+--------+--------+-------- ... --------+--------+--------+
//! | 0xAA   | cmd(1) | len_lo | len_hi | payload (0..255 B)  | sum_lo | sum_hi |
//! +--------+--------+--------+--------+---------------------+--------+--------+
//! ```
//!
//! ## Architecture
//!
//! - **Encoder**: `encode_frame()` builds a complete frame into a fixed-size buffer
//! - **Decoder**: `LinkCodec::feed()` consumes one byte at a time and yields at most one
//!   frame per call, keeping the partial frame between calls
//! - **Statistics**: every drop reason has its own counter, exported through `LinkStatistics`
//!
//! ## Resynchronisation
//!
//! Any malformed field (oversized length, checksum mismatch) sends the decoder back to
//! hunting for the start byte. There is no look-ahead buffering: bytes of a rejected
//! frame are discarded, and the next `0xAA` is treated as a candidate start.
//!
//! ## Zero-copy decoding
//!
//! `feed()` returns a `FrameRef` borrowing the decoder's internal buffer, so payloads
//! that are re-emitted immediately never need to be copied. `feed_message()` decodes the
//! typed command in place and only copies the bytes the command keeps.

use embassy_time::{Duration, Instant};
use heapless::Vec;
use log::log;

use super::command::{CommandCode, LinkMessage};
use super::LinkError;

/// Start-of-frame marker
pub const START_BYTE: u8 = 0xAA;

/// Start byte, command and two length bytes
pub const HEADER_SIZE: usize = 4;

/// Trailing Fletcher-16 checksum
pub const CHECKSUM_SIZE: usize = 2;

/// Largest payload a single frame may carry
pub const MAX_PAYLOAD_SIZE: usize = 255;

/// Largest complete frame: 1 + 1 + 2 + 255 + 2 = 261 bytes
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE + CHECKSUM_SIZE;

/// A complete encoded frame
pub type FrameBuffer = Vec<u8, MAX_FRAME_SIZE>;

/// Payload storage for one frame
pub type PayloadBuffer = Vec<u8, MAX_PAYLOAD_SIZE>;

/// Running Fletcher-16 checksum
///
/// Two running sums modulo 255; the output is `(s2 << 8) | s1`. The checksum of a
/// frame covers the start byte, the command, both length bytes and the payload.
#[derive(Clone, Copy, Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct Fletcher16 {
    s1: u16,
    s2: u16,
}

impl Fletcher16 {
    pub const fn new() -> Self {
        Fletcher16 { s1: 0, s2: 0 }
    }

    pub fn update(&mut self, byte: u8) {
        self.s1 = (self.s1 + byte as u16) % 255;
        self.s2 = (self.s2 + self.s1) % 255;
    }

    pub fn update_slice(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }

    pub fn value(&self) -> u16 {
        (self.s2 << 8) | self.s1
    }
}

/// Computes the Fletcher-16 checksum of a byte slice
///
/// # Example
/// ```rust
/// use uav_dual_relay::link::fletcher16;
///
/// assert_eq!(fletcher16(b"abcde"), 0xC8F0);
/// ```
pub fn fletcher16(data: &[u8]) -> u16 {
    let mut sum = Fletcher16::new();
    sum.update_slice(data);
    sum.value()
}

/// Encodes a command code and raw payload into a complete link frame
///
/// # Arguments
/// * `command` - Raw command byte
/// * `payload` - Payload bytes (at most `MAX_PAYLOAD_SIZE`)
///
/// # Returns
/// * `Ok(FrameBuffer)` - The encoded frame, ready for the serial port
/// * `Err(LinkError::PayloadTooLarge)` - The payload does not fit a frame
pub fn encode_frame(command: u8, payload: &[u8]) -> Result<FrameBuffer, LinkError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(LinkError::PayloadTooLarge(payload.len()));
    }

    let length = payload.len() as u16;
    let mut frame = FrameBuffer::new();
    // Capacity is sized for the largest frame, so the extends below cannot fail
    let _ = frame.extend_from_slice(&[START_BYTE, command]);
    let _ = frame.extend_from_slice(&length.to_le_bytes());
    let _ = frame.extend_from_slice(payload);
    let checksum = fletcher16(&frame);
    let _ = frame.extend_from_slice(&checksum.to_le_bytes());
    Ok(frame)
}

/// A decoded frame borrowing the decoder's payload buffer
#[derive(Clone, Copy)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct FrameRef<'a> {
    pub command: CommandCode,
    pub payload: &'a [u8],
}

impl FrameRef<'_> {
    pub fn to_owned(&self) -> Frame {
        let mut payload = PayloadBuffer::new();
        let _ = payload.extend_from_slice(self.payload);
        Frame {
            command: self.command,
            payload,
        }
    }
}

/// An owned decoded frame
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct Frame {
    pub command: CommandCode,
    pub payload: PayloadBuffer,
}

/// Counters describing the health of the serial link
#[derive(Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct LinkStatistics {
    pub packets_sent: u32,
    pub packets_received: u32,
    pub bytes_sent: u32,
    pub bytes_received: u32,
    pub checksum_errors: u32,
    pub parse_errors: u32,
    pub timeout_errors: u32,
    pub buffer_overflow: u32,
    pub unknown_commands: u32,
}

impl LinkStatistics {
    /// Sum of all receive-side error counters
    pub fn errors(&self) -> u32 {
        self.checksum_errors
            .saturating_add(self.parse_errors)
            .saturating_add(self.timeout_errors)
            .saturating_add(self.buffer_overflow)
            .saturating_add(self.unknown_commands)
    }

    /// `received / (received + errors)`, or 1.0 before any traffic
    pub fn success_rate(&self) -> f32 {
        let total = self.packets_received as u64 + self.errors() as u64;
        if total == 0 {
            return 1.0;
        }
        self.packets_received as f32 / total as f32
    }
}

/// Decoder state, one variant per row of the framing table
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
enum DecoderState {
    SeekStart,
    HaveStart,
    HaveCommand { command: u8 },
    HaveLengthLow { command: u8, low: u8 },
    ReadPayload { command: u8, length: usize },
    HaveChecksumLow { command: u8 },
    HaveChecksumHigh { command: u8, low: u8 },
}

/// Streaming codec for the inter-controller link
///
/// Holds the partially received frame (at most `MAX_FRAME_SIZE` bytes) and the link
/// statistics for both directions.
pub struct LinkCodec {
    state: DecoderState,
    payload: PayloadBuffer,
    running: Fletcher16,
    frame_started_at: Option<Instant>,
    stats: LinkStatistics,
}

impl Default for LinkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkCodec {
    pub const fn new() -> Self {
        LinkCodec {
            state: DecoderState::SeekStart,
            payload: PayloadBuffer::new(),
            running: Fletcher16::new(),
            frame_started_at: None,
            stats: LinkStatistics {
                packets_sent: 0,
                packets_received: 0,
                bytes_sent: 0,
                bytes_received: 0,
                checksum_errors: 0,
                parse_errors: 0,
                timeout_errors: 0,
                buffer_overflow: 0,
                unknown_commands: 0,
            },
        }
    }

    pub fn statistics(&self) -> LinkStatistics {
        self.stats
    }

    /// Returns true while a frame is partially received
    pub fn in_frame(&self) -> bool {
        self.state != DecoderState::SeekStart
    }

    /// Encodes a typed message and accounts for it in the send counters
    pub fn encode_message(&mut self, message: &LinkMessage) -> Result<FrameBuffer, LinkError> {
        let mut payload = PayloadBuffer::new();
        message.encode_payload(&mut payload)?;
        let frame = encode_frame(message.code() as u8, &payload)?;
        self.stats.packets_sent = self.stats.packets_sent.wrapping_add(1);
        self.stats.bytes_sent = self.stats.bytes_sent.wrapping_add(frame.len() as u32);
        Ok(frame)
    }

    fn reset(&mut self) {
        self.state = DecoderState::SeekStart;
        self.payload.clear();
        self.running = Fletcher16::new();
        self.frame_started_at = None;
    }

    /// Feeds one byte, recording its arrival time for the partial-frame timeout
    pub fn feed_at(&mut self, byte: u8, now: Instant) -> Option<FrameRef<'_>> {
        if self.state == DecoderState::SeekStart {
            self.frame_started_at = Some(now);
        }
        self.feed(byte)
    }

    /// Feeds one byte into the decoder
    ///
    /// # Returns
    /// * `Some(FrameRef)` - A complete frame with a valid checksum and a known command
    /// * `None` - More bytes are needed, or the byte completed a rejected frame
    pub fn feed(&mut self, byte: u8) -> Option<FrameRef<'_>> {
        self.stats.bytes_received = self.stats.bytes_received.wrapping_add(1);

        match self.state {
            DecoderState::SeekStart => {
                if byte == START_BYTE {
                    self.payload.clear();
                    self.running = Fletcher16::new();
                    self.running.update(byte);
                    self.state = DecoderState::HaveStart;
                } else {
                    log::trace!("Link decoder dropping byte 0x{:02X} while seeking start", byte);
                }
                None
            }
            DecoderState::HaveStart => {
                self.running.update(byte);
                self.state = DecoderState::HaveCommand { command: byte };
                None
            }
            DecoderState::HaveCommand { command } => {
                self.running.update(byte);
                self.state = DecoderState::HaveLengthLow { command, low: byte };
                None
            }
            DecoderState::HaveLengthLow { command, low } => {
                let length = ((byte as usize) << 8) | low as usize;
                if length > MAX_PAYLOAD_SIZE {
                    log!(log::Level::Debug, "Link frame length {} exceeds maximum, resyncing", length);
                    self.stats.parse_errors = self.stats.parse_errors.wrapping_add(1);
                    self.reset();
                    return None;
                }
                self.running.update(byte);
                self.state = if length == 0 {
                    DecoderState::HaveChecksumLow { command }
                } else {
                    DecoderState::ReadPayload { command, length }
                };
                None
            }
            DecoderState::ReadPayload { command, length } => {
                if self.payload.push(byte).is_err() {
                    self.stats.buffer_overflow = self.stats.buffer_overflow.wrapping_add(1);
                    self.reset();
                    return None;
                }
                self.running.update(byte);
                if self.payload.len() == length {
                    self.state = DecoderState::HaveChecksumLow { command };
                }
                None
            }
            DecoderState::HaveChecksumLow { command } => {
                self.state = DecoderState::HaveChecksumHigh { command, low: byte };
                None
            }
            DecoderState::HaveChecksumHigh { command, low } => {
                let received = u16::from_le_bytes([low, byte]);
                let expected = self.running.value();
                self.state = DecoderState::SeekStart;
                self.frame_started_at = None;

                if received != expected {
                    log!(
                        log::Level::Debug,
                        "Link checksum mismatch: command 0x{:02X}, expected 0x{:04X}, got 0x{:04X}",
                        command,
                        expected,
                        received
                    );
                    self.stats.checksum_errors = self.stats.checksum_errors.wrapping_add(1);
                    self.payload.clear();
                    return None;
                }

                match CommandCode::from_u8(command) {
                    Some(code) => {
                        self.stats.packets_received = self.stats.packets_received.wrapping_add(1);
                        Some(FrameRef {
                            command: code,
                            payload: &self.payload,
                        })
                    }
                    None => {
                        log::warn!("Dropping link frame with unknown command 0x{:02X}", command);
                        self.stats.unknown_commands = self.stats.unknown_commands.wrapping_add(1);
                        self.payload.clear();
                        None
                    }
                }
            }
        }
    }

    /// Feeds one byte and decodes the typed command once a frame completes
    ///
    /// A frame whose payload does not match its command's schema is counted as a
    /// parse error and dropped.
    pub fn feed_message(&mut self, byte: u8, now: Instant) -> Option<LinkMessage> {
        let decoded = {
            let frame = self.feed_at(byte, now)?;
            LinkMessage::decode(frame.command, frame.payload)
        };
        match decoded {
            Ok(message) => Some(message),
            Err(error) => {
                log!(log::Level::Warn, "Dropping malformed link payload: {:?}", error);
                self.stats.parse_errors = self.stats.parse_errors.wrapping_add(1);
                None
            }
        }
    }

    /// Abandons a partial frame that has been stalled for longer than `timeout`
    ///
    /// # Returns
    /// true if a partial frame was discarded
    pub fn poll_timeout(&mut self, now: Instant, timeout: Duration) -> bool {
        if !self.in_frame() {
            return false;
        }
        match self.frame_started_at {
            Some(started) if now.saturating_duration_since(started) > timeout => {
                log::debug!("Link frame timed out after {} ms, resyncing", timeout.as_millis());
                self.stats.timeout_errors = self.stats.timeout_errors.wrapping_add(1);
                self.reset();
                true
            }
            _ => false,
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn decode_all(codec: &mut LinkCodec, bytes: &[u8]) -> std::vec::Vec<Frame> {
        let mut frames = std::vec::Vec::new();
        for &b in bytes {
            if let Some(frame) = codec.feed(b) {
                frames.push(frame.to_owned());
            }
        }
        frames
    }

    #[test]
    fn fletcher16_reference_vectors() {
        assert_eq!(fletcher16(b"abcde"), 0xC8F0);
        assert_eq!(fletcher16(b"abcdef"), 0x2057);
        assert_eq!(fletcher16(b"abcdefgh"), 0x0627);
        assert_eq!(fletcher16(&[]), 0);
    }

    #[test]
    fn encode_layout_matches_wire_format() {
        let frame = encode_frame(CommandCode::RelayActivate as u8, &[1]).unwrap();
        assert_eq!(frame.len(), 7);
        assert_eq!(&frame[..5], &[0xAA, 0x03, 0x01, 0x00, 0x01]);
        let sum = fletcher16(&frame[..5]);
        assert_eq!(&frame[5..], &sum.to_le_bytes());
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let payload = [0u8; 256];
        assert_eq!(encode_frame(0x04, &payload), Err(LinkError::PayloadTooLarge(256)));
    }

    #[test]
    fn decodes_frames_of_every_boundary_size() {
        for len in [0usize, 1, 2, 128, 254, 255] {
            let payload: std::vec::Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let frame = encode_frame(CommandCode::BridgeTx as u8, &payload).unwrap();
            let mut codec = LinkCodec::new();
            let frames = decode_all(&mut codec, &frame);
            assert_eq!(frames.len(), 1, "len {}", len);
            assert_eq!(frames[0].command, CommandCode::BridgeTx);
            assert_eq!(&frames[0].payload[..], &payload[..]);
        }
    }

    #[test]
    fn single_byte_corruption_is_rejected() {
        let frame = encode_frame(CommandCode::RelayTx as u8, &[10, 20, 30, 40, 50]).unwrap();
        // Corrupt each payload byte in turn; the start byte and length are excluded since
        // those are handled by resync and the length check instead.
        for index in 4..frame.len() - 2 {
            let mut corrupted = frame.clone();
            corrupted[index] ^= 0x01;
            let mut codec = LinkCodec::new();
            assert!(decode_all(&mut codec, &corrupted).is_empty());
            assert_eq!(codec.statistics().checksum_errors, 1);
        }
    }

    #[test]
    fn resyncs_after_garbage_prefix() {
        let frame = encode_frame(CommandCode::StatusRequest as u8, &[]).unwrap();
        let mut stream = std::vec![0x00, 0x13, 0x55, 0xFF, 0x7E];
        stream.extend_from_slice(&frame);
        let mut codec = LinkCodec::new();
        let frames = decode_all(&mut codec, &stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, CommandCode::StatusRequest);
    }

    #[test]
    fn oversized_length_counts_parse_error_and_recovers() {
        let good = encode_frame(CommandCode::Ack as u8, &[]).unwrap();
        let mut stream = std::vec![0xAA, 0x04, 0x00, 0x01];
        stream.extend_from_slice(&good);
        let mut codec = LinkCodec::new();
        let frames = decode_all(&mut codec, &stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(codec.statistics().parse_errors, 1);
    }

    #[test]
    fn unknown_command_is_counted_and_dropped() {
        let frame = encode_frame(0x7F, &[1, 2, 3]).unwrap();
        let mut codec = LinkCodec::new();
        assert!(decode_all(&mut codec, &frame).is_empty());
        assert_eq!(codec.statistics().unknown_commands, 1);
        assert_eq!(codec.statistics().packets_received, 0);
    }

    #[test]
    fn back_to_back_frames_decode_in_order() {
        let mut stream = std::vec::Vec::new();
        stream.extend_from_slice(&encode_frame(CommandCode::Ack as u8, &[]).unwrap());
        stream.extend_from_slice(&encode_frame(CommandCode::RelayActivate as u8, &[0]).unwrap());
        stream.extend_from_slice(&encode_frame(CommandCode::StatusRequest as u8, &[]).unwrap());
        let mut codec = LinkCodec::new();
        let frames = decode_all(&mut codec, &stream);
        let commands: std::vec::Vec<CommandCode> = frames.iter().map(|f| f.command).collect();
        assert_eq!(commands, std::vec![CommandCode::Ack, CommandCode::RelayActivate, CommandCode::StatusRequest]);
    }

    #[test]
    fn stalled_partial_frame_times_out() {
        let mut codec = LinkCodec::new();
        let start = Instant::from_millis(100);
        assert!(codec.feed_at(0xAA, start).is_none());
        assert!(codec.feed_at(0x02, start).is_none());
        assert!(!codec.poll_timeout(Instant::from_millis(120), Duration::from_millis(50)));
        assert!(codec.poll_timeout(Instant::from_millis(200), Duration::from_millis(50)));
        assert_eq!(codec.statistics().timeout_errors, 1);
        assert!(!codec.in_frame());
    }

    #[test]
    fn schema_mismatch_counts_parse_error() {
        // RELAY_ACTIVATE carries exactly one byte
        let frame = encode_frame(CommandCode::RelayActivate as u8, &[1, 2]).unwrap();
        let mut codec = LinkCodec::new();
        let now = Instant::from_millis(0);
        let decoded: std::vec::Vec<LinkMessage> = frame.iter().filter_map(|&b| codec.feed_message(b, now)).collect();
        assert!(decoded.is_empty());
        assert_eq!(codec.statistics().parse_errors, 1);
    }

    #[test]
    fn success_rate_reflects_errors() {
        let mut stats = LinkStatistics::default();
        assert_eq!(stats.success_rate(), 1.0);
        stats.packets_received = 3;
        stats.checksum_errors = 1;
        assert!((stats.success_rate() - 0.75).abs() < f32::EPSILON);
    }
}
