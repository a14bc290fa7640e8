//! Binary frame header and envelope.
//!
//! Wire layout (all integers big-endian):
//!
//! ```text
//! byte 0   version (4 bits)        | header size in 4-byte words (4 bits)
//! byte 1   message type (4 bits)   | type-specific flags (4 bits)
//! byte 2   serialization (4 bits)  | compression (4 bits)
//! byte 3   reserved (0x00)
//! ...      (header words - 1) * 4 extension bytes
//! [i32]    sequence number, only when the flags say so
//! u32      payload length
//! ...      payload
//! ```
//!
//! Error frames replace the sequence/length/payload body with
//! `u32 code | u32 message length | message`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::core::error::{StreamError, StreamResult};

/// Protocol version carried in the high nibble of byte 0.
pub const PROTOCOL_VERSION: u8 = 0b0001;

/// Header size used for every frame this crate emits (one 4-byte word).
pub const DEFAULT_HEADER_WORDS: u8 = 1;

/// Size of a header word in bytes.
const HEADER_WORD_SIZE: usize = 4;

/// Largest header-size value representable in the 4-bit field.
const MAX_HEADER_WORDS: u8 = 0x0f;

// =============================================================================
// Header fields
// =============================================================================

/// Message type nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Initial configuration frame sent by the client.
    FullClientRequest,
    /// Outbound audio chunk.
    AudioOnlyRequest,
    /// Structured (JSON) result sent by the recognition service.
    FullServerResponse,
    /// Inbound synthesized audio, or a bare acknowledgment.
    AudioOnlyResponse,
    /// Frontend / server event.
    FrontendResponse,
    /// Error reported by the server.
    Error,
}

impl MessageType {
    pub fn from_code(code: u8) -> StreamResult<Self> {
        match code {
            0x1 => Ok(Self::FullClientRequest),
            0x2 => Ok(Self::AudioOnlyRequest),
            0x9 => Ok(Self::FullServerResponse),
            0xb => Ok(Self::AudioOnlyResponse),
            0xc => Ok(Self::FrontendResponse),
            0xf => Ok(Self::Error),
            other => Err(StreamError::ProtocolError(format!(
                "Unknown message type {other:#x}"
            ))),
        }
    }

    #[inline]
    pub fn code(self) -> u8 {
        match self {
            Self::FullClientRequest => 0x1,
            Self::AudioOnlyRequest => 0x2,
            Self::FullServerResponse => 0x9,
            Self::AudioOnlyResponse => 0xb,
            Self::FrontendResponse => 0xc,
            Self::Error => 0xf,
        }
    }

    #[inline]
    pub fn is_audio_only(self) -> bool {
        matches!(self, Self::AudioOnlyRequest | Self::AudioOnlyResponse)
    }
}

/// Type-specific flags nibble. Decides whether a sequence field follows the
/// header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceFlag {
    /// No sequence field.
    None,
    /// Positive sequence number present.
    Positive,
    /// Last message from the server, negative sequence present.
    LastNegative,
    /// Negative sequence present; sent by the client to end its stream.
    Negative,
}

impl SequenceFlag {
    pub fn from_code(code: u8) -> StreamResult<Self> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Positive),
            2 => Ok(Self::LastNegative),
            3 => Ok(Self::Negative),
            other => Err(StreamError::ProtocolError(format!(
                "Unknown message type specific flags {other:#x}"
            ))),
        }
    }

    #[inline]
    pub fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Positive => 1,
            Self::LastNegative => 2,
            Self::Negative => 3,
        }
    }

    #[inline]
    pub fn has_sequence(self) -> bool {
        !matches!(self, Self::None)
    }

    #[inline]
    pub fn expects_negative(self) -> bool {
        matches!(self, Self::LastNegative | Self::Negative)
    }
}

/// Payload serialization nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Serialization {
    /// Raw bytes (audio).
    #[default]
    None,
    Json,
}

impl Serialization {
    pub fn from_code(code: u8) -> StreamResult<Self> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Json),
            other => Err(StreamError::UnsupportedEncoding {
                kind: "serialization",
                code: other,
            }),
        }
    }

    #[inline]
    pub fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Json => 1,
        }
    }
}

/// Payload compression nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    pub fn from_code(code: u8) -> StreamResult<Self> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Gzip),
            other => Err(StreamError::UnsupportedEncoding {
                kind: "compression",
                code: other,
            }),
        }
    }

    #[inline]
    pub fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Gzip => 1,
        }
    }
}

/// Decoded 4-byte header (plus the size of any discarded extension).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub header_words: u8,
    pub message_type: MessageType,
    pub flags: SequenceFlag,
    pub serialization: Serialization,
    pub compression: Compression,
    pub reserved: u8,
}

impl FrameHeader {
    pub fn new(
        message_type: MessageType,
        flags: SequenceFlag,
        serialization: Serialization,
        compression: Compression,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            header_words: DEFAULT_HEADER_WORDS,
            message_type,
            flags,
            serialization,
            compression,
            reserved: 0,
        }
    }

    /// Emit `words - 1` zeroed extension words after the fixed header.
    pub fn with_extension_words(mut self, words: u8) -> Self {
        self.header_words = words.clamp(DEFAULT_HEADER_WORDS, MAX_HEADER_WORDS);
        self
    }

    /// Total header length in bytes, extension included.
    #[inline]
    pub fn len(&self) -> usize {
        self.header_words as usize * HEADER_WORD_SIZE
    }

    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8((self.version << 4) | (self.header_words & 0x0f));
        buf.put_u8((self.message_type.code() << 4) | self.flags.code());
        buf.put_u8((self.serialization.code() << 4) | self.compression.code());
        buf.put_u8(self.reserved);
        buf.put_bytes(0, self.len() - HEADER_WORD_SIZE);
    }

    fn parse(data: &[u8]) -> StreamResult<Self> {
        if data.len() < HEADER_WORD_SIZE {
            return Err(StreamError::MalformedFrame(format!(
                "Frame of {} bytes is shorter than the fixed header",
                data.len()
            )));
        }

        let version = data[0] >> 4;
        let header_words = data[0] & 0x0f;
        if header_words == 0 {
            return Err(StreamError::MalformedFrame(
                "Header size field is zero".to_string(),
            ));
        }
        let header_len = header_words as usize * HEADER_WORD_SIZE;
        if data.len() < header_len {
            return Err(StreamError::MalformedFrame(format!(
                "Header declares {header_len} bytes but frame has {}",
                data.len()
            )));
        }
        if version != PROTOCOL_VERSION {
            return Err(StreamError::ProtocolError(format!(
                "Unsupported protocol version {version}"
            )));
        }

        Ok(Self {
            version,
            header_words,
            message_type: MessageType::from_code(data[1] >> 4)?,
            flags: SequenceFlag::from_code(data[1] & 0x0f)?,
            serialization: Serialization::from_code(data[2] >> 4)?,
            compression: Compression::from_code(data[2] & 0x0f)?,
            reserved: data[3],
        })
    }
}

// =============================================================================
// Frame
// =============================================================================

/// Body following the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    /// Length-prefixed payload, still compressed as the header says.
    Payload(Bytes),
    /// Error code and (possibly compressed) message.
    Error { code: u32, message: Bytes },
}

/// One complete protocol unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub sequence: Option<i32>,
    pub body: FrameBody,
}

impl Frame {
    /// Build a data frame, checking that the sequence agrees with the flags.
    pub fn new(
        message_type: MessageType,
        flags: SequenceFlag,
        serialization: Serialization,
        compression: Compression,
        sequence: Option<i32>,
        payload: Bytes,
    ) -> StreamResult<Self> {
        if message_type == MessageType::Error {
            return Err(StreamError::ProtocolError(
                "Error frames must be built with Frame::error".to_string(),
            ));
        }

        match (flags.has_sequence(), sequence) {
            (false, None) => {}
            (true, Some(seq)) => {
                if flags.expects_negative() && seq >= 0 {
                    return Err(StreamError::ProtocolError(format!(
                        "Flags {flags:?} require a negative sequence, got {seq}"
                    )));
                }
                if flags == SequenceFlag::Positive && seq <= 0 {
                    return Err(StreamError::ProtocolError(format!(
                        "Flags {flags:?} require a positive sequence, got {seq}"
                    )));
                }
            }
            (true, None) => {
                return Err(StreamError::ProtocolError(format!(
                    "Flags {flags:?} require a sequence number"
                )));
            }
            (false, Some(seq)) => {
                return Err(StreamError::ProtocolError(format!(
                    "Sequence {seq} given but flags carry no sequence field"
                )));
            }
        }

        Ok(Self {
            header: FrameHeader::new(message_type, flags, serialization, compression),
            sequence,
            body: FrameBody::Payload(payload),
        })
    }

    /// Build an error frame. The message must already be compressed as
    /// `compression` says.
    pub fn error(code: u32, message: Bytes, compression: Compression) -> Self {
        Self {
            header: FrameHeader::new(
                MessageType::Error,
                SequenceFlag::None,
                Serialization::None,
                compression,
            ),
            sequence: None,
            body: FrameBody::Error { code, message },
        }
    }

    #[inline]
    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }

    /// Payload bytes (error message bytes for error frames).
    pub fn payload(&self) -> &Bytes {
        match &self.body {
            FrameBody::Payload(payload) => payload,
            FrameBody::Error { message, .. } => message,
        }
    }

    /// Error frames and negative-sequence frames end a stream direction.
    pub fn is_terminal(&self) -> bool {
        self.header.message_type == MessageType::Error
            || self.sequence.is_some_and(|seq| seq < 0)
    }

    /// A flags-0 audio-only frame with nothing in it.
    pub fn is_bare_ack(&self) -> bool {
        self.header.message_type.is_audio_only()
            && self.header.flags == SequenceFlag::None
            && self.payload().is_empty()
    }

    /// Serialize the frame to wire bytes.
    pub fn encode(&self) -> Bytes {
        let body_len = match &self.body {
            FrameBody::Payload(payload) => 8 + payload.len(),
            FrameBody::Error { message, .. } => 8 + message.len(),
        };
        let mut buf = BytesMut::with_capacity(self.header.len() + body_len);
        self.header.write_to(&mut buf);

        match &self.body {
            FrameBody::Payload(payload) => {
                if let Some(seq) = self.sequence {
                    buf.put_i32(seq);
                }
                buf.put_u32(payload.len() as u32);
                buf.put_slice(payload);
            }
            FrameBody::Error { code, message } => {
                buf.put_u32(*code);
                buf.put_u32(message.len() as u32);
                buf.put_slice(message);
            }
        }

        buf.freeze()
    }

    /// Parse wire bytes. Extension header words are skipped; the payload is
    /// sliced out of `data` without copying.
    pub fn decode(data: Bytes) -> StreamResult<Self> {
        let header = FrameHeader::parse(&data)?;
        let mut buf = data.slice(header.len()..);

        if header.message_type == MessageType::Error {
            if buf.remaining() < 8 {
                return Err(StreamError::MalformedFrame(format!(
                    "Error frame body of {} bytes is missing code or length",
                    buf.remaining()
                )));
            }
            let code = buf.get_u32();
            let message = take_exact(&mut buf, "error message")?;
            return Ok(Self {
                header,
                sequence: None,
                body: FrameBody::Error { code, message },
            });
        }

        let sequence = if header.flags.has_sequence() {
            if buf.remaining() < 4 {
                return Err(StreamError::MalformedFrame(
                    "Flags announce a sequence number but the frame ends".to_string(),
                ));
            }
            Some(buf.get_i32())
        } else {
            None
        };

        // Bare audio-only acks may omit the length field entirely.
        if !buf.has_remaining()
            && header.message_type.is_audio_only()
            && header.flags == SequenceFlag::None
        {
            return Ok(Self {
                header,
                sequence,
                body: FrameBody::Payload(Bytes::new()),
            });
        }

        let payload = take_exact(&mut buf, "payload")?;
        Ok(Self {
            header,
            sequence,
            body: FrameBody::Payload(payload),
        })
    }
}

/// Read a u32 length and exactly that many trailing bytes.
fn take_exact(buf: &mut Bytes, what: &str) -> StreamResult<Bytes> {
    if buf.remaining() < 4 {
        return Err(StreamError::MalformedFrame(format!(
            "Missing {what} length field"
        )));
    }
    let declared = buf.get_u32() as usize;
    let available = buf.remaining();
    if declared > available {
        return Err(StreamError::MalformedFrame(format!(
            "Declared {what} length {declared} exceeds remaining {available} bytes"
        )));
    }
    if declared < available {
        return Err(StreamError::MalformedFrame(format!(
            "{} trailing bytes after {what} of declared length {declared}",
            available - declared
        )));
    }
    Ok(buf.split_to(declared))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_header_bytes() {
        let frame = Frame::new(
            MessageType::FullClientRequest,
            SequenceFlag::Positive,
            Serialization::Json,
            Compression::Gzip,
            Some(1),
            Bytes::from_static(b"{}"),
        )
        .unwrap();

        let wire = frame.encode();
        assert_eq!(&wire[..4], &[0x11, 0x11, 0x11, 0x00]);
        assert_eq!(&wire[4..8], &1i32.to_be_bytes());
        assert_eq!(&wire[8..12], &2u32.to_be_bytes());
        assert_eq!(&wire[12..], b"{}");
    }

    #[test]
    fn test_synthesis_submit_header_matches_default_header() {
        let frame = Frame::new(
            MessageType::FullClientRequest,
            SequenceFlag::None,
            Serialization::Json,
            Compression::Gzip,
            None,
            Bytes::new(),
        )
        .unwrap();
        assert_eq!(&frame.encode()[..4], b"\x11\x10\x11\x00");
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let cases = [
            (
                MessageType::AudioOnlyRequest,
                SequenceFlag::Positive,
                Serialization::None,
                Compression::Gzip,
                Some(7),
                Bytes::from_static(&[1, 2, 3, 4]),
            ),
            (
                MessageType::AudioOnlyRequest,
                SequenceFlag::Negative,
                Serialization::None,
                Compression::None,
                Some(-5),
                Bytes::new(),
            ),
            (
                MessageType::FullServerResponse,
                SequenceFlag::LastNegative,
                Serialization::Json,
                Compression::None,
                Some(-1),
                Bytes::from_static(br#"{"result":{"text":"hi"}}"#),
            ),
            (
                MessageType::FrontendResponse,
                SequenceFlag::None,
                Serialization::Json,
                Compression::None,
                None,
                Bytes::from_static(b"{}"),
            ),
        ];

        for (message_type, flags, serialization, compression, sequence, payload) in cases {
            let frame = Frame::new(
                message_type,
                flags,
                serialization,
                compression,
                sequence,
                payload,
            )
            .unwrap();
            let decoded = Frame::decode(frame.encode()).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn test_error_frame_round_trip() {
        let frame = Frame::error(45000001, Bytes::from_static(b"boom"), Compression::None);
        let decoded = Frame::decode(frame.encode()).unwrap();
        assert_eq!(decoded, frame);
        assert!(decoded.is_terminal());
    }

    #[test]
    fn test_extension_words_are_skipped() {
        let mut frame = Frame::new(
            MessageType::AudioOnlyResponse,
            SequenceFlag::Positive,
            Serialization::None,
            Compression::None,
            Some(3),
            Bytes::from_static(b"pcm"),
        )
        .unwrap();
        frame.header = frame.header.with_extension_words(3);

        let wire = frame.encode();
        assert_eq!(wire[0], 0x13);
        assert_eq!(wire.len(), 12 + 4 + 4 + 3);

        let decoded = Frame::decode(wire).unwrap();
        assert_eq!(decoded.header.header_words, 3);
        assert_eq!(decoded.sequence, Some(3));
        assert_eq!(decoded.payload().as_ref(), b"pcm");
    }

    #[test]
    fn test_non_zero_extension_bytes_are_discarded() {
        let mut wire = vec![0x12, 0xb1, 0x00, 0x00, 0xde, 0xad, 0xbe, 0xef];
        wire.extend_from_slice(&9i32.to_be_bytes());
        wire.extend_from_slice(&2u32.to_be_bytes());
        wire.extend_from_slice(b"ok");

        let frame = Frame::decode(Bytes::from(wire)).unwrap();
        assert_eq!(frame.sequence, Some(9));
        assert_eq!(frame.payload().as_ref(), b"ok");
    }

    #[test]
    fn test_truncated_payload_is_malformed() {
        let mut wire = vec![0x11, 0xb1, 0x00, 0x00];
        wire.extend_from_slice(&1i32.to_be_bytes());
        wire.extend_from_slice(&100u32.to_be_bytes());
        wire.extend_from_slice(&[0u8; 10]);

        let err = Frame::decode(Bytes::from(wire)).unwrap_err();
        assert!(matches!(err, StreamError::MalformedFrame(msg) if msg.contains("exceeds")));
    }

    #[test]
    fn test_header_shorter_than_declared_is_malformed() {
        let err = Frame::decode(Bytes::from_static(&[0x14, 0xb0, 0x00, 0x00, 0x00])).unwrap_err();
        assert!(matches!(err, StreamError::MalformedFrame(_)));

        let err = Frame::decode(Bytes::from_static(&[0x10, 0xb0, 0x00, 0x00])).unwrap_err();
        assert!(matches!(err, StreamError::MalformedFrame(_)));

        let err = Frame::decode(Bytes::from_static(&[0x11, 0xb0])).unwrap_err();
        assert!(matches!(err, StreamError::MalformedFrame(_)));
    }

    #[test]
    fn test_unknown_encoding_codes() {
        let err = Frame::decode(Bytes::from_static(&[0x11, 0xb0, 0xf0, 0x00])).unwrap_err();
        assert_eq!(
            err,
            StreamError::UnsupportedEncoding {
                kind: "serialization",
                code: 0xf
            }
        );

        let err = Frame::decode(Bytes::from_static(&[0x11, 0xb0, 0x0f, 0x00])).unwrap_err();
        assert_eq!(
            err,
            StreamError::UnsupportedEncoding {
                kind: "compression",
                code: 0xf
            }
        );
    }

    #[test]
    fn test_unknown_message_type_is_protocol_error() {
        let err = Frame::decode(Bytes::from_static(&[0x11, 0x50, 0x00, 0x00])).unwrap_err();
        assert!(matches!(err, StreamError::ProtocolError(_)));
    }

    #[test]
    fn test_bare_ack_without_length_field() {
        let frame = Frame::decode(Bytes::from_static(&[0x11, 0xb0, 0x00, 0x00])).unwrap();
        assert!(frame.is_bare_ack());
        assert!(!frame.is_terminal());
        assert_eq!(frame.sequence, None);
    }

    #[test]
    fn test_sequence_flag_mismatch_rejected_on_build() {
        let err = Frame::new(
            MessageType::AudioOnlyRequest,
            SequenceFlag::Negative,
            Serialization::None,
            Compression::None,
            Some(4),
            Bytes::new(),
        )
        .unwrap_err();
        assert!(matches!(err, StreamError::ProtocolError(_)));

        let err = Frame::new(
            MessageType::AudioOnlyRequest,
            SequenceFlag::Positive,
            Serialization::None,
            Compression::None,
            None,
            Bytes::new(),
        )
        .unwrap_err();
        assert!(matches!(err, StreamError::ProtocolError(_)));
    }

    #[test]
    fn test_negative_sequence_marks_terminal() {
        let frame = Frame::new(
            MessageType::AudioOnlyResponse,
            SequenceFlag::LastNegative,
            Serialization::None,
            Compression::None,
            Some(-12),
            Bytes::from_static(b"tail"),
        )
        .unwrap();
        assert!(Frame::decode(frame.encode()).unwrap().is_terminal());
    }
}
