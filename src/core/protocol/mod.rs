//! Binary frame codec.
//!
//! Pure byte-level encoding and decoding. Sequence numbers are carried but
//! never assigned here; that belongs to [`crate::core::session`].

pub mod frame;
pub mod payload;

pub use frame::{
    Compression, DEFAULT_HEADER_WORDS, Frame, FrameBody, FrameHeader, MessageType,
    PROTOCOL_VERSION, SequenceFlag, Serialization,
};
pub use payload::{Payload, compress, decode_payload, decompress, encode_json};
