//! Payload compression and serialization.
//!
//! Inbound payloads go through decompress → deserialize; outbound payloads
//! through serialize → compress. Both steps are driven by the header nibbles.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::Compression as GzLevel;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde_json::Value;

use super::frame::{Compression, Frame, FrameBody, Serialization};
use crate::core::error::{StreamError, StreamResult};

/// Upper bound on a single decompressed payload.
pub const MAX_DECOMPRESSED_SIZE: u64 = 16 * 1024 * 1024;

/// Decoded payload content.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Raw(Bytes),
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }
}

/// Compress `data` with the given method.
pub fn compress(data: &[u8], compression: Compression) -> StreamResult<Bytes> {
    match compression {
        Compression::None => Ok(Bytes::copy_from_slice(data)),
        Compression::Gzip => {
            let buf = Vec::with_capacity(data.len() / 2 + 32);
            let mut encoder = GzEncoder::new(buf, GzLevel::default());
            encoder
                .write_all(data)
                .and_then(|_| encoder.finish())
                .map(Bytes::from)
                .map_err(|e| StreamError::MalformedFrame(format!("gzip compression failed: {e}")))
        }
    }
}

/// Undo `compression` on `data`. Gzip failures are `MalformedFrame`.
pub fn decompress(data: &Bytes, compression: Compression) -> StreamResult<Bytes> {
    match compression {
        Compression::None => Ok(data.clone()),
        Compression::Gzip => {
            let mut out = Vec::with_capacity(data.len() * 4);
            GzDecoder::new(data.as_ref())
                .take(MAX_DECOMPRESSED_SIZE + 1)
                .read_to_end(&mut out)
                .map_err(|e| StreamError::MalformedFrame(format!("gzip decompression failed: {e}")))?;
            if out.len() as u64 > MAX_DECOMPRESSED_SIZE {
                return Err(StreamError::MalformedFrame(format!(
                    "Decompressed payload exceeds {MAX_DECOMPRESSED_SIZE} bytes"
                )));
            }
            Ok(Bytes::from(out))
        }
    }
}

/// Serialize `value` as JSON and compress it.
pub fn encode_json<T: Serialize>(value: &T, compression: Compression) -> StreamResult<Bytes> {
    let json = serde_json::to_vec(value)
        .map_err(|e| StreamError::ProtocolError(format!("Failed to serialize payload: {e}")))?;
    compress(&json, compression)
}

/// Decompress and deserialize a raw payload.
pub fn decode_payload(
    data: &Bytes,
    serialization: Serialization,
    compression: Compression,
) -> StreamResult<Payload> {
    let plain = decompress(data, compression)?;
    match serialization {
        Serialization::None => Ok(Payload::Raw(plain)),
        Serialization::Json => {
            if plain.is_empty() {
                return Ok(Payload::Json(Value::Null));
            }
            serde_json::from_slice(&plain)
                .map(Payload::Json)
                .map_err(|e| StreamError::MalformedFrame(format!("Invalid JSON payload: {e}")))
        }
    }
}

impl Frame {
    /// Decoded payload of a data frame.
    pub fn decoded_payload(&self) -> StreamResult<Payload> {
        decode_payload(
            self.payload(),
            self.header.serialization,
            self.header.compression,
        )
    }

    /// Error code and decompressed, lossily UTF-8 decoded message of an error
    /// frame.
    pub fn error_details(&self) -> Option<StreamResult<(u32, String)>> {
        match &self.body {
            FrameBody::Error { code, message } => Some(
                decompress(message, self.header.compression)
                    .map(|plain| (*code, String::from_utf8_lossy(&plain).into_owned())),
            ),
            FrameBody::Payload(_) => None,
        }
    }
}
