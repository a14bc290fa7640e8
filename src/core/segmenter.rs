//! Audio segmentation and buffering.
//!
//! Raw PCM bytes are pushed by a producer and cut into fixed-size segments
//! for the forwarder. Segment boundaries are byte-count driven only. The
//! buffer is the one resource shared between the producer and the forwarder,
//! so it sits behind a mutex with a [`Notify`] for wake-ups.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::core::error::{StreamError, StreamResult};

// =============================================================================
// Configuration
// =============================================================================

/// PCM audio format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits: u16,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            bits: 16,
            channels: 1,
        }
    }
}

impl AudioFormat {
    #[inline]
    pub fn bytes_per_sample(&self) -> u64 {
        (self.bits as u64).div_ceil(8)
    }

    /// Bytes in one sample frame (one sample per channel).
    #[inline]
    pub fn frame_size(&self) -> u64 {
        self.bytes_per_sample() * self.channels as u64
    }

    pub fn validate(&self) -> StreamResult<()> {
        if self.sample_rate == 0 {
            return Err(StreamError::Configuration(
                "sample_rate must be greater than zero".to_string(),
            ));
        }
        if !matches!(self.bits, 8 | 16 | 24 | 32) {
            return Err(StreamError::Configuration(format!(
                "Unsupported bit depth {}; expected 8, 16, 24 or 32",
                self.bits
            )));
        }
        if self.channels == 0 {
            return Err(StreamError::Configuration(
                "channels must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// How the computed segment size is rounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentRounding {
    /// Integer division, no further adjustment.
    #[default]
    Floor,
    /// Round down to whole sample frames, never below one frame.
    FrameAligned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmenterConfig {
    pub format: AudioFormat,
    pub segment_duration_ms: u32,
    #[serde(default)]
    pub rounding: SegmentRounding,
    /// Reject pushes that would grow the buffer past this many bytes.
    #[serde(default)]
    pub max_buffered_bytes: Option<usize>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::default(),
            segment_duration_ms: 100,
            rounding: SegmentRounding::Floor,
            max_buffered_bytes: None,
        }
    }
}

impl SegmenterConfig {
    /// Segment size in bytes for this configuration.
    pub fn segment_size(&self) -> StreamResult<usize> {
        self.format.validate()?;

        let raw = self.format.sample_rate as u64
            * self.format.frame_size()
            * self.segment_duration_ms as u64
            / 1000;

        let size = match self.rounding {
            SegmentRounding::Floor => raw,
            SegmentRounding::FrameAligned => {
                let frame = self.format.frame_size();
                (raw / frame * frame).max(frame)
            }
        };

        if size == 0 {
            return Err(StreamError::Configuration(format!(
                "Segment duration of {}ms yields an empty segment",
                self.segment_duration_ms
            )));
        }
        Ok(size as usize)
    }
}

// =============================================================================
// Segments
// =============================================================================

/// One emitted chunk of audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    pub data: Bytes,
    pub is_last: bool,
    /// Position in emission order, starting at zero.
    pub index: u64,
}

#[derive(Debug, Default)]
struct Inner {
    buffer: BytesMut,
    next_index: u64,
    finished: bool,
    last_emitted: bool,
}

impl Inner {
    fn take(&mut self, len: usize, is_last: bool) -> AudioSegment {
        let data = self.buffer.split_to(len).freeze();
        let segment = AudioSegment {
            data,
            is_last,
            index: self.next_index,
        };
        self.next_index += 1;
        if is_last {
            self.last_emitted = true;
        }
        segment
    }
}

/// Thread-safe byte accumulator that emits fixed-size segments.
#[derive(Debug)]
pub struct AudioSegmenter {
    segment_size: usize,
    max_buffered_bytes: Option<usize>,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl AudioSegmenter {
    pub fn new(config: &SegmenterConfig) -> StreamResult<Self> {
        let segment_size = config.segment_size()?;
        if let Some(cap) = config.max_buffered_bytes
            && cap < segment_size
        {
            return Err(StreamError::Configuration(format!(
                "max_buffered_bytes ({cap}) is smaller than one segment ({segment_size})"
            )));
        }

        Ok(Self {
            segment_size,
            max_buffered_bytes: config.max_buffered_bytes,
            inner: Mutex::new(Inner {
                buffer: BytesMut::with_capacity(segment_size * 2),
                ..Default::default()
            }),
            notify: Notify::new(),
        })
    }

    #[inline]
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    pub fn buffered_len(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }

    /// Append raw audio.
    ///
    /// With a cap configured, a push that would overflow it is rejected whole
    /// and the buffer is left untouched.
    pub fn push(&self, bytes: &[u8]) -> StreamResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        let ready = {
            let mut inner = self.inner.lock();
            if inner.finished {
                return Err(StreamError::ProtocolError(
                    "Audio pushed after end of input".to_string(),
                ));
            }
            let buffered = inner.buffer.len();
            if let Some(cap) = self.max_buffered_bytes
                && buffered + bytes.len() > cap
            {
                return Err(StreamError::BufferOverflow {
                    buffered,
                    incoming: bytes.len(),
                    cap,
                });
            }
            inner.buffer.extend_from_slice(bytes);
            inner.buffer.len() >= self.segment_size
        };

        if ready {
            self.notify.notify_one();
        }
        Ok(())
    }

    /// Lazily yield full segments while the buffer holds at least one,
    /// leaving any remainder buffered.
    pub fn drain(&self) -> impl Iterator<Item = AudioSegment> + '_ {
        std::iter::from_fn(move || {
            let mut inner = self.inner.lock();
            (!inner.last_emitted && inner.buffer.len() >= self.segment_size)
                .then(|| inner.take(self.segment_size, false))
        })
    }

    /// Emit everything still buffered as the last segment and end input.
    pub fn flush(&self) -> AudioSegment {
        let mut inner = self.inner.lock();
        inner.finished = true;
        let len = inner.buffer.len();
        let segment = inner.take(len, true);
        drop(inner);
        self.notify.notify_one();
        segment
    }

    /// Mark end of input. Buffered audio is still delivered by
    /// [`next_segment`](Self::next_segment).
    pub fn finish(&self) {
        self.inner.lock().finished = true;
        self.notify.notify_one();
    }

    /// Discard buffered audio and end input.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.buffer.clear();
        inner.finished = true;
        inner.last_emitted = true;
        drop(inner);
        self.notify.notify_one();
    }

    /// Wait for the next segment.
    ///
    /// Returns full segments as they become available. Once input has ended,
    /// the final (possibly shorter, possibly empty) segment is returned with
    /// `is_last` set, then `None` forever after. Cancel-safe: nothing is
    /// taken from the buffer unless the future completes.
    pub async fn next_segment(&self) -> Option<AudioSegment> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if inner.last_emitted {
                    return None;
                }
                let len = inner.buffer.len();
                if inner.finished && len <= self.segment_size {
                    return Some(inner.take(len, true));
                }
                if len >= self.segment_size {
                    return Some(inner.take(self.segment_size, false));
                }
            }
            notified.await;
        }
    }
}
