//! Session state machine.
//!
//! Sans-IO: builds outbound frames with their sequence numbers and interprets
//! decoded inbound frames. The forwarder owns the socket and drives this.
//!
//! ```text
//! Idle -> Handshaking -> Streaming -> Ending -> Terminated
//!              \______________\__________\____> Failed
//! ```

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::demux::{Classified, classify};
use crate::core::error::{StreamError, StreamResult};
use crate::core::protocol::{
    Compression, Frame, MessageType, SequenceFlag, Serialization, compress, encode_json,
};

/// Which way audio flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client audio in, server text out.
    Recognition,
    /// Client text in, server audio out.
    Synthesis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Handshaking,
    Streaming,
    Ending,
    Terminated,
    Failed,
}

impl SessionState {
    /// `Terminated` and `Failed` accept nothing further.
    #[inline]
    pub fn is_absorbing(self) -> bool {
        matches!(self, SessionState::Terminated | SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Handshaking => "handshaking",
            SessionState::Streaming => "streaming",
            SessionState::Ending => "ending",
            SessionState::Terminated => "terminated",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-session protocol state and sequence counter.
#[derive(Debug)]
pub struct SessionStateMachine {
    request_id: String,
    direction: Direction,
    state: SessionState,
    next_sequence: i32,
    audio_compression: Compression,
    last_inbound_sequence: Option<i32>,
    failure: Option<StreamError>,
    failure_reported: bool,
}

impl SessionStateMachine {
    pub fn new(direction: Direction, request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            direction,
            state: SessionState::Idle,
            next_sequence: 1,
            audio_compression: Compression::Gzip,
            last_inbound_sequence: None,
            failure: None,
            failure_reported: false,
        }
    }

    /// Compression applied to outbound audio payloads (gzip by default).
    pub fn with_audio_compression(mut self, compression: Compression) -> Self {
        self.audio_compression = compression;
        self
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[inline]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Sequence number the next outbound frame would carry.
    #[inline]
    pub fn next_sequence(&self) -> i32 {
        self.next_sequence
    }

    pub fn failure(&self) -> Option<&StreamError> {
        self.failure.as_ref()
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Build the full-client-request frame and enter `Handshaking`.
    ///
    /// Consumes sequence 1. Recognition sessions put it on the wire;
    /// synthesis submit frames carry no sequence field.
    pub fn start<T: Serialize>(&mut self, handshake: &T) -> StreamResult<Bytes> {
        self.expect_state(&[SessionState::Idle], "start")?;

        let payload = encode_json(handshake, Compression::Gzip)?;
        let sequence = self.take_sequence();
        let (flags, wire_sequence) = match self.direction {
            Direction::Recognition => (SequenceFlag::Positive, Some(sequence)),
            Direction::Synthesis => (SequenceFlag::None, None),
        };

        let frame = Frame::new(
            MessageType::FullClientRequest,
            flags,
            Serialization::Json,
            Compression::Gzip,
            wire_sequence,
            payload,
        )?;

        self.state = SessionState::Handshaking;
        info!(
            request_id = %self.request_id,
            direction = ?self.direction,
            "Session handshake built"
        );
        Ok(frame.encode())
    }

    /// Build the next audio-only frame (flags 1, positive sequence).
    pub fn audio_frame(&mut self, audio: &[u8]) -> StreamResult<Bytes> {
        self.expect_audio_direction()?;
        self.expect_state(&[SessionState::Streaming], "send audio")?;

        let payload = compress(audio, self.audio_compression)?;
        let sequence = self.next_sequence;
        let frame = Frame::new(
            MessageType::AudioOnlyRequest,
            SequenceFlag::Positive,
            Serialization::None,
            self.audio_compression,
            Some(sequence),
            payload,
        )?;
        self.take_sequence();

        debug!(
            request_id = %self.request_id,
            sequence,
            bytes = audio.len(),
            "Audio frame built"
        );
        Ok(frame.encode())
    }

    /// Build the terminal audio frame (flags 3, sequence = -next) and enter
    /// `Ending`.
    pub fn end_frame(&mut self, remainder: &[u8]) -> StreamResult<Bytes> {
        self.expect_audio_direction()?;
        self.expect_state(
            &[SessionState::Handshaking, SessionState::Streaming],
            "end the stream",
        )?;

        let payload = compress(remainder, self.audio_compression)?;
        let sequence = -self.next_sequence;
        let frame = Frame::new(
            MessageType::AudioOnlyRequest,
            SequenceFlag::Negative,
            Serialization::None,
            self.audio_compression,
            Some(sequence),
            payload,
        )?;

        self.state = SessionState::Ending;
        info!(request_id = %self.request_id, sequence, "Terminal frame built");
        Ok(frame.encode())
    }

    /// Enter `Ending` without a frame. Synthesis sessions have no outbound
    /// terminal frame; they just wait for the server to finish.
    pub fn begin_ending(&mut self) -> StreamResult<()> {
        match self.state {
            SessionState::Handshaking | SessionState::Streaming => {
                self.state = SessionState::Ending;
                Ok(())
            }
            SessionState::Ending => Ok(()),
            other => Err(StreamError::ProtocolError(format!(
                "Cannot end a session in state {other}"
            ))),
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Interpret a decoded inbound frame.
    ///
    /// Error frames move the machine to `Failed` and come back as
    /// `RemoteError`; any other error raised here fails the session too.
    pub fn on_inbound(&mut self, frame: &Frame) -> StreamResult<Classified> {
        if self.state.is_absorbing() {
            return Err(StreamError::ProtocolError(format!(
                "Frame received after session became {}",
                self.state
            )));
        }
        if self.state == SessionState::Idle {
            let err = StreamError::ProtocolError("Frame received before handshake".to_string());
            self.fail(err.clone());
            return Err(err);
        }

        if let Some(sequence) = frame.sequence.filter(|seq| *seq > 0) {
            if let Some(last) = self.last_inbound_sequence
                && sequence < last
            {
                let err = StreamError::ProtocolError(format!(
                    "Inbound sequence regressed from {last} to {sequence}"
                ));
                self.fail(err.clone());
                return Err(err);
            }
            self.last_inbound_sequence = Some(sequence);
        }

        let classified = match classify(frame, self.direction) {
            Ok(classified) => classified,
            Err(err) => {
                self.fail(err.clone());
                return Err(err);
            }
        };

        match &classified {
            Classified::Error { code, message } => {
                let err = StreamError::RemoteError {
                    code: *code,
                    message: message.clone(),
                };
                self.fail(err.clone());
                return Err(err);
            }
            Classified::Final(_) => {
                if self.state != SessionState::Ending {
                    info!(
                        request_id = %self.request_id,
                        state = %self.state,
                        "Server ended the session before end of input"
                    );
                }
                self.state = SessionState::Terminated;
                info!(request_id = %self.request_id, "Session terminated");
            }
            Classified::Partial(_) | Classified::Ack => {
                if self.state == SessionState::Handshaking {
                    self.state = SessionState::Streaming;
                    debug!(request_id = %self.request_id, "Handshake acknowledged");
                }
            }
        }

        Ok(classified)
    }

    /// Move to `Failed`. Returns whether this call made the transition.
    pub fn fail(&mut self, err: StreamError) -> bool {
        if self.state.is_absorbing() {
            return false;
        }
        warn!(
            request_id = %self.request_id,
            state = %self.state,
            error = %err,
            "Session failed"
        );
        self.state = SessionState::Failed;
        self.failure = Some(err);
        true
    }

    /// The failure, the first time it is asked for.
    pub fn take_unreported_failure(&mut self) -> Option<StreamError> {
        if self.failure_reported {
            return None;
        }
        let failure = self.failure.clone()?;
        self.failure_reported = true;
        Some(failure)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn take_sequence(&mut self) -> i32 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    fn expect_state(&self, allowed: &[SessionState], action: &str) -> StreamResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(StreamError::ProtocolError(format!(
                "Cannot {action} in state {}",
                self.state
            )))
        }
    }

    fn expect_audio_direction(&self) -> StreamResult<()> {
        match self.direction {
            Direction::Recognition => Ok(()),
            Direction::Synthesis => Err(StreamError::ProtocolError(
                "Synthesis sessions do not send audio".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::demux::ResultContent;
    use serde_json::json;

    fn bare_ack() -> Frame {
        Frame::decode(Bytes::from_static(&[0x11, 0xb0, 0x00, 0x00])).unwrap()
    }

    fn server_response(seq: i32, text: &str) -> Frame {
        let flags = if seq < 0 {
            SequenceFlag::LastNegative
        } else {
            SequenceFlag::Positive
        };
        Frame::new(
            MessageType::FullServerResponse,
            flags,
            Serialization::Json,
            Compression::None,
            Some(seq),
            Bytes::from(json!({"result": {"text": text}}).to_string()),
        )
        .unwrap()
    }

    fn sequence_of(wire: Bytes) -> Option<i32> {
        Frame::decode(wire).unwrap().sequence
    }

    #[test]
    fn test_recognition_sequence_numbers() {
        let mut machine = SessionStateMachine::new(Direction::Recognition, "req-1");
        let handshake = json!({"user": {"uid": "t1"}, "audio": {"format": "pcm", "rate": 16000, "bits": 16, "channel": 1}});

        let mut sequences = vec![sequence_of(machine.start(&handshake).unwrap())];
        assert_eq!(machine.state(), SessionState::Handshaking);

        machine.on_inbound(&bare_ack()).unwrap();
        assert_eq!(machine.state(), SessionState::Streaming);

        for _ in 0..3 {
            sequences.push(sequence_of(machine.audio_frame(&[0u8; 3200]).unwrap()));
            machine.on_inbound(&bare_ack()).unwrap();
        }
        sequences.push(sequence_of(machine.end_frame(&[]).unwrap()));
        assert_eq!(machine.state(), SessionState::Ending);

        assert_eq!(
            sequences,
            vec![Some(1), Some(2), Some(3), Some(4), Some(-5)]
        );

        let classified = machine.on_inbound(&server_response(-1, "final")).unwrap();
        assert_eq!(
            classified,
            Classified::Final(Some(ResultContent::Text("final".to_string())))
        );
        assert_eq!(machine.state(), SessionState::Terminated);
    }

    #[test]
    fn test_handshake_frame_layout() {
        let mut machine = SessionStateMachine::new(Direction::Recognition, "req");
        let wire = machine.start(&json!({"user": {"uid": "t1"}})).unwrap();
        let frame = Frame::decode(wire).unwrap();
        assert_eq!(frame.message_type(), MessageType::FullClientRequest);
        assert_eq!(frame.header.serialization, Serialization::Json);
        assert_eq!(frame.header.compression, Compression::Gzip);
        assert_eq!(frame.sequence, Some(1));
        let payload = frame.decoded_payload().unwrap();
        assert_eq!(payload.as_json().unwrap()["user"]["uid"], "t1");
    }

    #[test]
    fn test_synthesis_submit_has_no_sequence_field() {
        let mut machine = SessionStateMachine::new(Direction::Synthesis, "req");
        let wire = machine.start(&json!({"request": {"text": "hi"}})).unwrap();
        assert_eq!(&wire[..4], &[0x11, 0x10, 0x11, 0x00]);
        assert_eq!(Frame::decode(wire).unwrap().sequence, None);
        assert_eq!(machine.next_sequence(), 2);
        assert!(machine.audio_frame(&[1, 2]).is_err());
    }

    #[test]
    fn test_error_frame_fails_session() {
        let mut machine = SessionStateMachine::new(Direction::Recognition, "req");
        machine.start(&json!({})).unwrap();
        machine.on_inbound(&bare_ack()).unwrap();

        let message = compress(b"invalid audio format", Compression::Gzip).unwrap();
        let err = machine
            .on_inbound(&Frame::error(45000001, message, Compression::Gzip))
            .unwrap_err();
        assert_eq!(
            err,
            StreamError::RemoteError {
                code: 45000001,
                message: "invalid audio format".to_string()
            }
        );
        assert_eq!(machine.state(), SessionState::Failed);

        assert_eq!(machine.take_unreported_failure(), Some(err));
        assert_eq!(machine.take_unreported_failure(), None);
        assert!(!machine.fail(StreamError::Timeout("late".into())));
    }

    #[test]
    fn test_absorbing_states_reject_everything() {
        let mut machine = SessionStateMachine::new(Direction::Recognition, "req");
        machine.start(&json!({})).unwrap();
        machine.on_inbound(&server_response(-1, "")).unwrap();
        assert_eq!(machine.state(), SessionState::Terminated);

        assert!(machine.audio_frame(&[0u8; 10]).is_err());
        assert!(machine.end_frame(&[]).is_err());
        assert!(machine.on_inbound(&bare_ack()).is_err());
        assert_eq!(machine.state(), SessionState::Terminated);
    }

    #[test]
    fn test_early_terminal_frame_is_authoritative() {
        let mut machine = SessionStateMachine::new(Direction::Recognition, "req");
        machine.start(&json!({})).unwrap();
        machine.on_inbound(&bare_ack()).unwrap();
        machine.audio_frame(&[0u8; 3200]).unwrap();

        machine.on_inbound(&server_response(-3, "cut short")).unwrap();
        assert_eq!(machine.state(), SessionState::Terminated);
    }

    #[test]
    fn test_inbound_sequence_regression() {
        let mut machine = SessionStateMachine::new(Direction::Recognition, "req");
        machine.start(&json!({})).unwrap();
        machine.on_inbound(&server_response(5, "a")).unwrap();

        let err = machine.on_inbound(&server_response(4, "b")).unwrap_err();
        assert!(matches!(err, StreamError::ProtocolError(_)));
        assert_eq!(machine.state(), SessionState::Failed);
    }

    #[test]
    fn test_inbound_before_start_fails() {
        let mut machine = SessionStateMachine::new(Direction::Recognition, "req");
        assert!(machine.on_inbound(&bare_ack()).is_err());
        assert_eq!(machine.state(), SessionState::Failed);
    }

    #[test]
    fn test_audio_before_handshake_ack_rejected() {
        let mut machine = SessionStateMachine::new(Direction::Recognition, "req");
        machine.start(&json!({})).unwrap();
        assert!(matches!(
            machine.audio_frame(&[0u8; 4]),
            Err(StreamError::ProtocolError(_))
        ));
    }
}
