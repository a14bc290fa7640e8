pub mod demux;
pub mod error;
pub mod forwarder;
pub mod protocol;
pub mod segmenter;
pub mod session;
pub mod stt;
pub mod transport;
pub mod tts;

// Re-export commonly used types for convenience
pub use demux::{Classified, ResultContent, SpeechResult, classify};
pub use error::{StreamError, StreamResult};
pub use forwarder::{DuplexForwarder, ForwarderConfig, ResultStream, SessionHandle, SessionInput};
pub use protocol::{Compression, Frame, MessageType, SequenceFlag, Serialization};
pub use segmenter::{AudioFormat, AudioSegment, AudioSegmenter, SegmentRounding, SegmenterConfig};
pub use session::{Direction, SessionState, SessionStateMachine};
pub use stt::{RecognitionClient, RecognitionConfig};
pub use transport::{FrameSink, FrameSource, WsConnection, connect};
pub use tts::{SynthesisClient, SynthesisConfig};
