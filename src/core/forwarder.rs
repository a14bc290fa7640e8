//! Duplex forwarder.
//!
//! Runs one session over one socket with two tasks:
//!
//! ```text
//!   push_audio() ──▶ AudioSegmenter ──▶ outbound task ──▶ FrameSink
//!                                           ▲  (waits for window)
//!                                           │ watch<InboundProgress>
//!   ResultStream ◀── mpsc ◀── inbound task ◀┴─ FrameSource
//! ```
//!
//! The outbound task never has more than one frame in flight: before sending
//! frame `k + 1` it waits until the inbound task has consumed `k` frames.
//! Only the outbound task writes to the socket.
//!
//! Building and sending a frame happens under a read guard of the send gate;
//! the inbound task applies frames to the state machine under its write
//! guard. A frame built while the session was live is therefore on the wire
//! before an inbound terminal frame can end the session.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::demux::{Classified, SpeechResult};
use crate::core::error::{StreamError, StreamResult};
use crate::core::protocol::Frame;
use crate::core::segmenter::AudioSegmenter;
use crate::core::session::{Direction, SessionState, SessionStateMachine};
use crate::core::transport::{FrameSink, FrameSource};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwarderConfig {
    /// Maximum silence from the server while the session is live.
    pub inbound_timeout: Duration,
    /// How long inbound keeps draining after `stop()` before the socket is
    /// force-closed.
    pub grace_period: Duration,
    /// Capacity of the result channel.
    pub result_buffer: usize,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            inbound_timeout: Duration::from_secs(10),
            grace_period: Duration::from_secs(3),
            result_buffer: 64,
        }
    }
}

/// Where outbound data comes from.
#[derive(Debug, Clone)]
pub enum SessionInput {
    /// Recognition: raw audio pushed into a shared segmenter.
    Audio(Arc<AudioSegmenter>),
    /// Synthesis: the text already travels in the handshake.
    Text,
}

impl SessionInput {
    fn segmenter(&self) -> Option<&Arc<AudioSegmenter>> {
        match self {
            SessionInput::Audio(segmenter) => Some(segmenter),
            SessionInput::Text => None,
        }
    }
}

// =============================================================================
// Shared state
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct InboundProgress {
    consumed: u64,
    closed: bool,
}

struct Shared {
    machine: Mutex<SessionStateMachine>,
    request_id: String,
    /// Caller-requested stop.
    stop: CancellationToken,
    /// Session reached an absorbing state.
    done: CancellationToken,
    progress: watch::Sender<InboundProgress>,
    send_gate: RwLock<()>,
    input: SessionInput,
}

impl Shared {
    /// Fail the session and emit the error, at most once per session.
    async fn report(&self, err: StreamError, results: &mpsc::Sender<StreamResult<SpeechResult>>) {
        let pending = {
            let mut machine = self.machine.lock();
            machine.fail(err);
            machine.take_unreported_failure()
        };
        if let Some(err) = pending {
            let _ = results.send(Err(err)).await;
        }
        self.close();
    }

    fn close(&self) {
        self.progress.send_modify(|p| p.closed = true);
        if let Some(segmenter) = self.input.segmenter() {
            segmenter.clear();
        }
        self.done.cancel();
    }
}

// =============================================================================
// Public handles
// =============================================================================

/// Caller-side control of a running session.
pub struct SessionHandle {
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionHandle {
    /// Push raw audio into the session's segmenter.
    pub fn push_audio(&self, audio: &[u8]) -> StreamResult<()> {
        match self.shared.input.segmenter() {
            Some(segmenter) => segmenter.push(audio),
            None => Err(StreamError::ProtocolError(
                "Synthesis sessions do not accept audio".to_string(),
            )),
        }
    }

    /// Segment size of a recognition session. Pushes of at most this many
    /// bytes always fit once the segmenter has drained.
    pub fn segment_size(&self) -> Option<usize> {
        self.shared.input.segmenter().map(|s| s.segment_size())
    }

    /// Signal end of input. Buffered audio is still sent.
    pub fn finish(&self) {
        if let Some(segmenter) = self.shared.input.segmenter() {
            segmenter.finish();
        }
    }

    /// Stop taking audio and end the session now.
    pub fn stop(&self) {
        self.shared.stop.cancel();
    }

    pub fn state(&self) -> SessionState {
        self.shared.machine.lock().state()
    }

    pub fn request_id(&self) -> &str {
        &self.shared.request_id
    }

    pub fn direction(&self) -> Direction {
        self.shared.machine.lock().direction()
    }

    pub fn is_done(&self) -> bool {
        self.shared.done.is_cancelled()
    }

    /// Wait for both session tasks to exit.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(request_id = %self.shared.request_id, "Session task panicked: {}", e);
            }
        }
    }
}

/// Ordered results of one session. Ends after the final result or after a
/// single error item.
pub struct ResultStream {
    rx: mpsc::Receiver<StreamResult<SpeechResult>>,
}

impl ResultStream {
    pub async fn next_result(&mut self) -> Option<StreamResult<SpeechResult>> {
        self.rx.recv().await
    }
}

impl Stream for ResultStream {
    type Item = StreamResult<SpeechResult>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// =============================================================================
// Forwarder
// =============================================================================

pub struct DuplexForwarder;

impl DuplexForwarder {
    /// Start a session: send the handshake, then forward input and results
    /// until the session terminates or fails.
    pub fn spawn<K, R>(
        machine: SessionStateMachine,
        handshake: Value,
        sink: K,
        source: R,
        input: SessionInput,
        config: ForwarderConfig,
    ) -> (SessionHandle, ResultStream)
    where
        K: FrameSink + 'static,
        R: FrameSource + 'static,
    {
        let (progress, progress_rx) = watch::channel(InboundProgress::default());
        let (results_tx, results_rx) = mpsc::channel(config.result_buffer.max(1));

        let shared = Arc::new(Shared {
            request_id: machine.request_id().to_string(),
            machine: Mutex::new(machine),
            stop: CancellationToken::new(),
            done: CancellationToken::new(),
            progress,
            send_gate: RwLock::new(()),
            input,
        });

        let outbound = tokio::spawn(run_outbound(
            shared.clone(),
            sink,
            handshake,
            progress_rx,
            results_tx.clone(),
        ));
        let inbound = tokio::spawn(run_inbound(shared.clone(), source, config, results_tx));

        (
            SessionHandle {
                shared,
                tasks: vec![outbound, inbound],
            },
            ResultStream { rx: results_rx },
        )
    }
}

// =============================================================================
// Outbound task
// =============================================================================

enum Step {
    Segment(crate::core::segmenter::AudioSegment),
    Stop,
    Done,
}

async fn run_outbound<K: FrameSink>(
    shared: Arc<Shared>,
    mut sink: K,
    handshake: Value,
    mut progress: watch::Receiver<InboundProgress>,
    results: mpsc::Sender<StreamResult<SpeechResult>>,
) {
    if let Err(err) = outbound_loop(&shared, &mut sink, &handshake, &mut progress).await {
        shared.report(err, &results).await;
    }
    drop(results);

    shared.done.cancelled().await;
    if let Err(e) = sink.close().await {
        debug!(request_id = %shared.request_id, "Socket close failed: {}", e);
    }
    debug!(request_id = %shared.request_id, "Outbound task finished");
}

async fn outbound_loop<K: FrameSink>(
    shared: &Shared,
    sink: &mut K,
    handshake: &Value,
    progress: &mut watch::Receiver<InboundProgress>,
) -> StreamResult<()> {
    if !send_gated(shared, sink, |machine| machine.start(handshake)).await? {
        return Ok(());
    }
    let mut sent: u64 = 1;

    let segmenter = match &shared.input {
        SessionInput::Audio(segmenter) => segmenter.clone(),
        SessionInput::Text => {
            tokio::select! {
                _ = shared.done.cancelled() => {}
                _ = shared.stop.cancelled() => {
                    info!(request_id = %shared.request_id, "Synthesis session stopped by caller");
                    shared.machine.lock().begin_ending()?;
                }
            }
            return Ok(());
        }
    };

    loop {
        if !wait_window(progress, sent).await {
            return Ok(());
        }

        let step = tokio::select! {
            biased;
            _ = shared.done.cancelled() => Step::Done,
            _ = shared.stop.cancelled() => Step::Stop,
            segment = segmenter.next_segment() => match segment {
                Some(segment) => Step::Segment(segment),
                None => Step::Stop,
            },
        };

        let is_last = match step {
            Step::Done => return Ok(()),
            Step::Stop => {
                info!(request_id = %shared.request_id, "Recognition session stopped by caller");
                segmenter.clear();
                true
            }
            Step::Segment(segment) => {
                if !segment.data.is_empty() {
                    if !send_gated(shared, sink, |machine| machine.audio_frame(&segment.data))
                        .await?
                    {
                        return Ok(());
                    }
                    sent += 1;
                }
                segment.is_last
            }
        };

        if is_last {
            if !wait_window(progress, sent).await {
                return Ok(());
            }
            send_gated(shared, sink, |machine| machine.end_frame(&[])).await?;
            return Ok(());
        }
    }
}

/// Build a frame and send it under the send gate. `Ok(false)` when the
/// session already ended and nothing was sent.
async fn send_gated<K, F>(shared: &Shared, sink: &mut K, build: F) -> StreamResult<bool>
where
    K: FrameSink,
    F: FnOnce(&mut SessionStateMachine) -> StreamResult<Bytes>,
{
    let _permit = shared.send_gate.read().await;
    let frame = {
        let mut machine = shared.machine.lock();
        if machine.state().is_absorbing() {
            return Ok(false);
        }
        build(&mut *machine)?
    };
    sink.send(frame).await?;
    Ok(true)
}

/// Wait until `sent` inbound frames were consumed. `false` once the session
/// has closed.
async fn wait_window(progress: &mut watch::Receiver<InboundProgress>, sent: u64) -> bool {
    match progress.wait_for(|p| p.closed || p.consumed >= sent).await {
        Ok(p) => !p.closed,
        Err(_) => false,
    }
}

// =============================================================================
// Inbound task
// =============================================================================

async fn run_inbound<R: FrameSource>(
    shared: Arc<Shared>,
    mut source: R,
    config: ForwarderConfig,
    results: mpsc::Sender<StreamResult<SpeechResult>>,
) {
    let mut grace_deadline: Option<Instant> = None;

    loop {
        let idle_deadline = Instant::now() + config.inbound_timeout;
        let deadline = match grace_deadline {
            Some(grace) => grace.min(idle_deadline),
            None => idle_deadline,
        };

        let received = tokio::select! {
            biased;
            _ = shared.done.cancelled() => break,
            _ = shared.stop.cancelled(), if grace_deadline.is_none() => {
                grace_deadline = Some(Instant::now() + config.grace_period);
                continue;
            }
            received = tokio::time::timeout_at(deadline, source.recv()) => received,
        };

        let data = match received {
            Ok(Some(Ok(data))) => data,
            Ok(Some(Err(err))) => {
                shared.report(err, &results).await;
                break;
            }
            Ok(None) => {
                shared
                    .report(
                        StreamError::ConnectionLost(
                            "Socket closed before a terminal frame".to_string(),
                        ),
                        &results,
                    )
                    .await;
                break;
            }
            Err(_) => {
                let err = if grace_deadline.is_some_and(|grace| grace <= idle_deadline) {
                    StreamError::Timeout(format!(
                        "Server did not finish within the {:?} grace period",
                        config.grace_period
                    ))
                } else {
                    StreamError::Timeout(format!(
                        "No inbound frame for {:?}",
                        config.inbound_timeout
                    ))
                };
                shared.report(err, &results).await;
                break;
            }
        };

        let frame = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(err) => {
                shared.report(err, &results).await;
                break;
            }
        };

        let gate = match tokio::time::timeout(config.inbound_timeout, shared.send_gate.write()).await
        {
            Ok(gate) => gate,
            Err(_) => {
                let err = StreamError::Timeout(format!(
                    "Outbound send still pending after {:?}",
                    config.inbound_timeout
                ));
                shared.report(err, &results).await;
                break;
            }
        };
        let outcome = shared.machine.lock().on_inbound(&frame);
        drop(gate);
        let classified = match outcome {
            Ok(classified) => classified,
            Err(err) => {
                shared.report(err, &results).await;
                break;
            }
        };
        shared.progress.send_modify(|p| p.consumed += 1);

        match classified {
            Classified::Ack => {
                debug!(request_id = %shared.request_id, sequence = ?frame.sequence, "Ack received");
            }
            Classified::Partial(content) => {
                let result = SpeechResult {
                    content,
                    is_final: false,
                    sequence: frame.sequence,
                };
                if results.send(Ok(result)).await.is_err() {
                    debug!(request_id = %shared.request_id, "Result stream dropped");
                }
            }
            Classified::Final(content) => {
                if let Some(content) = content {
                    let result = SpeechResult {
                        content,
                        is_final: true,
                        sequence: frame.sequence,
                    };
                    let _ = results.send(Ok(result)).await;
                }
                shared.close();
                break;
            }
            Classified::Error { .. } => {
                // on_inbound turns error frames into Err; nothing to emit here.
                shared.close();
                break;
            }
        }
    }

    info!(
        request_id = %shared.request_id,
        state = %shared.machine.lock().state(),
        "Session finished"
    );
}
