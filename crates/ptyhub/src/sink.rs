//! Output fan-out: where session bytes go when a session is subscribed.

use ptyhub_core::{PtyHubError, PtyHubResult};
use tokio::sync::mpsc;

/// Receives raw output from subscribed sessions.
///
/// Called from the session's output pump; implementations must not block.
/// A failure is logged by the caller and never affects the session.
pub trait OutputSink: Send + Sync {
    fn broadcast(&self, session_id: &str, data: &[u8]) -> PtyHubResult<()>;
}

/// Discards all output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn broadcast(&self, _session_id: &str, _data: &[u8]) -> PtyHubResult<()> {
        Ok(())
    }
}

/// One chunk of output from one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    pub session_id: String,
    pub data: Vec<u8>,
}

/// Forwards output into an unbounded channel, for a transport task to
/// consume.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OutputEvent>,
}

impl ChannelSink {
    /// Create a sink together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutputEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OutputSink for ChannelSink {
    fn broadcast(&self, session_id: &str, data: &[u8]) -> PtyHubResult<()> {
        self.tx
            .send(OutputEvent {
                session_id: session_id.to_string(),
                data: data.to_vec(),
            })
            .map_err(|_| PtyHubError::Sink("output receiver dropped".into()))
    }
}
