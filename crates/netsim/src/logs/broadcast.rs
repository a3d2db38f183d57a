//! Fan-out of the merged event stream to any number of viewers

use crate::{logs::ring::RingWriter, shutdown::Shutdown};
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Delivery channel of one live viewer.
///
/// Chunks are pushed over an unbounded channel so a slow viewer can never
/// stall the broadcast loop; a closed channel marks the viewer dead and gets
/// it pruned on the next write.
pub type ViewerSink = mpsc::UnboundedSender<Bytes>;

/// Handle for attaching viewers to a running [`LogBroadcaster`].
#[derive(Clone)]
pub struct BroadcastHandle {
    viewers: mpsc::UnboundedSender<ViewerSink>,
}

// === impl BroadcastHandle ===

impl BroadcastHandle {
    /// Registers a new viewer and returns its chunk stream.
    ///
    /// The viewer first receives the buffered history, then every chunk
    /// produced after it joined, in input order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        // a stopped broadcaster just yields an empty stream
        let _ = self.viewers.send(tx);
        rx
    }
}

/// Drives one input stream into all subscribed viewers, replaying a bounded
/// history to late joiners.
///
/// Protocol per iteration: drain the new-viewer queue (each newcomer gets the
/// history replay before going live), pull one chunk from the input, forward
/// it to every live viewer pruning the dead ones, append it to the history.
pub struct LogBroadcaster {
    source: mpsc::Receiver<Bytes>,
    incoming: mpsc::UnboundedReceiver<ViewerSink>,
    incoming_done: bool,
    viewers: Vec<ViewerSink>,
    history: RingWriter,
    on_shutdown: Shutdown,
}

// === impl LogBroadcaster ===

impl LogBroadcaster {
    /// Creates a broadcaster over `source` with `capacity` chunks of replay
    /// history.
    pub fn new(
        source: mpsc::Receiver<Bytes>,
        capacity: usize,
        on_shutdown: Shutdown,
    ) -> (Self, BroadcastHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let broadcaster = Self {
            source,
            incoming: rx,
            incoming_done: false,
            viewers: Vec::new(),
            history: RingWriter::new(capacity),
            on_shutdown,
        };
        (broadcaster, BroadcastHandle { viewers: tx })
    }

    /// Runs until the input stream ends or shutdown fires. Dropping the
    /// broadcaster closes every viewer's stream.
    pub async fn run(mut self) {
        enum Step {
            Shutdown,
            Viewer(Option<ViewerSink>),
            Chunk(Option<Bytes>),
        }

        loop {
            self.admit_pending();

            let step = tokio::select! {
                _ = self.on_shutdown.clone() => Step::Shutdown,
                viewer = self.incoming.recv(), if !self.incoming_done => Step::Viewer(viewer),
                chunk = self.source.recv() => Step::Chunk(chunk),
            };

            match step {
                Step::Shutdown => {
                    trace!(target: "logs", "broadcast loop stopping");
                    return;
                }
                Step::Viewer(Some(viewer)) => self.admit(viewer),
                Step::Viewer(None) => self.incoming_done = true,
                Step::Chunk(None) => {
                    trace!(target: "logs", "input stream ended");
                    return;
                }
                Step::Chunk(Some(chunk)) => {
                    self.dispatch(&chunk);
                    self.history.write(&chunk);
                }
            }
        }
    }

    /// Non-blocking drain of the new-viewer queue.
    fn admit_pending(&mut self) {
        while let Ok(viewer) = self.incoming.try_recv() {
            self.admit(viewer);
        }
    }

    /// Replays the history to `viewer` and adds it to the live set.
    fn admit(&mut self, viewer: ViewerSink) {
        for chunk in self.history.replay() {
            if viewer.send(chunk.clone()).is_err() {
                // died before it saw anything
                return;
            }
        }
        self.viewers.push(viewer);
        debug!(target: "logs", viewers = self.viewers.len(), "viewer joined");
    }

    /// Forwards `chunk` to every live viewer, dropping the dead ones.
    fn dispatch(&mut self, chunk: &Bytes) {
        let before = self.viewers.len();
        self.viewers.retain(|viewer| viewer.send(chunk.clone()).is_ok());
        if self.viewers.len() < before {
            debug!(target: "logs", dropped = before - self.viewers.len(), "pruned dead viewers");
        }
    }
}
