//! Per-node translation of raw daemon records into visualization events

use netsim_core::{translate, EventRecord, VizEvent};
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, DuplexStream},
    sync::Mutex,
};
use tracing::trace;

/// Bytes buffered between the translation task and the merged stream.
const PIPE_CAPACITY: usize = 16 * 1024;

/// Translates one daemon's event log into visualization events.
///
/// The daemon's log tail is consumed by a background task; the returned
/// stream side carries the translated newline-delimited events and is meant
/// to be mixed into the [`LineAggregator`](super::LineAggregator).
/// Out-of-band events such as membership changes can be injected with
/// [`write_event`](Self::write_event).
///
/// Translation never fails: malformed lines are skipped, and the task ends
/// quietly when the daemon exits or the stream side is dropped.
pub struct NodeLogger {
    id: String,
    sink: Arc<Mutex<DuplexStream>>,
}

// === impl NodeLogger ===

impl NodeLogger {
    /// Spawns the translation task over `tail` and returns the logger plus
    /// its merged-stream side.
    pub fn new<R>(id: String, tail: R) -> (Self, DuplexStream)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (sink, output) = tokio::io::duplex(PIPE_CAPACITY);
        let sink = Arc::new(Mutex::new(sink));
        let logger = Self { id: id.clone(), sink: sink.clone() };
        tokio::spawn(transform(id, tail, sink));
        (logger, output)
    }

    /// The identity of the node this logger belongs to.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Injects an event into this node's stream.
    pub async fn write_event(&self, event: &VizEvent) -> std::io::Result<()> {
        write_line(&self.sink, event).await
    }
}

/// Writes one serialized event as a whole line.
///
/// The sink lock is held across the entire line so concurrent writers cannot
/// split it.
async fn write_line(sink: &Mutex<DuplexStream>, event: &VizEvent) -> std::io::Result<()> {
    let Ok(mut line) = serde_json::to_vec(event) else { return Ok(()) };
    line.push(b'\n');
    let mut sink = sink.lock().await;
    sink.write_all(&line).await
}

/// Reads raw records off `tail` and emits their translations until either
/// side goes away.
async fn transform<R>(id: String, tail: R, sink: Arc<Mutex<DuplexStream>>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(tail).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            // daemon is gone
            Ok(None) | Err(_) => return,
        };
        if line.trim().is_empty() {
            continue;
        }

        let record: EventRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(err) => {
                trace!(target: "logs", %err, "skipping malformed record");
                continue;
            }
        };

        for event in translate(&id, &record) {
            if write_line(&sink, &event).await.is_err() {
                // merged stream side is gone
                return;
            }
        }
    }
}
