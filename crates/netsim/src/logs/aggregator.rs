//! Line-safe merging of many event log readers

use bytes::Bytes;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    sync::mpsc,
};
use tracing::trace;

/// Chunks in flight before line workers start backing up.
const CHANNEL_CAPACITY: usize = 256;

/// Merges any number of byte readers into one serial chunk stream without
/// ever splitting a line across sources.
///
/// Every mixed-in reader gets a worker that reads one full newline-terminated
/// line at a time and forwards it as a single chunk. The shared channel
/// serializes the workers, so a line can never interleave with bytes from
/// another source; it is bounded, so one slow consumer of the merged stream
/// backs all workers up.
///
/// The merged stream ends once every clone of the aggregator is dropped and
/// the remaining workers have hit EOF.
#[derive(Clone)]
pub struct LineAggregator {
    tx: mpsc::Sender<Bytes>,
}

// === impl LineAggregator ===

impl LineAggregator {
    /// Creates the aggregator and hands out the merged stream.
    pub fn new() -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    /// Consumes `reader` line by line on its own worker until EOF or error.
    pub fn mix_reader<R>(&self, reader: R)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut line = Vec::with_capacity(512);
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line).await {
                    // source is done
                    Ok(0) => return,
                    Err(err) => {
                        trace!(target: "logs", %err, "log source failed");
                        return;
                    }
                    Ok(_) => {}
                }
                if tx.send(Bytes::copy_from_slice(&line)).await.is_err() {
                    // merged stream is gone
                    return;
                }
            }
        });
    }
}
