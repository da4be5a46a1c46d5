//! Single writer task for an agent's stdin.
//!
//! All outbound messages for one agent go through one task, so every line is
//! written whole before the next one starts and partial writes from different
//! callers can never interleave.

use futures_util::SinkExt;
use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};

use crate::protocol::codec::LineCodec;

/// Cloneable sender side of a writer task.
///
/// Dropping every handle closes the agent's stdin once queued lines are
/// flushed.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<Value>,
}

impl WriterHandle {
    /// Queue `msg` for delivery.
    ///
    /// Returns `false` when the writer has stopped (stdin closed or a previous
    /// write failed). Never blocks.
    #[must_use]
    pub fn send(&self, msg: Value) -> bool {
        self.tx.send(msg).is_ok()
    }
}

/// Spawn the writer task over `stdin`.
///
/// The task exits when every [`WriterHandle`] is dropped, or on the first
/// failed write (logged at `WARN`); either way stdin is closed on exit.
#[must_use]
pub fn spawn_writer<W>(session_id: String, stdin: W) -> (WriterHandle, JoinHandle<()>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_writer(session_id, stdin, rx));
    (WriterHandle { tx }, handle)
}

async fn run_writer<W>(session_id: String, stdin: W, mut msg_rx: mpsc::UnboundedReceiver<Value>)
where
    W: AsyncWrite + Send + Unpin,
{
    let mut framed = FramedWrite::new(stdin, LineCodec::new());

    while let Some(msg) = msg_rx.recv().await {
        if let Err(e) = framed.send(msg).await {
            warn!(session_id, error = %e, "writer: write to agent stdin failed, stopping");
            return;
        }
    }

    debug!(session_id, "writer: all handles dropped, closing agent stdin");
    if let Err(e) = SinkExt::<Value>::close(&mut framed).await {
        debug!(session_id, error = %e, "writer: error while closing agent stdin");
    }
}
