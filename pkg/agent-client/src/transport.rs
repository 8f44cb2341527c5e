//! Length-prefixed JSON frame transport over a `tokio` `UnixStream`,
//! grounded on the host's hand-rolled `ipc.rs` exec-forwarding protocol but
//! generalized to typed, sequence-correlated calls instead of a single
//! NUL-delimited command line.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::{oneshot, Mutex};

use hypercell_constants::agent::MAX_MESSAGE_SIZE;

use crate::error::{AgentError, Result};
use crate::protocol::{RequestEnvelope, ResponseEnvelope};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<ResponseEnvelope>>>>;

/// A connected channel to a guest agent. Owns a background task that
/// demultiplexes inbound frames to the caller awaiting that `seq`.
pub struct AgentTransport {
    writer: Mutex<tokio::net::unix::OwnedWriteHalf>,
    pending: PendingMap,
    next_seq: AtomicU64,
    reader_task: tokio::task::JoinHandle<()>,
}

impl AgentTransport {
    pub fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_task = tokio::spawn(Self::read_loop(read_half, Arc::clone(&pending)));

        Self { writer: Mutex::new(write_half), pending, next_seq: AtomicU64::new(1), reader_task }
    }

    async fn read_loop(mut reader: tokio::net::unix::OwnedReadHalf, pending: PendingMap) {
        loop {
            match read_frame(&mut reader).await {
                Ok(bytes) => match serde_json::from_slice::<ResponseEnvelope>(&bytes) {
                    Ok(envelope) => {
                        if let Some(tx) = pending.lock().await.remove(&envelope.seq) {
                            let _ = tx.send(envelope);
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "malformed agent response frame"),
                },
                Err(_) => {
                    // Transport closed: wake every still-pending caller with Unavailable
                    // by dropping their sender — recv() on the other end observes this.
                    pending.lock().await.clear();
                    return;
                }
            }
        }
    }

    /// Issue a call and await its response, or `Unavailable` if the
    /// transport closes before a response arrives.
    pub async fn call(&self, method: &'static str, params: Value) -> Result<Value> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(seq, tx);

        let envelope = RequestEnvelope { seq, method, params };
        let body = serde_json::to_vec(&envelope)?;

        {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, &body).await?;
        }

        let response = rx.await.map_err(|_| AgentError::Unavailable)?;
        if response.ok {
            Ok(response.result)
        } else {
            Err(AgentError::Agent { status: response.status, message: response.message })
        }
    }
}

impl Drop for AgentTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(AgentError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame too large")));
    }
    writer.write_all(&(body.len() as u32).to_le_bytes()).await?;
    writer.write_all(body).await?;
    Ok(())
}

async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(AgentError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, "frame exceeds max message size")));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}
