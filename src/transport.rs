//! Raw socket ownership and event forwarding.
//!
//! The transport owns the TCP stream, performs connect-with-timeout,
//! and exposes a chunked, deadline-bounded write. A spawned reader task
//! forwards the four stream events (data, end, error, close) over a
//! channel to the dispatch loop, each exactly once per occurrence; no
//! event is synthesized for a clean write.
//!
//! Writes are chunked to the negotiated maximum payload because the
//! server advertises that limit only after connection; each chunk is
//! independently flushed and the whole write fails on the first failed
//! chunk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Error, Result};

const READ_CHUNK: usize = 8 * 1024;

/// Stream events forwarded to the dispatch layer.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Data(Bytes),
    /// Remote side finished sending.
    End,
    Error(String),
    /// The stream is gone, regardless of which side tore it down.
    Closed,
}

/// Owns the socket write half; the read half lives in the reader task.
#[derive(Debug)]
pub struct Transport {
    writer: OwnedWriteHalf,
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: Arc<AtomicBool>,
    closed: bool,
    reader: JoinHandle<()>,
}

impl Transport {
    /// Open a TCP stream, failing on refusal or after `timeout`.
    ///
    /// Returns the transport plus the receiving end of its event
    /// channel.
    pub async fn connect(
        address: &str,
        timeout: Duration,
    ) -> Result<(Transport, mpsc::UnboundedReceiver<TransportEvent>)> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| Error::Connection(format!("connect to {address} timed out")))?
            .map_err(|e| Error::Connection(format!("connect to {address} failed: {e}")))?;

        stream
            .set_nodelay(true)
            .map_err(|e| Error::Connection(e.to_string()))?;

        let (read_half, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_loop(read_half, tx.clone(), Arc::clone(&connected)));

        let transport = Transport {
            writer,
            events: tx,
            connected,
            closed: false,
            reader,
        };
        Ok((transport, rx))
    }

    /// Write a frame, chunked to `max_payload`, each chunk flushed
    /// under `write_timeout`.
    ///
    /// Remains usable after the remote stops sending (half-open
    /// socket); only an explicit `close` or a failed write shuts the
    /// write path down.
    pub async fn write(
        &mut self,
        bytes: &[u8],
        max_payload: usize,
        write_timeout: Duration,
    ) -> Result<()> {
        if self.closed {
            return Err(Error::Connection("not connected".to_string()));
        }

        for chunk in bytes.chunks(max_payload.max(1)) {
            tokio::time::timeout(write_timeout, async {
                self.writer.write_all(chunk).await?;
                self.writer.flush().await
            })
            .await
            .map_err(|_| Error::Connection("write timed out".to_string()))?
            .map_err(|e| {
                self.closed = true;
                self.connected.store(false, Ordering::SeqCst);
                Error::Connection(format!("write failed: {e}"))
            })?;
        }

        Ok(())
    }

    /// Reflects the socket state as observed by the reader and writer.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Tear the socket down. Idempotent; emits `Closed` once across
    /// both teardown paths (explicit close and remote EOF).
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        let _ = self.writer.shutdown().await;
        self.reader.abort();
        if was_connected {
            let _ = self.events.send(TransportEvent::Closed);
        }
        debug!("transport closed");
    }
}

async fn read_loop(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        match read_half.read(&mut chunk).await {
            Ok(0) => {
                let _ = events.send(TransportEvent::End);
                break;
            }
            Ok(n) => {
                let _ = events.send(TransportEvent::Data(Bytes::copy_from_slice(&chunk[..n])));
            }
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.to_string()));
                break;
            }
        }
    }

    if connected.swap(false, Ordering::SeqCst) {
        let _ = events.send(TransportEvent::Closed);
    }
}
