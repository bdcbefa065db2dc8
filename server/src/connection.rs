//! Per-connection I/O tasks
//!
//! Every admitted connection is split in two. The read half belongs to a
//! reader task that turns bytes into [`ServerEvent`]s for the server loop; the
//! write half belongs to a writer task that drains the connection's outbox.
//! Neither task touches the registry; both report failures to the server
//! loop, which evicts the client.

use crate::registry::ClientId;
use chatty_shared::{encode_frame, FrameDecoder, MessageFrame, ServerFrame, ServerStatus};
use log::{debug, error, warn};
use std::io;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

const READ_CHUNK: usize = 4096;

/// Messages sent from connection tasks to the server loop
#[derive(Debug)]
pub enum ServerEvent {
    Frame { id: ClientId, frame: MessageFrame },
    Closed { id: ClientId },
    ReadFailed { id: ClientId, error: io::Error },
    WriteFailed { id: ClientId, error: io::Error },
}

/// Reads frames from one client until the stream ends or fails.
///
/// Readiness is treated as edge-triggered: after each wake-up the socket is
/// read until it would block, so no buffered bytes are left behind waiting
/// for a notification that will not come. Every complete frame is forwarded
/// in stream order. The task ends after reporting `Closed` or `ReadFailed`,
/// or when the server loop is gone.
pub async fn read_loop(id: ClientId, reader: OwnedReadHalf, events: mpsc::UnboundedSender<ServerEvent>) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        if let Err(error) = reader.readable().await {
            let _ = events.send(ServerEvent::ReadFailed { id, error });
            return;
        }

        loop {
            match reader.try_read(&mut chunk) {
                Ok(0) => {
                    let _ = events.send(ServerEvent::Closed { id });
                    return;
                }
                Ok(n) => {
                    decoder.extend(&chunk[..n]);
                    if let Err(error) = forward_frames(id, &mut decoder, &events) {
                        let _ = events.send(ServerEvent::ReadFailed { id, error });
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    let _ = events.send(ServerEvent::ReadFailed { id, error });
                    return;
                }
            }
        }
    }
}

/// Sends every complete frame in `decoder` to the server loop.
fn forward_frames(
    id: ClientId,
    decoder: &mut FrameDecoder,
    events: &mpsc::UnboundedSender<ServerEvent>,
) -> io::Result<()> {
    while let Some(frame) = decoder.next_frame::<MessageFrame>()? {
        if events.send(ServerEvent::Frame { id, frame }).is_err() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "server loop is no longer running",
            ));
        }
    }
    Ok(())
}

/// Writes queued frames to one client in order.
///
/// Stops on the first write error and reports it as `WriteFailed`. When the
/// outbox closes the write side is shut down.
pub async fn write_loop(
    id: ClientId,
    mut writer: OwnedWriteHalf,
    mut outbox: mpsc::Receiver<Arc<[u8]>>,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    while let Some(bytes) = outbox.recv().await {
        if let Err(error) = writer.write_all(&bytes).await {
            warn!("Failed to write to client {}: {}", id, error);
            let _ = events.send(ServerEvent::WriteFailed { id, error });
            return;
        }
    }

    debug!("Outbox of client {} closed, shutting down writer", id);
    let _ = writer.shutdown().await;
}

/// Tells a connection why it is being refused, then closes it.
///
/// Runs on its own task so a slow peer cannot hold up the server loop.
pub fn reject(mut stream: TcpStream, status: ServerStatus) {
    let bytes = match encode_frame(&ServerFrame::Status(status)) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to encode {} status frame: {}", status, e);
            return;
        }
    };

    tokio::spawn(async move {
        if let Err(e) = stream.write_all(&bytes).await {
            debug!("Failed to send {} to rejected connection: {}", status, e);
        }
        let _ = stream.shutdown().await;
    });
}
