//! Chat fan-out to every client but the sender

use crate::registry::{ClientId, ClientRegistry};
use chatty_shared::{encode_frame, truncate_utf8, CodecError, MessageFrame, ServerFrame, MAX_TEXT_LEN};
use log::{debug, error};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;

/// Outcome of one broadcast, counted per recipient
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Frames queued on a recipient's outbox
    pub delivered: usize,
    /// Recipients whose outbox was full; the frame was skipped for them
    pub dropped: usize,
    /// Recipients whose writer had already stopped
    pub failed: usize,
}

/// Builds the `"<name>: <text>"` line, cut to fit a frame.
pub fn format_chat_line(sender_name: &str, text: &str) -> String {
    let line = format!("{}: {}", sender_name, text);
    truncate_utf8(&line, MAX_TEXT_LEN).to_owned()
}

/// Queues one chat frame on every registered client except `sender`.
///
/// Delivery is best effort. A recipient whose outbox is full misses this
/// message and nothing is retried; a recipient whose writer is gone is
/// logged. Neither affects the remaining recipients.
pub fn broadcast_chat(
    registry: &ClientRegistry,
    sender: ClientId,
    sender_name: &str,
    text: &str,
) -> Result<BroadcastReport, CodecError> {
    let frame = MessageFrame::chat(&format_chat_line(sender_name, text));
    let bytes: Arc<[u8]> = encode_frame(&ServerFrame::Message(frame))?.into();

    let mut report = BroadcastReport::default();
    registry.for_each_except(sender, |id, peer| {
        match peer.outbox().try_send(Arc::clone(&bytes)) {
            Ok(()) => report.delivered += 1,
            Err(TrySendError::Full(_)) => {
                debug!("Outbox of client {} is full, skipping message", id);
                report.dropped += 1;
            }
            Err(TrySendError::Closed(_)) => {
                error!(
                    "Failed to broadcast message to client {} '{}': connection closed",
                    id,
                    peer.name()
                );
                report.failed += 1;
            }
        }
    });

    Ok(report)
}
