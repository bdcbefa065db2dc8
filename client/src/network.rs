use crate::display::{self, Display, DisplayEvent};
use crate::input::{self, InputReader};
use chatty_shared::{encode_frame, FrameDecoder, FrameKind, MessageFrame, ServerFrame, ServerStatus};
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

const READ_CHUNK: usize = 1024;

/// Reads whole frames from a byte stream
pub struct FrameReader<R> {
    inner: R,
    decoder: FrameDecoder,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
        }
    }

    /// Waits for the next complete frame.
    ///
    /// Returns `Ok(None)` when the stream ends between frames and an
    /// `UnexpectedEof` error when it ends inside one. Cancel safe: bytes
    /// already read stay buffered for the next call.
    pub async fn next_frame<T: DeserializeOwned>(&mut self) -> io::Result<Option<T>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                return Ok(Some(frame));
            }

            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                if self.decoder.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a frame",
                ));
            }
            self.decoder.extend(&chunk[..n]);
        }
    }
}

/// Encodes `frame` and writes it out in full.
pub async fn send_frame<W, T>(writer: &mut W, frame: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes).await
}

/// Forwards everything the server sends to the display until the connection
/// ends.
pub async fn receive_loop<R: AsyncRead + Unpin>(
    mut reader: FrameReader<R>,
    display: mpsc::UnboundedSender<DisplayEvent>,
) {
    loop {
        let event = match reader.next_frame::<ServerFrame>().await {
            Ok(Some(ServerFrame::Message(frame))) => match frame.kind() {
                FrameKind::Chat => DisplayEvent::Chat(frame.text().to_owned()),
                kind => {
                    debug!("Ignoring {:?} frame from server", kind);
                    continue;
                }
            },
            Ok(Some(ServerFrame::Status(status))) => DisplayEvent::Status(status),
            Ok(None) => {
                let _ = display.send(DisplayEvent::Disconnected);
                return;
            }
            Err(e) => {
                error!("Failed to read from server: {}", e);
                let _ = display.send(DisplayEvent::Disconnected);
                return;
            }
        };

        if display.send(event).is_err() {
            return;
        }
    }
}

/// Result of the post-connect check for an immediate refusal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Accepted,
    Rejected(ServerStatus),
}

/// A connection to the chat server
pub struct Client {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    early: Vec<DisplayEvent>,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        Ok(Client {
            reader: FrameReader::new(reader),
            writer,
            early: Vec::new(),
        })
    }

    /// Waits once, for at most `grace`, for the server to refuse the
    /// connection. Silence means the connection was admitted.
    ///
    /// Chat that other clients send during the wait is kept and shown once
    /// [`run`](Self::run) starts.
    pub async fn handshake(&mut self, grace: Duration) -> io::Result<Handshake> {
        match timeout(grace, self.reader.next_frame::<ServerFrame>()).await {
            Err(_elapsed) => Ok(Handshake::Accepted),
            Ok(Ok(Some(ServerFrame::Status(status)))) => Ok(Handshake::Rejected(status)),
            Ok(Ok(Some(ServerFrame::Message(frame)))) => {
                if frame.kind() == FrameKind::Chat {
                    self.early.push(DisplayEvent::Chat(frame.text().to_owned()));
                }
                Ok(Handshake::Accepted)
            }
            Ok(Ok(None)) => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "server closed the connection during handshake",
            )),
            Ok(Err(e)) => Err(e),
        }
    }

    /// Announces `name`, then sends every input line as a chat message while
    /// a background task prints what arrives.
    ///
    /// Returns when input is exhausted or the server goes away.
    pub async fn run<R>(self, name: &str, mut input: InputReader<R>) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let Client {
            reader,
            mut writer,
            early,
        } = self;

        send_frame(&mut writer, &MessageFrame::connect(name)).await?;
        info!("Joined chat as '{}'", name);

        let (display_tx, display_rx) = mpsc::unbounded_channel();
        for event in early {
            let _ = display_tx.send(event);
        }

        let render = tokio::spawn(display::render_loop(Display::new(io::stdout()), display_rx));
        let mut receiver = tokio::spawn(receive_loop(reader, display_tx));

        loop {
            tokio::select! {
                line = input.next_line() => {
                    match line? {
                        Some(line) => {
                            let text = input::sanitize_message(&line);
                            if text.is_empty() {
                                continue;
                            }
                            if let Err(e) = send_frame(&mut writer, &MessageFrame::chat(&text)).await {
                                warn!("Failed to send message: {}", e);
                                break;
                            }
                        }
                        None => {
                            debug!("Input closed");
                            break;
                        }
                    }
                }

                _ = &mut receiver => break,
            }
        }

        receiver.abort();
        let _ = render.await;
        let _ = writer.shutdown().await;
        Ok(())
    }
}
