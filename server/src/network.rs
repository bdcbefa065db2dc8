//! Server network layer: accepting connections and running the event loop

use crate::broadcast::broadcast_chat;
use crate::connection::{self, ServerEvent};
use crate::registry::{ClientId, ClientRegistry};
use chatty_shared::{FrameKind, MessageFrame, ServerStatus};
use log::{debug, error, info, warn};
use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::task::Poll;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;

/// Frames a client may have queued before broadcasts to it start being dropped.
pub const OUTBOX_CAPACITY: usize = 32;

/// Requested listen backlog; the kernel clamps it to its own maximum.
const LISTEN_BACKLOG: u32 = i32::MAX as u32;

/// Single-owner chat server
///
/// One task runs [`Server::run`] and is the only code that touches the
/// registry. Connection tasks report to it through an unbounded event queue;
/// it talks back to them only through their bounded outboxes, so nothing it
/// does can block on a slow client.
pub struct Server {
    listener: TcpListener,
    registry: ClientRegistry,
    next_client_id: ClientId,

    // Communication channels
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Server {
    /// Binds the listening socket.
    ///
    /// Any failure here is fatal to the server and is returned as is.
    pub async fn bind(addr: SocketAddr, max_clients: usize) -> io::Result<Self> {
        if max_clients == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "max_clients must be greater than 0",
            ));
        }

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        info!("Server listening on {}", listener.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            registry: ClientRegistry::new(max_clients),
            next_client_id: 1,
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of currently registered clients
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    pub fn max_clients(&self) -> usize {
        self.registry.capacity()
    }

    /// Serves clients until an unrecoverable error occurs.
    pub async fn run(&mut self) -> io::Result<()> {
        info!(
            "Server started (max {} clients)",
            self.registry.capacity()
        );

        loop {
            self.turn().await?;
        }
    }

    /// Waits for the next piece of work and handles it.
    ///
    /// Either the listener has connections ready, which are all accepted, or
    /// a connection task has reported something. Cancelling a pending turn
    /// loses nothing.
    pub async fn turn(&mut self) -> io::Result<()> {
        tokio::select! {
            accepted = self.listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        self.admit(stream, addr);
                        self.accept_pending().await;
                    }
                    Err(e) => error!("Failed to accept client: {}", e),
                }
            }

            event = self.event_rx.recv() => {
                match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        return Err(io::Error::new(
                            io::ErrorKind::BrokenPipe,
                            "connection event queue closed",
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    /// Accepts connections until the listener would block.
    ///
    /// A connection that failed between the handshake and `accept` is logged
    /// and skipped. Any other accept error ends this drain, since it
    /// would repeat on every retry (for example, out of file descriptors).
    async fn accept_pending(&mut self) {
        loop {
            let ready = poll_fn(|cx| match self.listener.poll_accept(cx) {
                Poll::Ready(result) => Poll::Ready(Some(result)),
                Poll::Pending => Poll::Ready(None),
            })
            .await;

            match ready {
                Some(Ok((stream, addr))) => self.admit(stream, addr),
                Some(Err(e)) if is_per_connection_error(&e) => {
                    warn!("Failed to accept client: {}", e);
                }
                Some(Err(e)) => {
                    error!("Failed to accept client: {}", e);
                    break;
                }
                None => break,
            }
        }
    }

    /// Registers an accepted connection or refuses it with a status frame.
    fn admit(&mut self, stream: TcpStream, addr: SocketAddr) {
        let id = self.next_client_id;
        self.next_client_id += 1;
        info!("Incoming connection from {} (client {})", addr, id);

        if let Err(e) = stream.set_nodelay(true) {
            error!("Failed to set up connection for client {}: {}", id, e);
            connection::reject(stream, ServerStatus::ServerError);
            return;
        }

        let (outbox, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        if !self.registry.insert(id, outbox) {
            warn!(
                "Cannot add client {} because the server is full ({}/{})",
                id,
                self.registry.len(),
                self.registry.capacity()
            );
            connection::reject(stream, ServerStatus::ServerFull);
            return;
        }

        let (reader, writer) = stream.into_split();
        let writer = tokio::spawn(connection::write_loop(
            id,
            writer,
            outbox_rx,
            self.event_tx.clone(),
        ));
        let reader = tokio::spawn(connection::read_loop(id, reader, self.event_tx.clone()));
        self.registry.attach_task(id, writer);
        self.registry.attach_task(id, reader);

        debug!(
            "Client {} registered ({}/{} clients)",
            id,
            self.registry.len(),
            self.registry.capacity()
        );
    }

    fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Frame { id, frame } => self.handle_frame(id, frame),
            ServerEvent::Closed { id } => {
                if self.registry.contains(id) {
                    info!("Client {} '{}' disconnected", id, self.registry.name_of(id));
                }
                self.evict(id);
            }
            ServerEvent::ReadFailed { id, error } => {
                if self.registry.contains(id) {
                    error!(
                        "Failed to read from client {} '{}': {}",
                        id,
                        self.registry.name_of(id),
                        error
                    );
                }
                self.evict(id);
            }
            ServerEvent::WriteFailed { id, error } => {
                if self.registry.contains(id) {
                    error!(
                        "Failed to write to client {} '{}': {}",
                        id,
                        self.registry.name_of(id),
                        error
                    );
                }
                self.evict(id);
            }
        }
    }

    fn handle_frame(&mut self, id: ClientId, frame: MessageFrame) {
        if !self.registry.contains(id) {
            debug!("Ignoring frame from evicted client {}", id);
            return;
        }

        match frame.kind() {
            FrameKind::Chat => {
                let sender_name = self.registry.name_of(id).to_owned();
                info!("{} says: {}", sender_name, frame.text());

                match broadcast_chat(&self.registry, id, &sender_name, frame.text()) {
                    Ok(report) => debug!(
                        "Broadcast from client {}: {} delivered, {} dropped, {} failed",
                        id, report.delivered, report.dropped, report.failed
                    ),
                    Err(e) => error!("Failed to encode broadcast from client {}: {}", id, e),
                }
            }
            FrameKind::Connect => {
                if let Some(name) = self.registry.set_name(id, frame.text()) {
                    info!("Client {} '{}' connected", id, name);
                }
            }
            FrameKind::None => debug!("Ignoring empty frame from client {}", id),
        }
    }

    /// Drops a client and everything tied to it. Returns false if the client
    /// was already gone.
    fn evict(&mut self, id: ClientId) -> bool {
        match self.registry.remove(id) {
            Some(peer) => {
                debug!(
                    "Evicted client {} ({}/{} clients)",
                    id,
                    self.registry.len(),
                    self.registry.capacity()
                );
                drop(peer);
                true
            }
            None => false,
        }
    }
}

/// Accept errors that concern only the connection being accepted.
fn is_per_connection_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatty_shared::{encode_frame, FrameDecoder, ServerFrame};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    async fn test_server(max_clients: usize) -> Server {
        Server::bind("127.0.0.1:0".parse().unwrap(), max_clients)
            .await
            .unwrap()
    }

    /// Runs turns until `done` holds or the deadline passes.
    async fn drive_until<F>(server: &mut Server, mut done: F)
    where
        F: FnMut(&Server) -> bool,
    {
        for _ in 0..200 {
            if done(&*server) {
                return;
            }
            let _ = timeout(Duration::from_millis(20), server.turn()).await;
        }
        assert!(done(&*server), "server did not reach the expected state");
    }

    async fn read_server_frame(stream: &mut TcpStream) -> Option<ServerFrame> {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 512];
        loop {
            if let Some(frame) = decoder.next_frame().unwrap() {
                return Some(frame);
            }
            let n = timeout(Duration::from_secs(2), stream.read(&mut buf))
                .await
                .ok()?
                .ok()?;
            if n == 0 {
                return None;
            }
            decoder.extend(&buf[..n]);
        }
    }

    async fn send(stream: &mut TcpStream, frame: &MessageFrame) {
        stream.write_all(&encode_frame(frame).unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_rejects_zero_capacity() {
        let result = Server::bind("127.0.0.1:0".parse().unwrap(), 0).await;
        assert_eq!(result.err().unwrap().kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_bind_reports_address_and_capacity() {
        let server = test_server(3).await;
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.max_clients(), 3);
        assert_eq!(server.client_count(), 0);
    }

    #[tokio::test]
    async fn test_accepts_until_capacity_then_rejects() {
        let mut server = test_server(10).await;
        let addr = server.local_addr().unwrap();

        let mut clients = Vec::new();
        for _ in 0..10 {
            clients.push(TcpStream::connect(addr).await.unwrap());
        }
        drive_until(&mut server, |s| s.client_count() == 10).await;

        let mut overflow = TcpStream::connect(addr).await.unwrap();
        let mut rejected = None;
        for _ in 0..50 {
            let _ = timeout(Duration::from_millis(20), server.turn()).await;
            if let Ok(frame) = timeout(Duration::from_millis(20), read_server_frame(&mut overflow)).await {
                rejected = frame;
                break;
            }
        }

        assert_eq!(rejected, Some(ServerFrame::Status(ServerStatus::ServerFull)));
        assert_eq!(read_server_frame(&mut overflow).await, None);
        assert_eq!(server.client_count(), 10);
    }

    #[tokio::test]
    async fn test_disconnect_evicts_and_frees_slot() {
        let mut server = test_server(2).await;
        let addr = server.local_addr().unwrap();

        let first = TcpStream::connect(addr).await.unwrap();
        let _second = TcpStream::connect(addr).await.unwrap();
        drive_until(&mut server, |s| s.client_count() == 2).await;

        drop(first);
        drive_until(&mut server, |s| s.client_count() == 1).await;

        let _third = TcpStream::connect(addr).await.unwrap();
        drive_until(&mut server, |s| s.client_count() == 2).await;
    }

    #[tokio::test]
    async fn test_connect_frame_sets_name() {
        let mut server = test_server(2).await;
        let addr = server.local_addr().unwrap();

        let mut alice = TcpStream::connect(addr).await.unwrap();
        drive_until(&mut server, |s| s.client_count() == 1).await;

        send(&mut alice, &MessageFrame::connect("Alice")).await;
        drive_until(&mut server, |s| s.registry.name_of(1) == "Alice").await;
    }

    #[tokio::test]
    async fn test_chat_is_broadcast_to_others_only() {
        let mut server = test_server(4).await;
        let addr = server.local_addr().unwrap();

        let mut bob = TcpStream::connect(addr).await.unwrap();
        let mut carol = TcpStream::connect(addr).await.unwrap();
        drive_until(&mut server, |s| s.client_count() == 2).await;

        send(&mut bob, &MessageFrame::connect("Bob")).await;
        send(&mut bob, &MessageFrame::chat("hi")).await;

        let mut received = None;
        for _ in 0..50 {
            let _ = timeout(Duration::from_millis(20), server.turn()).await;
            if let Ok(frame) = timeout(Duration::from_millis(20), read_server_frame(&mut carol)).await {
                received = frame;
                break;
            }
        }

        match received {
            Some(ServerFrame::Message(frame)) => {
                assert_eq!(frame.kind(), FrameKind::Chat);
                assert_eq!(frame.text(), "Bob: hi");
            }
            other => panic!("Unexpected frame: {:?}", other),
        }

        let echoed = timeout(Duration::from_millis(100), read_server_frame(&mut bob)).await;
        assert!(echoed.is_err(), "sender must not receive its own message");
    }

    #[tokio::test]
    async fn test_eviction_is_idempotent() {
        let mut server = test_server(2).await;
        let addr = server.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        drive_until(&mut server, |s| s.client_count() == 1).await;

        assert!(server.evict(1));
        assert!(!server.evict(1));
        assert_eq!(server.client_count(), 0);

        // A late report for the evicted client changes nothing
        server.handle_event(ServerEvent::Closed { id: 1 });
        server.handle_event(ServerEvent::Frame {
            id: 1,
            frame: MessageFrame::connect("Ghost"),
        });
        assert_eq!(server.client_count(), 0);
    }

    #[tokio::test]
    async fn test_read_failure_evicts_client() {
        let mut server = test_server(2).await;
        let addr = server.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        drive_until(&mut server, |s| s.client_count() == 1).await;

        server.handle_event(ServerEvent::ReadFailed {
            id: 1,
            error: io::Error::new(io::ErrorKind::ConnectionReset, "reset"),
        });
        assert_eq!(server.client_count(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_evicts_client() {
        let mut server = test_server(2).await;
        let addr = server.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        drive_until(&mut server, |s| s.client_count() == 1).await;

        server.handle_event(ServerEvent::WriteFailed {
            id: 1,
            error: io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"),
        });
        assert_eq!(server.client_count(), 0);

        // The freed slot is available again
        let _next = TcpStream::connect(addr).await.unwrap();
        drive_until(&mut server, |s| s.client_count() == 1).await;
    }

    #[tokio::test]
    async fn test_eviction_closes_socket_of_stalled_client() {
        const CHUNK: usize = 1 << 20;

        let mut server = test_server(2).await;
        let addr = server.local_addr().unwrap();

        // A client that does not read, with a tiny receive window
        let socket = TcpSocket::new_v4().unwrap();
        socket.set_recv_buffer_size(4096).unwrap();
        let mut stalled = socket.connect(addr).await.unwrap();
        drive_until(&mut server, |s| s.client_count() == 1).await;

        let mut outbox = None;
        server
            .registry
            .for_each_except(0, |_, peer| outbox = Some(peer.outbox().clone()));
        let outbox = outbox.unwrap();

        // Fill the outbox so the writer is parked in the middle of a write
        let chunk: Arc<[u8]> = Arc::from(vec![7u8; CHUNK]);
        let mut queued = 0;
        for _ in 0..OUTBOX_CAPACITY * 2 {
            if outbox.try_send(Arc::clone(&chunk)).is_ok() {
                queued += 1;
            }
            tokio::task::yield_now().await;
        }
        drop(outbox);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(server.evict(1));

        // Only what the kernel already buffered can still arrive before EOF
        let mut received = Vec::new();
        timeout(Duration::from_secs(10), stalled.read_to_end(&mut received))
            .await
            .expect("socket of evicted client was not closed")
            .unwrap();
        assert!(received.len() < queued * CHUNK);
    }

    #[test]
    fn test_per_connection_accept_errors() {
        let aborted = io::Error::new(io::ErrorKind::ConnectionAborted, "aborted");
        let exhausted = io::Error::new(io::ErrorKind::Other, "too many open files");

        assert!(is_per_connection_error(&aborted));
        assert!(!is_per_connection_error(&exhausted));
    }

    #[tokio::test]
    async fn test_none_frame_is_ignored() {
        let mut server = test_server(2).await;
        let addr = server.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        drive_until(&mut server, |s| s.client_count() == 1).await;

        server.handle_event(ServerEvent::Frame {
            id: 1,
            frame: MessageFrame::new(FrameKind::None, "ignored"),
        });
        assert_eq!(server.client_count(), 1);
        assert_eq!(server.registry.name_of(1), "");
    }
}
