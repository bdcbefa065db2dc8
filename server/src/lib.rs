//! # Chat Server Library
//!
//! Single-process TCP chat server. Clients connect, announce a display name,
//! and every chat line one of them sends is relayed to all the others.
//!
//! ## Architecture
//!
//! ### Single-Owner Event Loop
//! [`network::Server`] is driven by one task that owns the client registry
//! outright. It waits on two sources at once, the listening socket and a
//! queue of connection events, and handles whichever is ready. No other code
//! mutates the registry, so there are no locks.
//!
//! ### Per-Connection Tasks
//! Each admitted connection gets a reader task and a writer task
//! ([`connection`]). The reader waits for readiness and then drains the socket
//! until it would block, forwarding every decoded frame in order. The writer
//! drains a bounded outbox.
//!
//! ### Best-Effort Broadcast
//! A chat line is encoded once and offered to every other client's outbox
//! ([`broadcast`]). A client that is not keeping up misses messages instead
//! of stalling the server.
//!
//! ## Module Organization
//!
//! - `registry`: bounded roster of connected clients and their names
//! - `connection`: reader/writer tasks and connection rejection
//! - `broadcast`: chat fan-out
//! - `network`: listener, acceptor and event loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use chatty_server::network::Server;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> std::io::Result<()> {
//!     let mut server = Server::bind("0.0.0.0:6741".parse().unwrap(), 10).await?;
//!     server.run().await
//! }
//! ```

pub mod broadcast;
pub mod connection;
pub mod network;
pub mod registry;
