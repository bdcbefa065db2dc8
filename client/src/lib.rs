//! # Chat Client Library
//!
//! Console client for the chat server. It connects over TCP, checks whether
//! the server turned it away, announces a display name, and then sends each
//! line the user types while printing everything other clients say.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Connection handling and framing:
//! - Length-prefixed frame reading and writing
//! - Post-connect check for `SERVER_FULL` / `SERVER_ERROR`
//! - Background receive task feeding the display
//!
//! ### Input Module (`input`)
//! Line-based console input, server address parsing and cleanup of names
//! and messages before they are sent.
//!
//! ### Display Module (`display`)
//! Prints chat lines, server status and disconnect notices.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use chatty_client::input::InputReader;
//! use chatty_client::network::{Client, Handshake};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let mut client = Client::connect("127.0.0.1:6741".parse().unwrap()).await?;
//!     if let Handshake::Rejected(status) = client.handshake(Duration::from_millis(250)).await? {
//!         eprintln!("Server: {}", status);
//!         return Ok(());
//!     }
//!     client.run("Alice", InputReader::stdin()).await
//! }
//! ```

pub mod display;
pub mod input;
pub mod network;
