//! Bounded roster of connected chat clients
//!
//! The registry is owned by the server loop and is the only place a
//! connection's resources live once it has been admitted:
//! - its display name, empty until the client announces one
//! - its outbox, the bounded queue drained by the connection's writer task
//! - the handles of its reader and writer tasks, which own the two socket halves
//!
//! Dropping an entry therefore closes the connection: both tasks are aborted,
//! which drops the socket halves even if the writer is stuck on a peer that
//! stopped reading.

use chatty_shared::{truncate_utf8, MAX_NAME_LEN};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Server-assigned connection identifier. Never reused within a process.
pub type ClientId = u64;

/// Queue of encoded frames waiting to be written to one client.
pub type Outbox = mpsc::Sender<Arc<[u8]>>;

/// Returned by [`ClientRegistry::name_of`] for ids that are not registered.
pub const UNKNOWN_NAME: &str = "<unknown>";

/// A registered connection
#[derive(Debug)]
pub struct Peer {
    name: String,
    outbox: Outbox,
    tasks: Vec<JoinHandle<()>>,
}

impl Peer {
    fn new(outbox: Outbox) -> Self {
        Self {
            name: String::new(),
            outbox,
            tasks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Capacity-checked map of connected clients
///
/// Iteration order is unspecified; the only iteration offered is "every
/// client except one", which is all broadcasting needs.
#[derive(Debug)]
pub struct ClientRegistry {
    peers: HashMap<ClientId, Peer>,
    capacity: usize,
}

impl ClientRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            peers: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    /// Adds a client with an empty name.
    ///
    /// Returns false, leaving the registry untouched, if it is full or the id
    /// is already registered.
    pub fn insert(&mut self, id: ClientId, outbox: Outbox) -> bool {
        if self.is_full() || self.peers.contains_key(&id) {
            return false;
        }
        self.peers.insert(id, Peer::new(outbox));
        true
    }

    /// Ties a connection task to a registered client so that removing the
    /// client also stops the task. The task is aborted right away if the
    /// client is not registered.
    pub fn attach_task(&mut self, id: ClientId, task: JoinHandle<()>) {
        match self.peers.get_mut(&id) {
            Some(peer) => peer.tasks.push(task),
            None => task.abort(),
        }
    }

    /// Removes a client. Absent ids are a no-op returning `None`.
    pub fn remove(&mut self, id: ClientId) -> Option<Peer> {
        self.peers.remove(&id)
    }

    pub fn name_of(&self, id: ClientId) -> &str {
        self.peers
            .get(&id)
            .map(|peer| peer.name.as_str())
            .unwrap_or(UNKNOWN_NAME)
    }

    /// Stores a display name, truncated to `MAX_NAME_LEN` bytes.
    ///
    /// Returns the stored name, or `None` if the id is not registered.
    pub fn set_name(&mut self, id: ClientId, text: &str) -> Option<&str> {
        let peer = self.peers.get_mut(&id)?;
        peer.name.clear();
        peer.name.push_str(truncate_utf8(text, MAX_NAME_LEN));
        Some(&peer.name)
    }

    /// Calls `f` for every registered client other than `excluded`.
    pub fn for_each_except<F>(&self, excluded: ClientId, mut f: F)
    where
        F: FnMut(ClientId, &Peer),
    {
        for (&id, peer) in &self.peers {
            if id != excluded {
                f(id, peer);
            }
        }
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.peers.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
