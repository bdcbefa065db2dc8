//! Console output for everything the server sends

use chatty_shared::ServerStatus;
use log::warn;
use std::io::{self, Write};
use tokio::sync::mpsc;

/// Something worth showing to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    Chat(String),
    Status(ServerStatus),
    Disconnected,
}

/// Renders [`DisplayEvent`]s as lines on a writer
pub struct Display<W> {
    out: W,
}

impl<W: Write> Display<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn show(&mut self, event: &DisplayEvent) -> io::Result<()> {
        match event {
            DisplayEvent::Chat(line) => writeln!(self.out, "{}", line)?,
            DisplayEvent::Status(status) => writeln!(self.out, "Server: {}", status)?,
            DisplayEvent::Disconnected => writeln!(self.out, "Connection closed by server")?,
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Shows events until the sending side goes away or the server disconnects.
pub async fn render_loop<W: Write>(
    mut display: Display<W>,
    mut events: mpsc::UnboundedReceiver<DisplayEvent>,
) -> Display<W> {
    while let Some(event) = events.recv().await {
        if let Err(e) = display.show(&event) {
            warn!("Failed to write to console: {}", e);
        }
        if event == DisplayEvent::Disconnected {
            break;
        }
    }
    display
}
