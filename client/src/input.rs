//! Console input: prompts, line reading and cleanup of what the user typed

use chatty_shared::{truncate_utf8, MAX_NAME_LEN, MAX_TEXT_LEN};
use std::io::{self, Write};
use std::net::{AddrParseError, IpAddr, SocketAddr};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};

/// Reads the user's input one line at a time
pub struct InputReader<R> {
    lines: Lines<R>,
}

impl InputReader<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin> InputReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// Next line without its line terminator, `None` once input is closed.
    ///
    /// Cancel safe, so it can sit in a `select!` next to network reads.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        self.lines.next_line().await
    }

    /// Prints `question` without a newline and waits for the answer.
    pub async fn prompt(&mut self, question: &str) -> io::Result<Option<String>> {
        print!("{}", question);
        io::stdout().flush()?;
        self.next_line().await
    }
}

/// Accepts either a bare IP address, which gets `default_port`, or `ip:port`.
pub fn parse_server_addr(input: &str, default_port: u16) -> Result<SocketAddr, AddrParseError> {
    let input = input.trim();
    match input.parse::<SocketAddr>() {
        Ok(addr) => Ok(addr),
        Err(_) => input
            .parse::<IpAddr>()
            .map(|ip| SocketAddr::new(ip, default_port)),
    }
}

/// Cleans up a display name: line terminator removed, at most
/// `MAX_NAME_LEN` bytes. Returns `None` if nothing is left.
pub fn sanitize_name(raw: &str) -> Option<String> {
    let name = truncate_utf8(strip_line_end(raw), MAX_NAME_LEN);
    if name.is_empty() {
        None
    } else {
        Some(name.to_owned())
    }
}

/// Strips the line terminator and cuts the message to fit a frame.
pub fn sanitize_message(raw: &str) -> String {
    truncate_utf8(strip_line_end(raw), MAX_TEXT_LEN).to_owned()
}

fn strip_line_end(raw: &str) -> &str {
    raw.trim_end_matches(&['\r', '\n'][..])
}
