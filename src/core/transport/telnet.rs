//! Telnet console session
//!
//! Implements the client side of the Telnet protocol (RFC 854) far enough to
//! relay a node console: option negotiation is answered, commands are stripped
//! from incoming data, and IAC bytes in outgoing data are escaped.

use crate::core::outbox::{Outbox, OutboxError};
use bytes::{Bytes, BytesMut};
use futures::stream::AbortHandle;
use tokio::io::AsyncWrite;

// Telnet protocol constants
const IAC: u8 = 255; // Interpret As Command
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250; // Subnegotiation Begin
const SE: u8 = 240; // Subnegotiation End

// Options we let the server perform
const OPT_ECHO: u8 = 1;
const OPT_SUPPRESS_GO_AHEAD: u8 = 3;

/// Answer to an option request, if one is due
fn negotiate(command: u8, option: u8) -> Option<[u8; 3]> {
    match command {
        DO => Some([IAC, WONT, option]),
        WILL => match option {
            OPT_ECHO | OPT_SUPPRESS_GO_AHEAD => Some([IAC, DO, option]),
            _ => Some([IAC, DONT, option]),
        },
        _ => None,
    }
}

/// Escape IAC bytes in outgoing data
pub fn escape(data: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(data.len());
    for &byte in data {
        if byte == IAC {
            escaped.push(IAC);
        }
        escaped.push(byte);
    }
    escaped
}

/// Live Telnet connection to one node console
pub struct TelnetSession {
    host: String,
    port: u16,
    /// Distinguishes successive sessions to the same console
    serial: u64,
    outbox: Outbox,
    /// Buffer for incomplete Telnet sequences
    pending: BytesMut,
    reader: AbortHandle,
}

impl TelnetSession {
    /// Wrap the write half of a console connection; at most `queue` writes
    /// may be pending toward the console
    pub fn new<W>(host: &str, port: u16, serial: u64, writer: W, queue: usize, reader: AbortHandle) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            host: host.to_string(),
            port,
            serial,
            outbox: Outbox::spawn(writer, queue),
            pending: BytesMut::new(),
            reader,
        }
    }

    /// Console host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Console port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Session serial number
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Stop reading and release the connection
    pub fn close(self) {
        self.reader.abort();
        self.outbox.close();
    }

    /// Queue data for the console
    pub fn write(&mut self, data: &[u8]) -> Result<(), OutboxError> {
        self.outbox.push(escape(data).into())
    }

    /// Process bytes read from the console, returning the payload.
    ///
    /// Negotiation replies are queued like any other write; incomplete command
    /// sequences are kept until the next read.
    pub fn ingest(&mut self, raw: &[u8]) -> Result<Bytes, OutboxError> {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(raw);

        let mut output = BytesMut::with_capacity(data.len());
        let mut replies = Vec::new();
        let mut i = 0;

        while i < data.len() {
            if data[i] != IAC {
                output.extend_from_slice(&[data[i]]);
                i += 1;
                continue;
            }

            if i + 1 >= data.len() {
                // Incomplete command, save for later
                self.pending.extend_from_slice(&data[i..]);
                break;
            }

            match data[i + 1] {
                IAC => {
                    // Escaped IAC (255 255 -> 255)
                    output.extend_from_slice(&[IAC]);
                    i += 2;
                }
                DO | DONT | WILL | WONT => {
                    if i + 2 >= data.len() {
                        self.pending.extend_from_slice(&data[i..]);
                        break;
                    }
                    if let Some(reply) = negotiate(data[i + 1], data[i + 2]) {
                        replies.extend_from_slice(&reply);
                    }
                    i += 3;
                }
                SB => {
                    // Subnegotiation - find IAC SE
                    let end = data[i + 2..]
                        .windows(2)
                        .position(|pair| pair == [IAC, SE]);
                    match end {
                        Some(offset) => i += 2 + offset + 2,
                        None => {
                            self.pending.extend_from_slice(&data[i..]);
                            break;
                        }
                    }
                }
                _ => {
                    // Other commands, skip
                    i += 2;
                }
            }
        }

        if !replies.is_empty() {
            self.outbox.push(replies.into())?;
        }

        Ok(output.freeze())
    }
}
