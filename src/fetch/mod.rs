//! Mailbox session adapters.
//!
//! A [`MailboxConnector`] opens a fresh, authenticated [`MailboxSession`] for
//! every operation. Sessions are never shared: the underlying protocols keep
//! per-connection state (the positional [`MessageIndex`] is only valid inside
//! the session that listed it), so each listing or fetch owns its connection
//! from login to quit.

pub mod connection;
pub mod parser;
pub mod pop3;

use core::fmt;
use core::time::Duration;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};

use serde::{Deserialize, Serialize};

/// Server-issued stable identifier of a message.
///
/// This is the POP3 `UIDL` value or the IMAP `UID`. It is unique inside one
/// mailbox and survives across sessions, so it is used as the dedup key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageToken(String);

impl MessageToken {
    /// Returns the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wraps a token received from the server.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Display for MessageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session-local, 1-based position of a message.
///
/// Only meaningful inside the session that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageIndex(pub u32);

impl fmt::Display for MessageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One line of a mailbox listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListingEntry {
    /// Position of the message in the session that listed it
    pub index: MessageIndex,
    /// Stable identifier of the message
    pub token: MessageToken,
}

impl ListingEntry {
    /// Creates a listing entry.
    pub fn new(index: u32, token: impl Into<String>) -> Self {
        Self {
            index: MessageIndex(index),
            token: MessageToken::new(token),
        }
    }
}

/// An authenticated, single-use mailbox session.
pub trait MailboxSession {
    /// Returns the positional handle and token of every message, oldest
    /// first.
    fn list_tokens(&mut self) -> Result<Vec<ListingEntry>, Error>;

    /// Returns the token of the message at `index`.
    fn fetch_token(&mut self, index: MessageIndex) -> Result<MessageToken, Error>;

    /// Returns the full raw bytes (headers and body) of the message at
    /// `index`.
    fn fetch_raw(&mut self, index: MessageIndex) -> Result<Vec<u8>, Error>;

    /// Ends the session.
    fn quit(self: Box<Self>) -> Result<(), Error>;
}

/// Factory of authenticated mailbox sessions.
///
/// Implementations must be shareable between the fetch workers; each call
/// yields an independent connection.
pub trait MailboxConnector: Send + Sync {
    /// Connects and logs in.
    fn connect(&self) -> Result<Box<dyn MailboxSession>, Error>;
}

/// Opens a TCP connection to `host:port`.
///
/// Every resolved address gets at most `timeout` to accept the connection,
/// and the stream reads and writes are bounded by the same `timeout`.
pub fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, Error> {
    let connect_error = |source| Error::Connect {
        host: host.to_owned(),
        port,
        source,
    };
    let mut last = io::Error::new(io::ErrorKind::NotFound, "host has no address");
    for addr in (host, port).to_socket_addrs().map_err(connect_error)? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                return Ok(stream);
            }
            Err(err) => last = err,
        }
    }
    Err(connect_error(last))
}

/// Errors that may occur while talking to the mailbox server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server rejected the credentials.
    #[error("mailbox login rejected: {0}")]
    Auth(String),
    /// Failed to open the TCP connection.
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        /// Server host name
        host: String,
        /// Server port
        port: u16,
        /// Underlying socket error
        source: io::Error,
    },
    /// Failure while talking to the IMAP server.
    #[error("imap: {0}")]
    Imap(#[from] imap::Error),
    /// Read or write failed on an established connection.
    #[error("mailbox i/o: {0}")]
    Io(#[from] io::Error),
    /// The message vanished or was replaced between listing and fetching.
    #[error("message {index} changed: expected token {expected}, found {found}")]
    TokenMismatch {
        /// Position that was fetched
        index: MessageIndex,
        /// Token seen in the listing
        expected: MessageToken,
        /// Token returned by the fetch session
        found: MessageToken,
    },
    /// The server answered something unexpected.
    #[error("unexpected mailbox reply: {0}")]
    Protocol(String),
    /// Failed to establish `TLS` connection.
    #[error("tls: {0}")]
    Tls(String),
}

impl Error {
    /// Whether this error is a credential rejection.
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<native_tls::Error> for Error {
    fn from(error: native_tls::Error) -> Self {
        Self::Tls(error.to_string())
    }
}

#[cfg(test)]
mod test {
    use core::time::Duration;
    use std::net::TcpListener;

    use super::{Error, connect_tcp};

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[test]
    #[expect(clippy::unwrap_used, reason = "test")]
    fn connected_stream_carries_timeouts() -> Result<(), Error> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = connect_tcp("127.0.0.1", port, TIMEOUT)?;

        assert_eq!(stream.read_timeout().unwrap(), Some(TIMEOUT));
        assert_eq!(stream.write_timeout().unwrap(), Some(TIMEOUT));
        Ok(())
    }

    #[test]
    #[expect(clippy::unwrap_used, reason = "test")]
    fn refused_connection_names_the_server() {
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let err = connect_tcp("127.0.0.1", port, TIMEOUT).unwrap_err();

        assert!(matches!(err, Error::Connect { .. }), "{err}");
        let prefix = format!("failed to connect to 127.0.0.1:{port}: ");
        assert!(err.to_string().starts_with(&prefix), "{err}");
    }

    #[test]
    fn unresolvable_host_is_a_connect_error() {
        let err = connect_tcp("mail.invalid", 995, TIMEOUT).err();
        assert!(
            matches!(err, Some(Error::Connect { port: 995, .. })),
            "{err:?}"
        );
    }
}
