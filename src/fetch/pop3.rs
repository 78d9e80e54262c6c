//! POP3 over implicit TLS.
//!
//! Only the handful of commands the intake needs are spoken: `USER`/`PASS`,
//! `UIDL`, `RETR` and `QUIT`. Connecting and every socket operation are
//! bounded by the configured timeout so a stalled server can only hold one
//! worker slot for that long.

use core::time::Duration;
use std::io::{self, BufRead, BufReader, Read, Write};

use native_tls::TlsConnector;

use super::{
    Error, ListingEntry, MailboxConnector, MailboxSession, MessageIndex, MessageToken, connect_tcp,
};

/// Opens authenticated POP3 sessions.
#[derive(Clone, Debug)]
pub struct Pop3Connector {
    /// Server host name, also used for certificate validation
    host: String,
    /// Account password
    password: String,
    /// Server port, usually 995
    port: u16,
    /// Connect, read and write timeout applied to the socket
    timeout: Duration,
    /// Account user name
    user: String,
}

impl Pop3Connector {
    /// Creates a connector for the given server and account.
    pub fn new(host: &str, port: u16, user: &str, password: &str, timeout: Duration) -> Self {
        Self {
            host: host.to_owned(),
            password: password.to_owned(),
            port,
            timeout,
            user: user.to_owned(),
        }
    }
}

impl MailboxConnector for Pop3Connector {
    fn connect(&self) -> Result<Box<dyn MailboxSession>, Error> {
        let tcp = connect_tcp(&self.host, self.port, self.timeout)?;
        let tls = TlsConnector::new()?
            .connect(&self.host, tcp)
            .map_err(|err| Error::Tls(err.to_string()))?;

        let mut session = Pop3Session::new(tls);
        session.read_greeting()?;
        session.login(&self.user, &self.password)?;
        Ok(Box::new(session))
    }
}

/// A POP3 session over any byte stream.
pub struct Pop3Session<S: Read + Write> {
    /// Buffered connection to the server
    stream: BufReader<S>,
}

impl<S: Read + Write> Pop3Session<S> {
    /// Sends a command and returns the text following `+OK`.
    fn command(&mut self, command: &str) -> Result<String, Error> {
        let stream = self.stream.get_mut();
        stream.write_all(command.as_bytes())?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
        self.status()
    }

    /// Sends `USER` then `PASS`.
    ///
    /// A negative answer to either is reported as [`Error::Auth`].
    pub fn login(&mut self, user: &str, password: &str) -> Result<(), Error> {
        for command in [format!("USER {user}"), format!("PASS {password}")] {
            match self.command(&command) {
                Ok(_) => (),
                Err(Error::Protocol(reply)) => return Err(Error::Auth(reply)),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Wraps a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Reads the server greeting.
    pub fn read_greeting(&mut self) -> Result<(), Error> {
        self.status().map(drop)
    }

    /// Reads one line, without its terminator.
    fn read_line(&mut self) -> Result<Vec<u8>, Error> {
        let mut line = Vec::new();
        if self.stream.read_until(b'\n', &mut line)? == 0 {
            let closed = io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed");
            return Err(closed.into());
        }
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        Ok(line)
    }

    /// Reads a dot-terminated multi-line block, undoing dot-stuffing.
    fn read_multiline(&mut self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        loop {
            let line = self.read_line()?;
            if line == b"." {
                return Ok(out);
            }
            let content = if line.starts_with(b"..") {
                &line[1..]
            } else {
                &line[..]
            };
            out.extend_from_slice(content);
            out.extend_from_slice(b"\r\n");
        }
    }

    /// Reads a status line.
    fn status(&mut self) -> Result<String, Error> {
        let line = String::from_utf8_lossy(&self.read_line()?).into_owned();
        if let Some(rest) = line.strip_prefix("+OK") {
            return Ok(rest.trim().to_owned());
        }
        Err(Error::Protocol(line))
    }
}

impl<S: Read + Write> MailboxSession for Pop3Session<S> {
    fn fetch_raw(&mut self, index: MessageIndex) -> Result<Vec<u8>, Error> {
        self.command(&format!("RETR {index}"))?;
        self.read_multiline()
    }

    fn fetch_token(&mut self, index: MessageIndex) -> Result<MessageToken, Error> {
        let reply = self.command(&format!("UIDL {index}"))?;
        reply
            .split_whitespace()
            .last()
            .map(MessageToken::new)
            .ok_or_else(|| Error::Protocol(format!("UIDL {index}: empty reply")))
    }

    fn list_tokens(&mut self) -> Result<Vec<ListingEntry>, Error> {
        self.command("UIDL")?;
        let block = self.read_multiline()?;
        String::from_utf8_lossy(&block)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_uidl_line)
            .collect()
    }

    fn quit(mut self: Box<Self>) -> Result<(), Error> {
        self.command("QUIT").map(drop)
    }
}

/// Parses one `<number> <uidl>` line of a `UIDL` listing.
fn parse_uidl_line(line: &str) -> Result<ListingEntry, Error> {
    let mut parts = line.split_whitespace();
    match (parts.next().map(str::parse::<u32>), parts.next()) {
        (Some(Ok(index)), Some(token)) if index > 0 => Ok(ListingEntry::new(index, token)),
        _ => Err(Error::Protocol(format!("malformed UIDL line: {line}"))),
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, Cursor, Read, Write};

    use super::{Pop3Session, parse_uidl_line};
    use crate::fetch::{Error, ListingEntry, MailboxSession, MessageIndex, MessageToken};

    /// Replays a canned server transcript and records what the client sent.
    struct Transcript {
        /// Bytes the server will answer with
        replies: Cursor<Vec<u8>>,
        /// Bytes the client wrote
        sent: Vec<u8>,
    }

    impl Transcript {
        fn new(replies: &str) -> Self {
            Self {
                replies: Cursor::new(replies.as_bytes().to_vec()),
                sent: Vec::new(),
            }
        }
    }

    impl Read for Transcript {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.replies.read(buf)
        }
    }

    impl Write for Transcript {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn lists_tokens_oldest_first() -> Result<(), Error> {
        let mut session = Pop3Session::new(Transcript::new(
            "+OK ready\r\n+OK\r\n+OK\r\n+OK 2 messages\r\n1 AAA\r\n2 BBB\r\n.\r\n",
        ));
        session.read_greeting()?;
        session.login("user", "secret")?;

        assert_eq!(
            session.list_tokens()?,
            vec![ListingEntry::new(1, "AAA"), ListingEntry::new(2, "BBB")]
        );
        assert_eq!(
            String::from_utf8_lossy(&session.stream.get_ref().sent),
            "USER user\r\nPASS secret\r\nUIDL\r\n"
        );
        Ok(())
    }

    #[test]
    #[expect(clippy::unwrap_used, reason = "test")]
    fn rejected_password_is_auth_error() {
        let mut session =
            Pop3Session::new(Transcript::new("+OK\r\n-ERR [AUTH] invalid password\r\n"));
        let err = session.login("user", "bad").unwrap_err();
        assert!(err.is_auth(), "{err}");
    }

    #[test]
    fn retrieves_and_unstuffs_message() -> Result<(), Error> {
        let mut session = Pop3Session::new(Transcript::new(
            "+OK 1 XYZ\r\n+OK message follows\r\nSubject: hi\r\n\r\n..dotted\r\nbody\r\n.\r\n",
        ));
        assert_eq!(
            session.fetch_token(MessageIndex(1))?,
            MessageToken::new("XYZ")
        );
        assert_eq!(
            session.fetch_raw(MessageIndex(1))?,
            b"Subject: hi\r\n\r\n.dotted\r\nbody\r\n"
        );
        Ok(())
    }

    #[test]
    fn malformed_listing_line() {
        assert!(parse_uidl_line("x AAA").is_err());
        assert!(parse_uidl_line("3").is_err());
        assert!(parse_uidl_line("0 AAA").is_err());
    }
}
