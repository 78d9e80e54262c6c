//! Handles the IMAP connections.
//!
//! IMAP is the alternative to POP3 for reading the purchase-order mailbox. The
//! message token is the IMAP `UID` and the message index is the sequence
//! number inside the selected folder.

use core::marker::PhantomData;
use core::time::Duration;
use std::io::{Read, Write};

use imap::types::Fetch;
use native_tls::TlsConnector;

use super::{
    Error, ListingEntry, MailboxConnector, MailboxSession, MessageIndex, MessageToken, connect_tcp,
};

/// Type of query made on the IMAP server to retrieve a whole message.
const QUERY: &str = "RFC822";

/// Type of query made on the IMAP server to retrieve a message token.
const UID_QUERY: &str = "UID";

/// Opens authenticated IMAP sessions on a folder.
#[derive(Clone, Debug)]
pub struct ImapConnector {
    /// Folder to select after login
    folder: String,
    /// Server host name
    host: String,
    /// Account password
    password: String,
    /// Server port, usually 993
    port: u16,
    /// Connect, read and write timeout applied to the socket
    timeout: Duration,
    /// Account user name
    user: String,
}

impl ImapConnector {
    /// Creates a connector for the given server, account and folder.
    pub fn new(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        folder: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            folder: folder.to_owned(),
            host: host.to_owned(),
            password: password.to_owned(),
            port,
            timeout,
            user: user.to_owned(),
        }
    }
}

impl MailboxConnector for ImapConnector {
    fn connect(&self) -> Result<Box<dyn MailboxSession>, Error> {
        let tcp = connect_tcp(&self.host, self.port, self.timeout)?;
        let tls = TlsConnector::new()?
            .connect(&self.host, tcp)
            .map_err(|err| Error::Tls(err.to_string()))?;
        let session = ImapSession::with_credentials(tls, &self.user, &self.password)?;
        Ok(Box::new(session.select_mailbox(&self.folder)?))
    }
}

/// Represents the Imap session to communicate with the server.
pub struct ImapSession<S: Read + Write, T> {
    /// Number of messages in the selected folder
    exists: u32,
    /// Marker to keep the status of the [`ImapSession`]
    ///
    /// This is a zero-sized element that informs on whether a mailbox was
    /// specified or not
    marker: PhantomData<T>,
    /// Active session
    session: imap::Session<S>,
}

impl<S: Read + Write> ImapSession<S, NoMailbox> {
    /// Selects a mailbox to fetch
    pub fn select_mailbox(
        mut self,
        mailbox_name: &str,
    ) -> Result<ImapSession<S, MailboxSelected>, Error> {
        let mailbox = self.session.select(mailbox_name)?;
        Ok(ImapSession {
            exists: mailbox.exists,
            marker: PhantomData,
            session: self.session,
        })
    }

    /// Reads the greeting on a connected stream and logs in.
    ///
    /// A `NO` or `BAD` answer to the login is reported as [`Error::Auth`].
    pub fn with_credentials(stream: S, user: &str, password: &str) -> Result<Self, Error> {
        let mut client = imap::Client::new(stream);
        client.read_greeting()?;

        let session = client.login(user, password).map_err(|(err, _)| match err {
            imap::Error::No(reply) | imap::Error::Bad(reply) => Error::Auth(reply),
            other => Error::Imap(other),
        })?;

        Ok(Self {
            exists: 0,
            marker: PhantomData,
            session,
        })
    }
}

impl<S: Read + Write> MailboxSession for ImapSession<S, MailboxSelected> {
    fn fetch_raw(&mut self, index: MessageIndex) -> Result<Vec<u8>, Error> {
        let response = self.session.fetch(index.to_string(), QUERY)?;
        let mail = response
            .first()
            .ok_or_else(|| Error::Protocol(format!("no message at {index}")))?;
        get_email_body(mail)
    }

    fn fetch_token(&mut self, index: MessageIndex) -> Result<MessageToken, Error> {
        let response = self.session.fetch(index.to_string(), UID_QUERY)?;
        response
            .first()
            .and_then(|mail| mail.uid)
            .map(|uid| MessageToken::new(uid.to_string()))
            .ok_or_else(|| Error::Protocol(format!("no uid for message {index}")))
    }

    fn list_tokens(&mut self) -> Result<Vec<ListingEntry>, Error> {
        if self.exists == 0 {
            return Ok(Vec::new());
        }
        let mut entries = self
            .session
            .fetch("1:*", UID_QUERY)?
            .iter()
            .filter_map(|mail| Some(ListingEntry::new(mail.message, mail.uid?.to_string())))
            .collect::<Vec<_>>();
        entries.sort_unstable_by_key(|entry| entry.index.0);
        Ok(entries)
    }

    fn quit(mut self: Box<Self>) -> Result<(), Error> {
        Ok(self.session.logout()?)
    }
}

/// State of the [`ImapSession`] after a folder was selected.
pub struct MailboxSelected;

/// State of the [`ImapSession`] before a folder was selected.
pub struct NoMailbox;

/// Get the raw bytes of an email
///
/// The body of an email also contains all the headers.
fn get_email_body(mail: &Fetch) -> Result<Vec<u8>, Error> {
    let index = mail.message;
    mail.body()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| Error::Protocol(format!("message {index} has no body")))
}
