//! In-memory fakes of the mailbox and submission servers, plus sample
//! notifications.

#![expect(clippy::unwrap_used, reason = "test")]

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};

use lettre::Message;

use crate::fetch::{
    self, ListingEntry, MailboxConnector, MailboxSession, MessageIndex, MessageToken,
};
use crate::report::ladder::Strategy;
use crate::report::smtp::{SubmissionSession, SubmitError, Submitter};

/// Raw notification for order `numero`, from an accepted sender.
pub fn order_mail(numero: &str) -> Vec<u8> {
    format!(
        "From: Notificaciones NAF <naf@telconet.ec>\r\n\
         Subject: SISTEMA NAF: Notificacion AUTORIZACION ORDEN COMPRA No {numero}\r\n\
         \r\n\
         Se ha autorizado la orden de compra de No. {numero} del proveedor ACME S.A. \
         con Fecha Orden: 01/06/2024\r\n\
         Fecha Autorizacion: 05/06/2024\r\n"
    )
    .into_bytes()
}

/// Raw message from a sender nobody accepts.
pub fn foreign_mail() -> Vec<u8> {
    b"From: Alerta <otro@dominio.com>\r\n\
      Subject: SISTEMA NAF: Notificacion AUTORIZACION ORDEN COMPRA No 999\r\n\
      \r\n\
      Fecha Autorizacion: 05/06/2024\r\n"
        .to_vec()
}

/// Raw message from an accepted sender that carries no order.
pub fn incomplete_mail() -> Vec<u8> {
    b"From: \"NAF\" <naf@telconet.ec>\r\n\
      Subject: Aviso\r\n\
      \r\n\
      Mensaje sin informacion de orden\r\n"
        .to_vec()
}

/// Shared state of a [`MemoryMailbox`].
#[derive(Debug, Default)]
struct MailboxState {
    /// Sessions closed with `quit`
    closed: usize,
    /// Tokens whose fetch fails
    failing: HashSet<String>,
    /// Messages, oldest first
    messages: Vec<(String, Vec<u8>)>,
    /// Sessions opened
    opened: usize,
    /// Whether logins are refused
    reject_login: bool,
    /// Tokens reported differently by fetch sessions than by listings
    swapped: HashMap<String, String>,
}

/// Mailbox kept in memory, shared by all its clones.
#[derive(Clone, Debug, Default)]
pub struct MemoryMailbox {
    /// State shared with the sessions
    state: Arc<Mutex<MailboxState>>,
}

impl MemoryMailbox {
    /// Makes fetches of `token` fail.
    pub fn fail_fetch(&self, token: &str) {
        self.state.lock().unwrap().failing.insert(token.to_owned());
    }

    /// Makes fetches of `token` succeed again.
    pub fn heal(&self, token: &str) {
        self.state.lock().unwrap().failing.remove(token);
    }

    /// Appends a message.
    pub fn push(&self, token: &str, raw: Vec<u8>) {
        self.state.lock().unwrap().messages.push((token.to_owned(), raw));
    }

    /// Refuses every login from now on.
    pub fn reject_login(&self) {
        self.state.lock().unwrap().reject_login = true;
    }

    /// Number of sessions closed so far.
    pub fn sessions_closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    /// Number of sessions opened so far.
    pub fn sessions_opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    /// Simulates the message `token` being replaced by `other` between the
    /// listing and the fetch.
    pub fn swap_token_on_fetch(&self, token: &str, other: &str) {
        self.state.lock().unwrap().swapped.insert(token.to_owned(), other.to_owned());
    }
}

impl MailboxConnector for MemoryMailbox {
    fn connect(&self) -> Result<Box<dyn MailboxSession>, fetch::Error> {
        let mut state = self.state.lock().unwrap();
        if state.reject_login {
            return Err(fetch::Error::Auth("-ERR invalid password".to_owned()));
        }
        state.opened += 1;
        Ok(Box::new(MemorySession {
            mailbox: self.clone(),
            messages: state.messages.clone(),
        }))
    }
}

/// Session over a snapshot of a [`MemoryMailbox`].
struct MemorySession {
    /// Mailbox the session belongs to
    mailbox: MemoryMailbox,
    /// Messages at login time
    messages: Vec<(String, Vec<u8>)>,
}

impl MemorySession {
    /// Returns the token and bytes at a 1-based position.
    fn get(&self, index: MessageIndex) -> Result<&(String, Vec<u8>), fetch::Error> {
        let position = usize::try_from(index.0).unwrap();
        position
            .checked_sub(1)
            .and_then(|position| self.messages.get(position))
            .ok_or_else(|| fetch::Error::Protocol(format!("-ERR no message {index}")))
    }
}

impl MailboxSession for MemorySession {
    fn fetch_raw(&mut self, index: MessageIndex) -> Result<Vec<u8>, fetch::Error> {
        let (token, raw) = self.get(index)?;
        if self.mailbox.state.lock().unwrap().failing.contains(token) {
            let reset = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset");
            return Err(fetch::Error::Io(reset));
        }
        Ok(raw.clone())
    }

    fn fetch_token(&mut self, index: MessageIndex) -> Result<MessageToken, fetch::Error> {
        let (token, _) = self.get(index)?;
        let state = self.mailbox.state.lock().unwrap();
        let current = state.swapped.get(token).unwrap_or(token);
        Ok(MessageToken::new(current.as_str()))
    }

    fn list_tokens(&mut self) -> Result<Vec<ListingEntry>, fetch::Error> {
        Ok(self
            .messages
            .iter()
            .zip(1..)
            .map(|((token, _), index)| ListingEntry::new(index, token))
            .collect())
    }

    fn quit(self: Box<Self>) -> Result<(), fetch::Error> {
        self.mailbox.state.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// Shared state of a [`ScriptedSubmitter`].
#[derive(Debug, Default)]
struct Script {
    /// Usernames accepted, per port
    accepted: HashMap<u16, HashSet<String>>,
    /// Ports of every connection attempt, in order
    connects: Vec<u16>,
    /// `(port, username)` of every login attempt, in order
    logins: Vec<(u16, String)>,
    /// Ports refusing connections
    refused: HashSet<u16>,
    /// Messages sent, formatted
    sent: Vec<Vec<u8>>,
}

/// Submission server following a script.
///
/// Connections succeed unless their port is refused. Logins succeed only for
/// usernames accepted on that port. Sends always succeed.
#[derive(Clone, Debug, Default)]
pub struct ScriptedSubmitter {
    /// State shared with the sessions
    script: Arc<Mutex<Script>>,
}

impl ScriptedSubmitter {
    /// Accepts `username` on `port`.
    pub fn accept(&self, port: u16, username: &str) {
        self.script.lock().unwrap().accepted.entry(port).or_default().insert(username.to_owned());
    }

    /// Ports of every connection attempt.
    pub fn connects(&self) -> Vec<u16> {
        self.script.lock().unwrap().connects.clone()
    }

    /// Every login attempt.
    pub fn logins(&self) -> Vec<(u16, String)> {
        self.script.lock().unwrap().logins.clone()
    }

    /// Refuses connections on `port`.
    pub fn refuse(&self, port: u16) {
        self.script.lock().unwrap().refused.insert(port);
    }

    /// Messages sent, as formatted text.
    pub fn sent(&self) -> Vec<String> {
        self.script
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|raw| String::from_utf8_lossy(raw).into_owned())
            .collect()
    }
}

impl Submitter for ScriptedSubmitter {
    fn connect(
        &self,
        _host: &str,
        strategy: Strategy,
    ) -> Result<Box<dyn SubmissionSession>, SubmitError> {
        let mut script = self.script.lock().unwrap();
        script.connects.push(strategy.port);
        if script.refused.contains(&strategy.port) {
            let refused = format!("connection refused on {strategy}");
            return Err(SubmitError::Transport(refused));
        }
        Ok(Box::new(ScriptedSession {
            port: strategy.port,
            submitter: self.clone(),
        }))
    }
}

/// Session opened by a [`ScriptedSubmitter`].
struct ScriptedSession {
    /// Port the session is connected to
    port: u16,
    /// Submitter holding the script
    submitter: ScriptedSubmitter,
}

impl SubmissionSession for ScriptedSession {
    fn login(&mut self, username: &str, _password: &str) -> Result<(), SubmitError> {
        let mut script = self.submitter.script.lock().unwrap();
        script.logins.push((self.port, username.to_owned()));
        let accepted = script
            .accepted
            .get(&self.port)
            .is_some_and(|users| users.contains(username));
        if accepted {
            Ok(())
        } else {
            Err(SubmitError::Auth("535 authentication failed".to_owned()))
        }
    }

    fn quit(self: Box<Self>) {}

    fn send(&mut self, message: &Message) -> Result<(), SubmitError> {
        self.submitter.script.lock().unwrap().sent.push(message.formatted());
        Ok(())
    }
}
