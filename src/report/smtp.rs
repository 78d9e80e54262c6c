//! Outgoing mail submission.
//!
//! The reporter drives submission through the [`Submitter`] trait so that the
//! ladder logic does not depend on a real server. [`LettreSubmitter`] speaks
//! SMTP through lettre's low-level connection, which lets login and
//! transmission be tried separately.

use core::time::Duration;

use lettre::Message;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{SmtpConnection, TlsParameters};
use lettre::transport::smtp::extension::ClientId;

use super::ladder::{Security, Strategy};

/// Opens submission connections.
pub trait Submitter: Send + Sync {
    /// Connects to `host` with the given strategy, ready to log in.
    fn connect(
        &self,
        host: &str,
        strategy: Strategy,
    ) -> Result<Box<dyn SubmissionSession>, SubmitError>;
}

/// One open submission connection.
pub trait SubmissionSession {
    /// Authenticates.
    fn login(&mut self, username: &str, password: &str) -> Result<(), SubmitError>;

    /// Transmits a message. Only called after a successful login.
    fn send(&mut self, message: &Message) -> Result<(), SubmitError>;

    /// Closes the connection, ignoring errors.
    fn quit(self: Box<Self>);
}

/// Failure of one submission step.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The server refused the credentials.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Connecting, negotiating TLS or transmitting failed.
    #[error("transport failed: {0}")]
    Transport(String),
}

/// SMTP submission through lettre.
#[derive(Clone, Debug)]
pub struct LettreSubmitter {
    /// Name announced in `EHLO`
    hello: String,
    /// Timeout for every network operation
    timeout: Duration,
}

impl LettreSubmitter {
    /// Creates a submitter announcing itself as `hello`.
    pub fn new(hello: &str, timeout: Duration) -> Self {
        Self {
            hello: hello.to_owned(),
            timeout,
        }
    }
}

impl Submitter for LettreSubmitter {
    fn connect(
        &self,
        host: &str,
        strategy: Strategy,
    ) -> Result<Box<dyn SubmissionSession>, SubmitError> {
        let hello = ClientId::Domain(self.hello.clone());
        let tls = TlsParameters::new(host.to_owned()).map_err(transport)?;
        let implicit = (strategy.security == Security::ImplicitTls).then_some(&tls);

        let address = (host, strategy.port);
        let mut connection =
            SmtpConnection::connect(address, Some(self.timeout), &hello, implicit, None)
                .map_err(transport)?;
        if strategy.security == Security::StartTls {
            connection.starttls(&tls, &hello).map_err(transport)?;
        }
        Ok(Box::new(LettreSession { connection }))
    }
}

/// An SMTP connection opened by [`LettreSubmitter`].
struct LettreSession {
    /// Underlying lettre connection
    connection: SmtpConnection,
}

impl SubmissionSession for LettreSession {
    fn login(&mut self, username: &str, password: &str) -> Result<(), SubmitError> {
        let credentials = Credentials::new(username.to_owned(), password.to_owned());
        self.connection
            .auth(&[Mechanism::Plain, Mechanism::Login], &credentials)
            .map(drop)
            .map_err(|err| {
                if err.is_permanent() || err.is_transient() {
                    SubmitError::Auth(err.to_string())
                } else {
                    transport(err)
                }
            })
    }

    fn quit(mut self: Box<Self>) {
        if self.connection.quit().is_err() {
            self.connection.abort();
        }
    }

    fn send(&mut self, message: &Message) -> Result<(), SubmitError> {
        self.connection
            .send(message.envelope(), &message.formatted())
            .map(drop)
            .map_err(transport)
    }
}

/// Maps a lettre error to a transport failure.
fn transport(err: lettre::transport::smtp::Error) -> SubmitError {
    SubmitError::Transport(err.to_string())
}
