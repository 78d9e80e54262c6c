//! Delivery reporter.
//!
//! Builds the report message and walks the transport ladder; on each rung it
//! tries the credential ladder on fresh connections until one login works.
//! The message is transmitted at most once: the first rung where a login
//! succeeds either delivers it or gives way to the next rung.

pub mod body;
pub mod ladder;
pub mod smtp;
pub mod snapshot;

use std::sync::Arc;

use lettre::Message;
use lettre::message::{Mailbox, MultiPart};
use tracing::{Span, debug, error, info, warn};

use self::ladder::{Strategy, credential_ladder};
use self::smtp::{SubmitError, Submitter};
use crate::fetch::MailboxConnector;
use crate::intake::Order;

/// Content of one report.
#[derive(Clone, Copy, Debug)]
pub struct Report<'report> {
    /// Optional label shown at the top
    pub category: Option<&'report str>,
    /// Orders whose documents were not found
    pub missing: &'report [String],
    /// Orders rendered in the detail table
    pub orders: &'report [Order],
    /// Orders whose documents were uploaded
    pub succeeded: &'report [String],
}

/// Submission settings of a [`Reporter`].
#[derive(Clone, Debug)]
pub struct ReporterSettings {
    /// `(address, password)` accounts, in the order they are tried
    pub accounts: Vec<(String, String)>,
    /// Sender address of the report
    pub from: String,
    /// Submission server
    pub host: String,
    /// Transport strategies, in the order they are tried
    pub ladder: Vec<Strategy>,
}

/// Result of one rung and credential of the ladder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The login was refused.
    AuthFailure(String),
    /// The message was transmitted.
    Delivered,
    /// Connecting or transmitting failed.
    TransportFailure(String),
}

/// One try of the ladder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryAttempt {
    /// What happened
    pub outcome: AttemptOutcome,
    /// Transport used
    pub strategy: Strategy,
    /// Username tried
    pub username: String,
}

/// Result of a delivery walk.
#[derive(Clone, Debug, Default)]
pub struct Delivery {
    /// Every attempt, in order
    pub attempts: Vec<DeliveryAttempt>,
    /// Whether the report was transmitted
    pub delivered: bool,
}

/// Sends reports through the transport and credential ladders.
pub struct Reporter {
    /// Mailbox used for the login pre-check
    precheck: Option<Arc<dyn MailboxConnector>>,
    /// Server and credentials
    settings: ReporterSettings,
    /// Logging context of this component
    span: Span,
    /// Opens submission connections
    submitter: Box<dyn Submitter>,
}

impl Reporter {
    /// Walks the ladders and returns every attempt.
    ///
    /// Fails without connecting when there is nothing to report, when the
    /// destination or credentials are missing, or when the message cannot
    /// be built.
    pub fn deliver(&self, report: &Report<'_>, destination: &str) -> Result<Delivery, Error> {
        let _entered = self.span.enter();
        if report.succeeded.is_empty() && report.missing.is_empty() {
            return Err(Error::NothingToReport);
        }
        if destination.trim().is_empty() {
            return Err(Error::NoDestination);
        }
        let credentials = credential_ladder(&self.settings.accounts);
        if credentials.is_empty() {
            return Err(Error::NoCredentials);
        }
        let message = self.message(report, destination)?;

        self.precheck_mailbox();

        let mut delivery = Delivery::default();
        for strategy in &self.settings.ladder {
            if self.try_strategy(*strategy, &credentials, &message, &mut delivery.attempts) {
                info!(%strategy, "report delivered");
                delivery.delivered = true;
                return Ok(delivery);
            }
        }
        error!(attempts = delivery.attempts.len(), "report could not be delivered");
        Ok(delivery)
    }

    /// Builds the report message.
    fn message(&self, report: &Report<'_>, destination: &str) -> Result<Message, Error> {
        let mut builder = Message::builder()
            .from(self.settings.from.trim().parse::<Mailbox>()?)
            .subject(body::SUBJECT);
        let recipients = destination
            .split([',', ';'])
            .map(str::trim)
            .filter(|rcpt| !rcpt.is_empty());
        for recipient in recipients {
            builder = builder.to(recipient.parse::<Mailbox>()?);
        }
        let body = MultiPart::alternative_plain_html(body::plain(report), body::html(report));
        Ok(builder.multipart(body)?)
    }

    /// Creates a reporter.
    ///
    /// When `precheck` is given, a login to that mailbox is attempted before
    /// every delivery; its failure is only logged.
    pub fn new(
        settings: ReporterSettings,
        submitter: Box<dyn Submitter>,
        precheck: Option<Arc<dyn MailboxConnector>>,
        span: Span,
    ) -> Self {
        Self {
            precheck,
            settings,
            span,
            submitter,
        }
    }

    /// Logs in and out of the source mailbox.
    fn precheck_mailbox(&self) {
        let Some(connector) = &self.precheck else { return };
        match connector.connect() {
            Ok(session) => match session.quit() {
                Ok(()) => debug!("mailbox pre-check passed"),
                Err(err) => warn!("mailbox pre-check did not close cleanly: {err}"),
            },
            Err(err) => warn!("mailbox pre-check failed: {err}"),
        }
    }

    /// Sends the report, returning whether it was delivered.
    pub fn send_report(&self, report: &Report<'_>, destination: &str) -> bool {
        match self.deliver(report, destination) {
            Ok(delivery) => delivery.delivered,
            Err(err) => {
                warn!(parent: &self.span, "report not sent: {err}");
                false
            }
        }
    }

    /// Tries every credential on one rung, each on a fresh connection.
    ///
    /// Moves on from the rung as soon as a connection fails or a logged-in
    /// session fails to transmit.
    fn try_strategy(
        &self,
        strategy: Strategy,
        credentials: &[(String, String)],
        message: &Message,
        attempts: &mut Vec<DeliveryAttempt>,
    ) -> bool {
        let mut record = |username: &str, outcome: AttemptOutcome| {
            match &outcome {
                AttemptOutcome::AuthFailure(reason) | AttemptOutcome::TransportFailure(reason) => {
                    warn!(%strategy, username, "delivery attempt failed: {reason}");
                }
                AttemptOutcome::Delivered => (),
            }
            attempts.push(DeliveryAttempt {
                outcome,
                strategy,
                username: username.to_owned(),
            });
        };

        for (username, password) in credentials {
            let mut session = match self.submitter.connect(&self.settings.host, strategy) {
                Ok(session) => session,
                Err(err) => {
                    record(username, outcome_of(err));
                    return false;
                }
            };
            let result = match session.login(username, password) {
                Err(SubmitError::Auth(reason)) => {
                    session.quit();
                    record(username, AttemptOutcome::AuthFailure(reason));
                    continue;
                }
                Err(err) => Err(err),
                Ok(()) => session.send(message),
            };
            session.quit();
            return match result {
                Ok(()) => {
                    record(username, AttemptOutcome::Delivered);
                    true
                }
                Err(err) => {
                    record(username, outcome_of(err));
                    false
                }
            };
        }
        false
    }
}

/// Converts a submission error to an attempt outcome.
fn outcome_of(err: SubmitError) -> AttemptOutcome {
    match err {
        SubmitError::Auth(reason) => AttemptOutcome::AuthFailure(reason),
        SubmitError::Transport(reason) => AttemptOutcome::TransportFailure(reason),
    }
}

/// Reasons a report is not even attempted.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A sender or recipient address is malformed.
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    /// The message could not be assembled.
    #[error("could not build the report: {0}")]
    Message(#[from] lettre::error::Error),
    /// No submission credentials are configured.
    #[error("no credentials configured for the report")]
    NoCredentials,
    /// No destination is configured.
    #[error("no destination configured for the report")]
    NoDestination,
    /// Both order lists are empty.
    #[error("nothing to report")]
    NothingToReport,
}
