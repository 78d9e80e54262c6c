//! Mailbox intake: finds new purchase-order notifications.
//!
//! A scan lists the mailbox, selects the messages not yet accounted for,
//! fetches and classifies them on a worker pool and consumes the results in
//! selection order on the calling thread:
//!
//! - rejected messages are marked processed immediately;
//! - accepted orders are returned, and only marked processed once the caller
//!   confirms their report was delivered ([`Intake::confirm_delivered`]);
//! - messages from an accepted sender without order data are set aside;
//! - messages that failed to fetch or parse are retried by the next scans,
//!   and set aside once they failed [`MAX_FETCH_ATTEMPTS`] times.
//!
//! Set-aside messages are skipped by later walks, so they never hold a batch
//! slot that an older order needs.
//!
//! The cursor moves only when a scan saw everything newer than the stored
//! cursor and nothing is left to retry, so capped batches and failures are
//! re-walked.

pub mod classify;
pub mod extract;
pub mod pool;
pub mod selector;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{Span, debug, error, info, warn};

use self::classify::{Classification, Classifier};
use self::pool::OrderedPool;
use self::selector::select;
use crate::fetch::parser::Email;
use crate::fetch::{self, ListingEntry, MailboxConnector, MailboxSession, MessageToken};
use crate::state::{self, ProcessedSet, StateStore};

/// Failed attempts after which a message is set aside.
pub const MAX_FETCH_ATTEMPTS: u32 = 3;

/// A purchase order found in the mailbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Authorization date, `dd/mm/yyyy`
    pub fecha_aut: Option<String>,
    /// Order date, `dd/mm/yyyy`
    pub fecha_orden: Option<String>,
    /// Purchase-order number
    pub numero: String,
    /// Supplier name
    pub proveedor: Option<String>,
    /// Related task number
    pub tarea: Option<String>,
    /// Token of the notification the order came from
    pub token: MessageToken,
}

/// A message that could not be fetched or parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchFailure {
    /// Why it failed
    pub reason: String,
    /// Token of the message
    pub token: MessageToken,
}

/// Result of one scan.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Messages set aside because they failed too often
    pub abandoned: usize,
    /// Newest token observed, the cursor candidate
    pub cursor: Option<MessageToken>,
    /// Messages left for the next scan because they failed
    pub failures: Vec<FetchFailure>,
    /// Messages from accepted senders without order data, set aside
    pub incomplete: usize,
    /// Accepted orders, in selection order (newest first)
    pub orders: Vec<Order>,
    /// Cursor to persist once the orders are confirmed
    pending_cursor: Option<MessageToken>,
    /// Messages marked processed as non-matching
    pub rejected: usize,
}

impl ScanOutcome {
    /// Tokens of the accepted orders.
    pub fn tokens(&self) -> Vec<MessageToken> {
        self.orders.iter().map(|order| order.token.clone()).collect()
    }
}

/// Scans a mailbox for purchase orders and keeps the intake bookkeeping.
pub struct Intake {
    /// Maximum number of messages fetched per scan
    batch_size: usize,
    /// Sender and subject filters plus extraction
    classifier: Classifier,
    /// Opens one mailbox session per operation
    connector: Arc<dyn MailboxConnector>,
    /// Worker pool for the fetches
    pool: OrderedPool,
    /// Logging context of this component
    span: Span,
    /// Cursor and processed set
    store: StateStore,
}

impl Intake {
    /// Marks the orders of `outcome` processed and moves the cursor.
    ///
    /// Call this only once the report listing those orders was delivered.
    pub fn confirm_delivered(&mut self, outcome: &ScanOutcome) -> Result<(), Error> {
        let _entered = self.span.enter();
        for token in outcome.tokens() {
            self.store.mark_processed(&token)?;
        }
        if let Some(cursor) = &outcome.pending_cursor {
            self.store.advance_cursor(cursor)?;
        }
        info!(orders = outcome.orders.len(), "orders committed");
        Ok(())
    }

    /// Lists the mailbox with a dedicated session.
    fn list(&self) -> Result<Vec<ListingEntry>, Error> {
        let mut session = self.connector.connect()?;
        let listing = session.list_tokens()?;
        if let Err(err) = session.quit() {
            debug!("listing session did not close cleanly: {err}");
        }
        Ok(listing)
    }

    /// Creates an intake.
    pub fn new(
        connector: Arc<dyn MailboxConnector>,
        store: StateStore,
        classifier: Classifier,
        batch_size: usize,
        max_threads: usize,
        span: Span,
    ) -> Self {
        Self {
            batch_size: batch_size.max(1),
            classifier,
            connector,
            pool: OrderedPool::new(max_threads),
            span,
            store,
        }
    }

    /// Runs one scan.
    ///
    /// Listing and login failures abort the scan without touching the state.
    /// Per-message failures are reported in the outcome.
    pub fn scan(&mut self) -> Result<ScanOutcome, Error> {
        let _entered = self.span.enter();
        let (cursor, processed) = self.store.load();
        let settled = processed
            .union(self.store.as_set_aside())
            .cloned()
            .collect::<ProcessedSet>();
        let listing = self.list()?;
        let selection = select(&listing, &cursor, &settled, self.batch_size);
        debug!(
            listed = listing.len(),
            selected = selection.picks.len(),
            capped = selection.capped,
            "mailbox walked"
        );

        let mut outcome = ScanOutcome {
            cursor: selection.newest.clone(),
            ..ScanOutcome::default()
        };
        let connector = &*self.connector;
        let classifier = &self.classifier;
        let store = &mut self.store;
        let span = &self.span;

        self.pool.run(
            selection.picks,
            |entry| {
                let _entered = span.enter();
                let result = fetch_and_classify(connector, classifier, &entry);
                (entry, result)
            },
            |(entry, result): (ListingEntry, Result<Classification, MessageError>)| {
                consume(store, &mut outcome, entry, result)
            },
        )??;

        if !selection.capped && outcome.failures.is_empty() {
            if outcome.orders.is_empty() {
                if let Some(newest) = &selection.newest {
                    self.store.advance_cursor(newest)?;
                }
            } else {
                outcome.pending_cursor = selection.newest;
            }
        }

        info!(
            orders = outcome.orders.len(),
            rejected = outcome.rejected,
            incomplete = outcome.incomplete,
            failed = outcome.failures.len(),
            abandoned = outcome.abandoned,
            "scan finished"
        );
        Ok(outcome)
    }
}

/// Records the result of one message in the store and the outcome.
fn consume(
    store: &mut StateStore,
    outcome: &mut ScanOutcome,
    entry: ListingEntry,
    result: Result<Classification, MessageError>,
) -> Result<(), state::Error> {
    match result {
        Ok(Classification::Accepted(order)) => {
            debug!(token = %entry.token, numero = %order.numero, "order found");
            store.clear_failures(&entry.token)?;
            outcome.orders.push(order);
        }
        Ok(Classification::Incomplete { subject }) => {
            warn!(token = %entry.token, %subject, "accepted sender but no order data, set aside");
            store.set_aside(&entry.token)?;
            outcome.incomplete += 1;
        }
        Ok(Classification::Rejected) => {
            store.clear_failures(&entry.token)?;
            store.mark_processed(&entry.token)?;
            outcome.rejected += 1;
        }
        Err(err) => {
            let attempts = store.record_failure(&entry.token)?;
            if attempts >= MAX_FETCH_ATTEMPTS {
                error!(
                    token = %entry.token,
                    index = %entry.index,
                    attempts,
                    "giving up on message, set aside: {err}"
                );
                store.set_aside(&entry.token)?;
                outcome.abandoned += 1;
            } else {
                error!(
                    token = %entry.token,
                    index = %entry.index,
                    attempts,
                    "failed to process message: {err}"
                );
                outcome.failures.push(FetchFailure {
                    reason: err.to_string(),
                    token: entry.token,
                });
            }
        }
    }
    Ok(())
}

/// Fetches one message on its own session and classifies it.
fn fetch_and_classify(
    connector: &dyn MailboxConnector,
    classifier: &Classifier,
    entry: &ListingEntry,
) -> Result<Classification, MessageError> {
    let mut session = connector.connect()?;
    let raw = fetch_checked(&mut *session, entry);
    if let Err(err) = session.quit() {
        debug!(token = %entry.token, "fetch session did not close cleanly: {err}");
    }
    let email = Email::try_from((entry.token.clone(), raw?.as_slice()))?;
    Ok(classifier.classify(&email))
}

/// Fetches the raw message after checking its token is still the listed one.
fn fetch_checked(
    session: &mut dyn MailboxSession,
    entry: &ListingEntry,
) -> Result<Vec<u8>, fetch::Error> {
    let found = session.fetch_token(entry.index)?;
    if found != entry.token {
        return Err(fetch::Error::TokenMismatch {
            index: entry.index,
            expected: entry.token.clone(),
            found,
        });
    }
    session.fetch_raw(entry.index)
}

/// Errors that only affect one message.
#[derive(Debug, thiserror::Error)]
enum MessageError {
    /// Fetching failed.
    #[error(transparent)]
    Fetch(#[from] fetch::Error),
    /// The message could not be parsed.
    #[error(transparent)]
    Parse(#[from] fetch::parser::Error),
}

/// Errors that abort a scan or a commit.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The mailbox could not be listed.
    #[error(transparent)]
    Mailbox(#[from] fetch::Error),
    /// The worker pool failed.
    #[error(transparent)]
    Pool(#[from] pool::Error),
    /// The state could not be persisted.
    #[error(transparent)]
    State(#[from] state::Error),
}
