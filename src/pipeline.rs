//! One full cycle: scan, hand the orders over, report, commit.
//!
//! The orders of a cycle are committed only once their report was
//! delivered. Until then they stay in the in-flight snapshot and are found
//! again by the next scan.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{Span, info, warn};

use crate::errors::Result;
use crate::intake::{Intake, Order};
use crate::report::snapshot::Snapshot;
use crate::report::{Report, Reporter};

/// Retrieves and uploads the documents of an order.
pub trait OrderHandler {
    /// Returns whether the documents of `order` were uploaded.
    fn handle(&self, order: &Order) -> bool;
}

impl<F: Fn(&Order) -> bool> OrderHandler for F {
    fn handle(&self, order: &Order) -> bool {
        self(order)
    }
}

/// Runs an external program once per order.
///
/// The program is called as `PROGRAM <numero> <fecha_aut> <fecha_orden>`,
/// with empty arguments for unknown dates. Exit status 0 means uploaded.
#[derive(Clone, Debug)]
pub struct CommandHandler {
    /// Program to run
    program: PathBuf,
}

impl CommandHandler {
    /// Creates a handler running `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl OrderHandler for CommandHandler {
    fn handle(&self, order: &Order) -> bool {
        let status = Command::new(&self.program)
            .arg(&order.numero)
            .arg(order.fecha_aut.as_deref().unwrap_or_default())
            .arg(order.fecha_orden.as_deref().unwrap_or_default())
            .stdin(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => true,
            Ok(status) => {
                warn!(numero = %order.numero, "handler reported failure: {status}");
                false
            }
            Err(err) => {
                warn!(
                    numero = %order.numero,
                    program = %self.program.display(),
                    "handler could not run: {err}"
                );
                false
            }
        }
    }
}

/// Handler used when none is configured: every order is missing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHandler;

impl OrderHandler for NoHandler {
    fn handle(&self, _order: &Order) -> bool {
        false
    }
}

/// Summary of one cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Whether the report was delivered and the orders committed
    pub delivered: bool,
    /// Messages that failed and will be retried
    pub failed: usize,
    /// Orders whose documents were not found
    pub missing: Vec<String>,
    /// Orders whose documents were uploaded
    pub succeeded: Vec<String>,
}

/// Ties the intake, the order handler and the reporter together.
pub struct Pipeline {
    /// Label shown in the reports
    category: Option<String>,
    /// Report destination
    destination: Option<String>,
    /// Uploads the documents of each order
    handler: Box<dyn OrderHandler>,
    /// Finds the orders
    intake: Intake,
    /// Sends the report
    reporter: Reporter,
    /// Orders of the cycle in flight
    snapshot: Snapshot,
    /// Logging context of this component
    span: Span,
}

impl Pipeline {
    /// Creates a pipeline.
    pub fn new(
        intake: Intake,
        reporter: Reporter,
        handler: Box<dyn OrderHandler>,
        snapshot: Snapshot,
        destination: Option<String>,
        span: Span,
    ) -> Self {
        Self {
            category: None,
            destination,
            handler,
            intake,
            reporter,
            snapshot,
            span,
        }
    }

    /// Runs one cycle.
    ///
    /// Scan and persistence failures are errors. An undelivered report is
    /// not: its orders simply stay pending.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let _entered = self.span.enter();
        let scan = self.intake.scan()?;
        let mut outcome = CycleOutcome {
            failed: scan.failures.len(),
            ..CycleOutcome::default()
        };
        if scan.orders.is_empty() {
            info!("no new orders");
            return Ok(outcome);
        }

        self.snapshot.write(&scan.orders)?;
        for order in &scan.orders {
            if self.handler.handle(order) {
                outcome.succeeded.push(order.numero.clone());
            } else {
                outcome.missing.push(order.numero.clone());
            }
        }

        let report = Report {
            category: self.category.as_deref(),
            missing: &outcome.missing,
            orders: &scan.orders,
            succeeded: &outcome.succeeded,
        };
        let destination = self.destination.as_deref().unwrap_or_default();
        if self.reporter.send_report(&report, destination) {
            self.intake.confirm_delivered(&scan)?;
            self.snapshot.clear()?;
            outcome.delivered = true;
        } else {
            warn!(orders = scan.orders.len(), "report not delivered, orders stay pending");
        }
        Ok(outcome)
    }

    /// Sets the label shown in the reports.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}
