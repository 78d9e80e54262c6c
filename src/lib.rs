//! Watches a mailbox for purchase-order authorization notifications.
//!
//! Each cycle scans the mailbox for new notifications
//! ([`intake::Intake`]), hands the orders to an external handler, mails a
//! report ([`report::Reporter`]) and, once the report is delivered, records
//! the messages as processed ([`pipeline::Pipeline`]).

pub mod config;
pub mod errors;
pub mod fetch;
pub mod intake;
pub mod pipeline;
pub mod report;
pub mod state;
#[cfg(test)]
mod testing;
