//! Handles errors, with a custom [`Result`] and [`Error`] type

use core::result;

use crate::report::snapshot;
use crate::{config, intake};

/// Errors that may occur while running the app.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration could not be loaded or is incomplete.
    #[error(transparent)]
    Config(#[from] config::Error),
    /// The built-in extraction patterns failed to compile.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    /// The orders could not be printed.
    #[error("cannot serialize orders: {0}")]
    Output(#[from] serde_json::Error),
    /// Failure while scanning the mailbox.
    #[error(transparent)]
    Intake(#[from] intake::Error),
    /// The in-flight snapshot could not be handled.
    #[error(transparent)]
    Snapshot(#[from] snapshot::Error),
}

/// Overloaded result for the [`descargas_oc`](crate) crate
pub type Result<T = (), E = Error> = result::Result<T, E>;
