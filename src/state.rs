//! Durable intake bookkeeping: the cursor, the processed set and the
//! messages set aside.
//!
//! Everything lives as plain text files in the data directory:
//!
//! - `processed.txt`, one token per line, only ever appended to;
//! - `last_token.txt`, a single line holding the cursor, overwritten;
//! - `set_aside.txt`, one token per line, appended to;
//! - `failures.txt`, one `token count` pair per line, rewritten.
//!
//! Set-aside messages are neither processed nor pending: the batch walk
//! skips them so they never take the place of older mail.
//!
//! A missing or unreadable file is treated as empty. Write failures are
//! errors, since ignoring them would let a message be processed twice.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::fetch::MessageToken;

/// File holding the processed set.
pub const PROCESSED_FILE: &str = "processed.txt";

/// File holding the cursor.
pub const CURSOR_FILE: &str = "last_token.txt";

/// File holding the tokens set aside.
pub const SET_ASIDE_FILE: &str = "set_aside.txt";

/// File holding the failed attempts per token.
pub const FAILURES_FILE: &str = "failures.txt";

/// Newest token already accounted for by a previous scan.
///
/// Empty on the first run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cursor(Option<MessageToken>);

impl Cursor {
    /// Returns the token, if any.
    pub const fn as_token(&self) -> Option<&MessageToken> {
        self.0.as_ref()
    }

    /// Whether `token` is the cursor.
    pub fn is(&self, token: &MessageToken) -> bool {
        self.0.as_ref() == Some(token)
    }
}

impl From<MessageToken> for Cursor {
    fn from(token: MessageToken) -> Self {
        Self(Some(token))
    }
}

/// Tokens that were fully accounted for.
pub type ProcessedSet = HashSet<MessageToken>;

/// Flat-file store for the intake bookkeeping.
///
/// Only one process may use a data directory at a time; there is no locking.
#[derive(Debug)]
pub struct StateStore {
    /// Directory containing the files
    dir: PathBuf,
    /// Failed attempts of the tokens still being retried
    failures: BTreeMap<MessageToken, u32>,
    /// In-memory copy of the processed set, used to keep marks idempotent
    processed: ProcessedSet,
    /// Tokens the walk skips without committing them
    set_aside: ProcessedSet,
}

impl StateStore {
    /// Moves the cursor to `token`.
    pub fn advance_cursor(&mut self, token: &MessageToken) -> Result<(), Error> {
        let path = self.dir.join(CURSOR_FILE);
        self.ensure_dir()?;
        fs::write(&path, token.as_str()).map_err(|source| Error::Io { path, source })
    }

    /// Returns the tokens set aside, as of the last [`load`](Self::load).
    pub const fn as_set_aside(&self) -> &ProcessedSet {
        &self.set_aside
    }

    /// Forgets the failed attempts of `token`.
    pub fn clear_failures(&mut self, token: &MessageToken) -> Result<(), Error> {
        if self.failures.remove(token).is_some() {
            self.write_failures()?;
        }
        Ok(())
    }

    /// Creates the data directory if needed.
    fn ensure_dir(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.dir).map_err(|source| Error::Io {
            path: self.dir.clone(),
            source,
        })
    }

    /// Reads the cursor and the processed set from disk.
    ///
    /// The processed set, the tokens set aside and the failure counts are
    /// also cached so later writes stay idempotent.
    pub fn load(&mut self) -> (Cursor, ProcessedSet) {
        let cursor = read_lossy(&self.dir.join(CURSOR_FILE))
            .map(|content| content.trim().to_owned())
            .filter(|token| !token.is_empty())
            .map(MessageToken::new);

        self.processed = read_tokens(&self.dir.join(PROCESSED_FILE));
        self.set_aside = read_tokens(&self.dir.join(SET_ASIDE_FILE));
        self.failures = read_lossy(&self.dir.join(FAILURES_FILE))
            .map(|content| parse_failures(&content))
            .unwrap_or_default();

        (Cursor(cursor), self.processed.clone())
    }

    /// Appends `token` to the processed set.
    ///
    /// Marking a token that is already present does not touch the file.
    pub fn mark_processed(&mut self, token: &MessageToken) -> Result<(), Error> {
        if self.processed.contains(token) {
            return Ok(());
        }
        self.append(PROCESSED_FILE, token)?;
        self.processed.insert(token.clone());
        Ok(())
    }

    /// Opens the store rooted at `dir`.
    ///
    /// Nothing is read until [`load`](Self::load) is called.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            failures: BTreeMap::new(),
            processed: ProcessedSet::new(),
            set_aside: ProcessedSet::new(),
        }
    }

    /// Counts one more failed attempt of `token` and returns the total.
    pub fn record_failure(&mut self, token: &MessageToken) -> Result<u32, Error> {
        let attempts = self.failures.entry(token.clone()).or_default();
        *attempts += 1;
        let attempts = *attempts;
        self.write_failures()?;
        Ok(attempts)
    }

    /// Sets `token` aside so later walks skip it.
    ///
    /// Its failure count, if any, is dropped.
    pub fn set_aside(&mut self, token: &MessageToken) -> Result<(), Error> {
        self.clear_failures(token)?;
        if self.set_aside.contains(token) {
            return Ok(());
        }
        self.append(SET_ASIDE_FILE, token)?;
        self.set_aside.insert(token.clone());
        Ok(())
    }

    /// Appends one token line to `file`.
    fn append(&self, file: &str, token: &MessageToken) -> Result<(), Error> {
        self.ensure_dir()?;
        let path = self.dir.join(file);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| Error::Io {
                path: path.clone(),
                source,
            })?;
        writeln!(file, "{token}").map_err(|source| Error::Io { path, source })
    }

    /// Rewrites the failure counts.
    fn write_failures(&self) -> Result<(), Error> {
        self.ensure_dir()?;
        let path = self.dir.join(FAILURES_FILE);
        let content = self
            .failures
            .iter()
            .map(|(token, attempts)| format!("{token} {attempts}\n"))
            .collect::<String>();
        fs::write(&path, content).map_err(|source| Error::Io { path, source })
    }
}

/// Parses the failure counts, one `token count` line each.
fn parse_failures(content: &str) -> BTreeMap<MessageToken, u32> {
    content.lines().filter_map(parse_failure).collect()
}

/// Parses a `token count` line, skipping anything malformed.
fn parse_failure(line: &str) -> Option<(MessageToken, u32)> {
    let (token, attempts) = line.trim().rsplit_once(' ')?;
    let attempts = attempts.parse().ok()?;
    (!token.is_empty()).then(|| (MessageToken::new(token), attempts))
}

/// Reads a file, treating absence and invalid content as empty.
fn read_lossy(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    Some(String::from_utf8(bytes).unwrap_or_else(|err| {
        tracing::warn!(
            path = %path.display(),
            "state file is not valid UTF-8, reading what is left"
        );
        String::from_utf8_lossy(err.as_bytes()).into_owned()
    }))
}

/// Reads a file of one token per line.
fn read_tokens(path: &Path) -> ProcessedSet {
    read_lossy(path)
        .map(|content| {
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(MessageToken::new)
                .collect()
        })
        .unwrap_or_default()
}

/// Errors that may occur while persisting the state.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to write a state file.
    #[error("failed to write {}: {source}", path.display())]
    Io {
        /// File or directory that could not be written
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
}
