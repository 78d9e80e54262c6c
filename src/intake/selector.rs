//! Chooses which messages a scan fetches.

use crate::fetch::{ListingEntry, MessageToken};
use crate::state::{Cursor, ProcessedSet};

/// Result of walking a mailbox listing.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Selection {
    /// Whether the walk stopped because the batch was full
    ///
    /// Older messages may still be waiting when this is set.
    pub capped: bool,
    /// Newest token seen during the walk, the cursor candidate
    pub newest: Option<MessageToken>,
    /// Messages to fetch, newest first
    pub picks: Vec<ListingEntry>,
}

/// Walks `listing` (oldest first, as the server returns it) from newest to
/// oldest.
///
/// The walk stops at the stored cursor, skips the `settled` tokens (processed
/// or set aside) and selects at most `batch_size` messages. The first token
/// seen becomes the cursor candidate even if it is skipped.
pub fn select(
    listing: &[ListingEntry],
    cursor: &Cursor,
    settled: &ProcessedSet,
    batch_size: usize,
) -> Selection {
    let mut selection = Selection::default();
    for entry in listing.iter().rev() {
        if cursor.is(&entry.token) {
            break;
        }
        if selection.newest.is_none() {
            selection.newest = Some(entry.token.clone());
        }
        if settled.contains(&entry.token) {
            continue;
        }
        if selection.picks.len() >= batch_size {
            selection.capped = true;
            break;
        }
        selection.picks.push(entry.clone());
    }
    selection
}
