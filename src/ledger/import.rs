//! Bulk loading of resources from a plain text list.
//!
//! Operators usually start with a file of links, one per line. Files written
//! by the earlier bot mark a claimed line as `<link>||<user id>`, and that form
//! is accepted too so an existing pool can be migrated with its claims intact.

use std::path::Path;

use super::record::ResourceRecord;
use super::store::StoreError;
use crate::types::UserId;

/// Separator between a link and its claimant in the legacy format.
pub const LEGACY_DELIMITER: &str = "||";

/// Parses a plain text resource list.
///
/// Blank lines are skipped and surrounding whitespace is trimmed. A line
/// with an empty claimant after the delimiter counts as unclaimed.
pub fn parse_plain_lines(text: &str) -> Vec<ResourceRecord> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once(LEGACY_DELIMITER) {
            Some((value, claimant)) if !claimant.trim().is_empty() => {
                ResourceRecord::claimed(value.trim(), UserId::new(claimant.trim()))
            }
            Some((value, _)) => ResourceRecord::unclaimed(value.trim()),
            None => ResourceRecord::unclaimed(line),
        })
        .collect()
}

/// Reads and parses a plain text resource list from disk.
pub fn import_plain_lines(path: &Path) -> Result<Vec<ResourceRecord>, StoreError> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_plain_lines(&text))
}
