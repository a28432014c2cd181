//! redb table definitions.
//!
//! Rows are postcard encoded entities, indexes map back to row keys.

use redb::{MultimapTableDefinition, TableDefinition};

pub(super) const RELICS: TableDefinition<&str, &[u8]> = TableDefinition::new("relics-1");
/// `(created_at micros, relic id)`, iterated backwards for newest first listings.
pub(super) const RELICS_BY_CREATED: TableDefinition<(i64, &str), ()> =
    TableDefinition::new("relics-by-created-1");
pub(super) const RELICS_BY_PARENT: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("relics-by-parent-1");
pub(super) const RELICS_BY_CLIENT: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("relics-by-client-1");

pub(super) const CLIENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("clients-1");

/// Keyed by `(client id, relic id)` which makes a bookmark unique per pair.
pub(super) const BOOKMARKS: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("bookmarks-1");

pub(super) const COMMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("comments-1");
pub(super) const COMMENTS_BY_RELIC: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("comments-by-relic-1");

pub(super) const REPORTS: TableDefinition<&str, &[u8]> = TableDefinition::new("reports-1");
