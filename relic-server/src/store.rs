//! Metadata store for relics, clients, bookmarks, comments and reports.
//!
//! The store is a redb database. Every entity lives in its own table as a postcard encoded
//! row, with index tables for the lookups the services need. Services open a [`ReadTx`] or
//! [`WriteTx`], work on typed rows and commit. redb serializes write transactions, so a write
//! transaction is also the unit of consistency for counters like [`Client::relic_count`].

use std::{path::Path, sync::Arc};

use redb::{
    Database, ReadTransaction, ReadableMultimapTable, ReadableTable, WriteTransaction,
    backends::InMemoryBackend,
};
use serde::{Serialize, de::DeserializeOwned};
use snafu::{ResultExt, Snafu};
use tracing::info;

use crate::models::{Bookmark, Client, Comment, Relic, Report};

use self::tables::*;

mod tables;

/// Errors from the metadata store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum StoreError {
    /// The database directory could not be created.
    #[snafu(display("failed to create database directory at {}", path.display()))]
    CreateDir {
        /// Directory that was attempted.
        path: std::path::PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Opening the database failed.
    #[snafu(transparent)]
    Database {
        /// Underlying error.
        source: redb::DatabaseError,
    },
    /// Starting a transaction failed.
    #[snafu(transparent)]
    Transaction {
        /// Underlying error.
        source: redb::TransactionError,
    },
    /// Opening a table failed.
    #[snafu(transparent)]
    Table {
        /// Underlying error.
        source: redb::TableError,
    },
    /// Reading or writing a table failed.
    #[snafu(transparent)]
    Storage {
        /// Underlying error.
        source: redb::StorageError,
    },
    /// Committing a transaction failed.
    #[snafu(transparent)]
    Commit {
        /// Underlying error.
        source: redb::CommitError,
    },
    /// A row could not be encoded.
    #[snafu(display("failed to encode row"))]
    Encode {
        /// Underlying error.
        source: postcard::Error,
    },
    /// A stored row could not be decoded.
    #[snafu(display("failed to decode row"))]
    Decode {
        /// Underlying error.
        source: postcard::Error,
    },
}

type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Handle to the metadata database.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    db: Arc<Database>,
}

impl MetadataStore {
    /// Open or create a database file.
    pub fn persistent(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("loading metadata database from {}", path.display());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu { path: parent })?;
        }
        let db = Database::builder().create(path)?;
        Self::open(db)
    }

    /// Create a database living in memory.
    pub fn in_memory() -> Result<Self> {
        info!("using in-memory metadata database");
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::open(db)
    }

    fn open(db: Database) -> Result<Self> {
        let write_tx = db.begin_write()?;
        {
            let _table = write_tx.open_table(RELICS)?;
            let _table = write_tx.open_table(RELICS_BY_CREATED)?;
            let _table = write_tx.open_multimap_table(RELICS_BY_PARENT)?;
            let _table = write_tx.open_multimap_table(RELICS_BY_CLIENT)?;
            let _table = write_tx.open_table(CLIENTS)?;
            let _table = write_tx.open_table(BOOKMARKS)?;
            let _table = write_tx.open_table(COMMENTS)?;
            let _table = write_tx.open_multimap_table(COMMENTS_BY_RELIC)?;
            let _table = write_tx.open_table(REPORTS)?;
        }
        write_tx.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Start a read transaction on a consistent snapshot.
    pub fn read(&self) -> Result<ReadTx> {
        Ok(ReadTx {
            tx: self.db.begin_read()?,
        })
    }

    /// Start a write transaction.
    ///
    /// Must not be held across blob I/O.
    pub fn write(&self) -> Result<WriteTx> {
        Ok(WriteTx {
            tx: self.db.begin_write()?,
        })
    }
}

/// A read-only snapshot of the store.
#[derive(derive_more::Debug)]
pub struct ReadTx {
    #[debug("ReadTransaction")]
    tx: ReadTransaction,
}

/// A pending change to the store, discarded unless [`WriteTx::commit`] is called.
#[derive(derive_more::Debug)]
pub struct WriteTx {
    #[debug("WriteTransaction")]
    tx: WriteTransaction,
}

macro_rules! impl_reads {
    ($tx:ty) => {
        impl $tx {
            /// Get a relic, including soft-deleted ones.
            pub fn relic(&self, id: &str) -> Result<Option<Relic>> {
                get_row(&self.tx.open_table(RELICS)?, id)
            }

            /// Whether a relic row exists.
            pub fn relic_exists(&self, id: &str) -> Result<bool> {
                Ok(self.tx.open_table(RELICS)?.get(id)?.is_some())
            }

            /// All relic rows, newest first.
            pub fn relics_newest_first(&self) -> Result<Vec<Relic>> {
                let index = self.tx.open_table(RELICS_BY_CREATED)?;
                let relics = self.tx.open_table(RELICS)?;
                let mut out = Vec::new();
                for entry in index.iter()?.rev() {
                    let (key, _) = entry?;
                    let (_, id) = key.value();
                    if let Some(relic) = get_row(&relics, id)? {
                        out.push(relic);
                    }
                }
                Ok(out)
            }

            /// Relics whose parent is `parent_id`, oldest first.
            pub fn children(&self, parent_id: &str) -> Result<Vec<Relic>> {
                let ids = multimap_ids(&self.tx.open_multimap_table(RELICS_BY_PARENT)?, parent_id)?;
                let mut out = get_rows(&self.tx.open_table(RELICS)?, &ids)?;
                out.sort_by(|a: &Relic, b: &Relic| a.created_at.cmp(&b.created_at));
                Ok(out)
            }

            /// Relics owned by a client, newest first.
            pub fn relics_of_client(&self, client_id: &str) -> Result<Vec<Relic>> {
                let ids = multimap_ids(&self.tx.open_multimap_table(RELICS_BY_CLIENT)?, client_id)?;
                let mut out = get_rows(&self.tx.open_table(RELICS)?, &ids)?;
                out.sort_by(|a: &Relic, b: &Relic| b.created_at.cmp(&a.created_at));
                Ok(out)
            }

            /// Get a client.
            pub fn client(&self, id: &str) -> Result<Option<Client>> {
                get_row(&self.tx.open_table(CLIENTS)?, id)
            }

            /// All clients, oldest first.
            pub fn clients(&self) -> Result<Vec<Client>> {
                let mut out: Vec<Client> = all_rows(&self.tx.open_table(CLIENTS)?)?;
                out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                Ok(out)
            }

            /// Get the bookmark a client holds on a relic.
            pub fn bookmark(&self, client_id: &str, relic_id: &str) -> Result<Option<Bookmark>> {
                let table = self.tx.open_table(BOOKMARKS)?;
                let Some(row) = table.get((client_id, relic_id))? else {
                    return Ok(None);
                };
                decode(row.value()).map(Some)
            }

            /// Bookmarks held by a client.
            pub fn bookmarks_of_client(&self, client_id: &str) -> Result<Vec<Bookmark>> {
                let table = self.tx.open_table(BOOKMARKS)?;
                let mut out = Vec::new();
                for entry in table.range((client_id, "")..)? {
                    let (key, value) = entry?;
                    if key.value().0 != client_id {
                        break;
                    }
                    out.push(decode(value.value())?);
                }
                Ok(out)
            }

            /// All bookmarks.
            pub fn bookmarks(&self) -> Result<Vec<Bookmark>> {
                let table = self.tx.open_table(BOOKMARKS)?;
                let mut out = Vec::new();
                for entry in table.iter()? {
                    let (_, value) = entry?;
                    out.push(decode(value.value())?);
                }
                Ok(out)
            }

            /// Get a comment.
            pub fn comment(&self, id: &str) -> Result<Option<Comment>> {
                get_row(&self.tx.open_table(COMMENTS)?, id)
            }

            /// Whether a comment row exists.
            pub fn comment_exists(&self, id: &str) -> Result<bool> {
                Ok(self.tx.open_table(COMMENTS)?.get(id)?.is_some())
            }

            /// Comments on a relic, unordered.
            pub fn comments_of_relic(&self, relic_id: &str) -> Result<Vec<Comment>> {
                let ids = multimap_ids(&self.tx.open_multimap_table(COMMENTS_BY_RELIC)?, relic_id)?;
                get_rows(&self.tx.open_table(COMMENTS)?, &ids)
            }

            /// All comments.
            pub fn comments(&self) -> Result<Vec<Comment>> {
                all_rows(&self.tx.open_table(COMMENTS)?)
            }

            /// Get a report.
            pub fn report(&self, id: &str) -> Result<Option<Report>> {
                get_row(&self.tx.open_table(REPORTS)?, id)
            }

            /// Whether a report row exists.
            pub fn report_exists(&self, id: &str) -> Result<bool> {
                Ok(self.tx.open_table(REPORTS)?.get(id)?.is_some())
            }

            /// All reports, newest first.
            pub fn reports(&self) -> Result<Vec<Report>> {
                let mut out: Vec<Report> = all_rows(&self.tx.open_table(REPORTS)?)?;
                out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                Ok(out)
            }
        }
    };
}

impl_reads!(ReadTx);
impl_reads!(WriteTx);

impl WriteTx {
    /// Insert a new relic row with its index entries.
    pub fn insert_relic(&self, relic: &Relic) -> Result<()> {
        let value = encode(relic)?;
        self.tx
            .open_table(RELICS)?
            .insert(relic.id.as_str(), value.as_slice())?;
        self.tx
            .open_table(RELICS_BY_CREATED)?
            .insert((relic.created_at.timestamp_micros(), relic.id.as_str()), ())?;
        if let Some(parent_id) = &relic.parent_id {
            self.tx
                .open_multimap_table(RELICS_BY_PARENT)?
                .insert(parent_id.as_str(), relic.id.as_str())?;
        }
        if let Some(client_id) = &relic.client_id {
            self.tx
                .open_multimap_table(RELICS_BY_CLIENT)?
                .insert(client_id.as_str(), relic.id.as_str())?;
        }
        Ok(())
    }

    /// Replace an existing relic row.
    ///
    /// Ownership changes are reflected in the client index. Lineage and creation time are
    /// expected to be unchanged.
    pub fn update_relic(&self, relic: &Relic) -> Result<()> {
        let previous_owner = self.relic(&relic.id)?.and_then(|old| old.client_id);
        let value = encode(relic)?;
        self.tx
            .open_table(RELICS)?
            .insert(relic.id.as_str(), value.as_slice())?;
        if previous_owner != relic.client_id {
            let mut index = self.tx.open_multimap_table(RELICS_BY_CLIENT)?;
            if let Some(old) = &previous_owner {
                index.remove(old.as_str(), relic.id.as_str())?;
            }
            if let Some(new) = &relic.client_id {
                index.insert(new.as_str(), relic.id.as_str())?;
            }
        }
        Ok(())
    }

    /// Remove a relic row and its index entries.
    pub fn remove_relic(&self, id: &str) -> Result<Option<Relic>> {
        let Some(relic) = self.relic(id)? else {
            return Ok(None);
        };
        self.tx.open_table(RELICS)?.remove(id)?;
        self.tx
            .open_table(RELICS_BY_CREATED)?
            .remove((relic.created_at.timestamp_micros(), id))?;
        if let Some(parent_id) = &relic.parent_id {
            self.tx
                .open_multimap_table(RELICS_BY_PARENT)?
                .remove(parent_id.as_str(), id)?;
        }
        if let Some(client_id) = &relic.client_id {
            self.tx
                .open_multimap_table(RELICS_BY_CLIENT)?
                .remove(client_id.as_str(), id)?;
        }
        Ok(Some(relic))
    }

    /// Insert or replace a client row.
    pub fn put_client(&self, client: &Client) -> Result<()> {
        put_row(&self.tx, CLIENTS, &client.id, client)
    }

    /// Remove a client row.
    pub fn remove_client(&self, id: &str) -> Result<bool> {
        Ok(self.tx.open_table(CLIENTS)?.remove(id)?.is_some())
    }

    /// Insert or replace a bookmark.
    pub fn put_bookmark(&self, bookmark: &Bookmark) -> Result<()> {
        let value = encode(bookmark)?;
        self.tx.open_table(BOOKMARKS)?.insert(
            (bookmark.client_id.as_str(), bookmark.relic_id.as_str()),
            value.as_slice(),
        )?;
        Ok(())
    }

    /// Remove the bookmark a client holds on a relic.
    pub fn remove_bookmark(&self, client_id: &str, relic_id: &str) -> Result<bool> {
        Ok(self
            .tx
            .open_table(BOOKMARKS)?
            .remove((client_id, relic_id))?
            .is_some())
    }

    /// Remove every bookmark held by a client.
    pub fn remove_bookmarks_of_client(&self, client_id: &str) -> Result<usize> {
        let bookmarks = self.bookmarks_of_client(client_id)?;
        for bookmark in &bookmarks {
            self.remove_bookmark(client_id, &bookmark.relic_id)?;
        }
        Ok(bookmarks.len())
    }

    /// Remove every bookmark on a relic.
    pub fn remove_bookmarks_of_relic(&self, relic_id: &str) -> Result<usize> {
        let bookmarks: Vec<_> = self
            .bookmarks()?
            .into_iter()
            .filter(|b| b.relic_id == relic_id)
            .collect();
        for bookmark in &bookmarks {
            self.remove_bookmark(&bookmark.client_id, relic_id)?;
        }
        Ok(bookmarks.len())
    }

    /// Insert or replace a comment.
    pub fn put_comment(&self, comment: &Comment) -> Result<()> {
        put_row(&self.tx, COMMENTS, &comment.id, comment)?;
        self.tx
            .open_multimap_table(COMMENTS_BY_RELIC)?
            .insert(comment.relic_id.as_str(), comment.id.as_str())?;
        Ok(())
    }

    /// Remove a comment.
    pub fn remove_comment(&self, id: &str) -> Result<bool> {
        let Some(comment) = self.comment(id)? else {
            return Ok(false);
        };
        self.tx.open_table(COMMENTS)?.remove(id)?;
        self.tx
            .open_multimap_table(COMMENTS_BY_RELIC)?
            .remove(comment.relic_id.as_str(), id)?;
        Ok(true)
    }

    /// Remove every comment on a relic.
    pub fn remove_comments_of_relic(&self, relic_id: &str) -> Result<usize> {
        let ids = multimap_ids(&self.tx.open_multimap_table(COMMENTS_BY_RELIC)?, relic_id)?;
        {
            let mut comments = self.tx.open_table(COMMENTS)?;
            for id in &ids {
                comments.remove(id.as_str())?;
            }
        }
        self.tx
            .open_multimap_table(COMMENTS_BY_RELIC)?
            .remove_all(relic_id)?;
        Ok(ids.len())
    }

    /// Insert or replace a report.
    pub fn put_report(&self, report: &Report) -> Result<()> {
        put_row(&self.tx, REPORTS, &report.id, report)
    }

    /// Remove a report.
    pub fn remove_report(&self, id: &str) -> Result<bool> {
        Ok(self.tx.open_table(REPORTS)?.remove(id)?.is_some())
    }

    /// Commit the transaction.
    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }
}

fn encode<T: Serialize>(row: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(row).context(EncodeSnafu)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    postcard::from_bytes(bytes).context(DecodeSnafu)
}

fn put_row<T: Serialize>(
    tx: &WriteTransaction,
    table: redb::TableDefinition<'static, &'static str, &'static [u8]>,
    key: &str,
    row: &T,
) -> Result<()> {
    let value = encode(row)?;
    tx.open_table(table)?.insert(key, value.as_slice())?;
    Ok(())
}

fn get_row<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> Result<Option<T>> {
    let Some(row) = table.get(key)? else {
        return Ok(None);
    };
    decode(row.value()).map(Some)
}

fn get_rows<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    keys: &[String],
) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(row) = get_row(table, key)? {
            out.push(row);
        }
    }
    Ok(out)
}

fn all_rows<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for entry in table.iter()? {
        let (_, value) = entry?;
        out.push(decode(value.value())?);
    }
    Ok(out)
}

fn multimap_ids(
    table: &impl ReadableMultimapTable<&'static str, &'static str>,
    key: &str,
) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for value in table.get(key)? {
        out.push(value?.value().to_string());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};
    use testresult::TestResult;

    use super::*;
    use crate::{blobs::Tier, models::AccessLevel};

    fn relic(id: &str, parent: Option<&str>, client: Option<&str>, age_secs: i64) -> Relic {
        Relic {
            id: id.to_string(),
            client_id: client.map(str::to_string),
            name: None,
            content_type: "text/plain".to_string(),
            language_hint: None,
            size_bytes: 1,
            storage_key: Relic::storage_key_for(id),
            tier: Tier::Standard,
            access_level: AccessLevel::Public,
            password_hash: None,
            access_count: 0,
            created_at: Utc::now() - TimeDelta::seconds(age_secs),
            expires_at: None,
            deleted_at: None,
            parent_id: parent.map(str::to_string),
            root_id: parent.unwrap_or(id).to_string(),
            version_number: 1,
            fork_of: None,
        }
    }

    #[test]
    fn relic_indexes() -> TestResult {
        let store = MetadataStore::in_memory()?;
        let tx = store.write()?;
        tx.insert_relic(&relic("root", None, Some("alice"), 30))?;
        tx.insert_relic(&relic("child-1", Some("root"), Some("bob"), 20))?;
        tx.insert_relic(&relic("child-2", Some("root"), None, 10))?;
        tx.commit()?;

        let tx = store.read()?;
        let ids = |relics: Vec<Relic>| relics.into_iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(ids(tx.relics_newest_first()?), ["child-2", "child-1", "root"]);
        assert_eq!(ids(tx.children("root")?), ["child-1", "child-2"]);
        assert_eq!(ids(tx.relics_of_client("alice")?), ["root"]);
        assert!(tx.relic_exists("child-1")?);
        drop(tx);

        let tx = store.write()?;
        let removed = tx.remove_relic("child-1")?;
        assert_eq!(removed.map(|r| r.id).as_deref(), Some("child-1"));
        tx.commit()?;

        let tx = store.read()?;
        assert!(tx.relic("child-1")?.is_none());
        assert_eq!(ids(tx.children("root")?), ["child-2"]);
        assert!(tx.relics_of_client("bob")?.is_empty());
        assert_eq!(tx.relics_newest_first()?.len(), 2);
        Ok(())
    }

    #[test]
    fn ownership_change_moves_index() -> TestResult {
        let store = MetadataStore::in_memory()?;
        let tx = store.write()?;
        let mut row = relic("a", None, Some("alice"), 0);
        tx.insert_relic(&row)?;
        row.client_id = None;
        tx.update_relic(&row)?;
        tx.commit()?;

        let tx = store.read()?;
        assert!(tx.relics_of_client("alice")?.is_empty());
        assert_eq!(tx.relic("a")?.and_then(|r| r.client_id), None);
        Ok(())
    }

    #[test]
    fn uncommitted_writes_are_discarded() -> TestResult {
        let store = MetadataStore::in_memory()?;
        {
            let tx = store.write()?;
            tx.put_client(&Client::new("alice"))?;
        }
        assert!(store.read()?.client("alice")?.is_none());
        Ok(())
    }

    #[test]
    fn bookmarks_by_client() -> TestResult {
        let store = MetadataStore::in_memory()?;
        let tx = store.write()?;
        for (client, relic) in [("a", "r1"), ("a", "r2"), ("b", "r1"), ("ab", "r3")] {
            tx.put_bookmark(&Bookmark {
                id: format!("{client}-{relic}"),
                client_id: client.to_string(),
                relic_id: relic.to_string(),
                created_at: Utc::now(),
            })?;
        }
        tx.commit()?;

        let tx = store.read()?;
        assert_eq!(tx.bookmarks_of_client("a")?.len(), 2);
        assert!(tx.bookmark("b", "r1")?.is_some());
        assert!(tx.bookmark("b", "r2")?.is_none());
        drop(tx);

        let tx = store.write()?;
        assert_eq!(tx.remove_bookmarks_of_relic("r1")?, 2);
        assert_eq!(tx.remove_bookmarks_of_client("ab")?, 1);
        tx.commit()?;
        assert_eq!(store.read()?.bookmarks()?.len(), 1);
        Ok(())
    }

    #[test]
    fn comments_by_relic() -> TestResult {
        let store = MetadataStore::in_memory()?;
        let tx = store.write()?;
        for (id, relic) in [("c1", "r1"), ("c2", "r1"), ("c3", "r2")] {
            tx.put_comment(&Comment {
                id: id.to_string(),
                relic_id: relic.to_string(),
                client_id: "alice".to_string(),
                line_number: None,
                parent_id: None,
                content: "hi".to_string(),
                created_at: Utc::now(),
                updated_at: None,
            })?;
        }
        tx.commit()?;
        assert_eq!(store.read()?.comments_of_relic("r1")?.len(), 2);

        let tx = store.write()?;
        assert!(tx.remove_comment("c3")?);
        assert_eq!(tx.remove_comments_of_relic("r1")?, 2);
        tx.commit()?;
        assert!(store.read()?.comments()?.is_empty());
        Ok(())
    }
}
