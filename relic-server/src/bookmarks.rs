//! Per-client bookmarks on relics.

use chrono::Utc;
use serde::Serialize;
use snafu::ensure;
use tracing::debug;

use crate::{
    clients::ClientService,
    error::{ConflictSnafu, NotFoundSnafu, Result},
    id,
    models::{Bookmark, Relic},
    store::MetadataStore,
};

/// A bookmark joined with the relic it points to.
#[derive(Debug, Clone, Serialize)]
pub struct BookmarkedRelic {
    /// Bookmark id.
    pub bookmark_id: String,
    /// When the bookmark was added.
    pub bookmarked_at: chrono::DateTime<Utc>,
    /// The relic.
    pub relic: Relic,
}

/// The bookmark service.
#[derive(Debug, Clone)]
pub struct BookmarkService {
    store: MetadataStore,
    clients: ClientService,
}

impl BookmarkService {
    /// Create the service.
    pub fn new(store: MetadataStore, clients: ClientService) -> Self {
        Self { store, clients }
    }

    /// Bookmark a live relic.
    pub fn add(&self, key: Option<&str>, relic_id: &str) -> Result<Bookmark> {
        let caller = self.clients.require(key)?;
        let tx = self.store.write()?;
        match tx.relic(relic_id)? {
            Some(relic) if !relic.is_deleted() => {}
            _ => return NotFoundSnafu { what: "relic" }.fail(),
        }
        ensure!(
            tx.bookmark(caller.id(), relic_id)?.is_none(),
            ConflictSnafu {
                message: "relic already bookmarked"
            }
        );
        let bookmark = Bookmark {
            id: id::generate_id(),
            client_id: caller.client.id,
            relic_id: relic_id.to_string(),
            created_at: Utc::now(),
        };
        tx.put_bookmark(&bookmark)?;
        tx.commit()?;
        debug!(client_id = %bookmark.client_id, relic_id, "added bookmark");
        Ok(bookmark)
    }

    /// Remove a bookmark.
    pub fn remove(&self, key: Option<&str>, relic_id: &str) -> Result<()> {
        let caller = self.clients.require(key)?;
        let tx = self.store.write()?;
        ensure!(
            tx.remove_bookmark(caller.id(), relic_id)?,
            NotFoundSnafu { what: "bookmark" }
        );
        tx.commit()?;
        Ok(())
    }

    /// Whether the caller bookmarked a relic.
    pub fn check(&self, key: Option<&str>, relic_id: &str) -> Result<Option<Bookmark>> {
        let caller = self.clients.require(key)?;
        Ok(self.store.read()?.bookmark(caller.id(), relic_id)?)
    }

    /// The caller's bookmarks, newest first. Bookmarks of deleted relics are skipped.
    pub fn list(&self, key: Option<&str>) -> Result<Vec<BookmarkedRelic>> {
        let caller = self.clients.require(key)?;
        let tx = self.store.read()?;
        let mut bookmarks = tx.bookmarks_of_client(caller.id())?;
        bookmarks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let mut out = Vec::with_capacity(bookmarks.len());
        for bookmark in bookmarks {
            match tx.relic(&bookmark.relic_id)? {
                Some(relic) if !relic.is_deleted() => out.push(BookmarkedRelic {
                    bookmark_id: bookmark.id,
                    bookmarked_at: bookmark.created_at,
                    relic,
                }),
                _ => {}
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use crate::{
        error::Error,
        relics::{NewRelic, Upload},
        state::AppState,
    };

    #[tokio::test]
    async fn bookmark_lifecycle() -> TestResult {
        let (state, _) = AppState::for_tests();
        let upload = || Upload {
            data: "x".into(),
            ..Default::default()
        };
        let a = state.relics.create(None, upload(), NewRelic::default()).await?;
        let b = state.relics.create(None, upload(), NewRelic::default()).await?;
        let bookmarks = &state.bookmarks;

        assert!(matches!(
            bookmarks.add(Some("alice"), &a.id),
            Err(Error::Unauthorized)
        ));
        state.clients.register(Some("alice"))?;
        bookmarks.add(Some("alice"), &a.id)?;
        assert!(matches!(
            bookmarks.add(Some("alice"), &a.id),
            Err(Error::Conflict { .. })
        ));
        assert!(matches!(
            bookmarks.add(Some("alice"), "missing"),
            Err(Error::NotFound { .. })
        ));
        bookmarks.add(Some("alice"), &b.id)?;
        assert!(bookmarks.check(Some("alice"), &b.id)?.is_some());

        state.relics.delete(Some("admin"), &b.id).await?;
        let listed = bookmarks.list(Some("alice"))?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].relic.id, a.id);

        bookmarks.remove(Some("alice"), &a.id)?;
        assert!(matches!(
            bookmarks.remove(Some("alice"), &a.id),
            Err(Error::NotFound { .. })
        ));
        assert!(bookmarks.check(Some("alice"), &a.id)?.is_none());
        Ok(())
    }
}
