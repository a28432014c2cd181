//! Comments on relics, optionally anchored to a line and threaded.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use snafu::ensure;
use tracing::debug;

use crate::{
    clients::ClientService,
    error::{ForbiddenSnafu, InvalidArgumentSnafu, NotFoundSnafu, Result},
    id,
    models::Comment,
    store::MetadataStore,
};

/// Longest accepted comment, in characters.
pub const MAX_CONTENT_LEN: usize = 10_000;

/// A comment with its author's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct CommentView {
    pub id: String,
    pub relic_id: String,
    pub client_id: String,
    pub author_name: Option<String>,
    pub line_number: Option<u32>,
    pub parent_id: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CommentView {
    fn new(comment: Comment, author_name: Option<String>) -> Self {
        Self {
            id: comment.id,
            relic_id: comment.relic_id,
            client_id: comment.client_id,
            author_name,
            line_number: comment.line_number,
            parent_id: comment.parent_id,
            content: comment.content,
            created_at: comment.created_at,
            updated_at: comment.updated_at,
        }
    }
}

/// The comment service.
#[derive(Debug, Clone)]
pub struct CommentService {
    store: MetadataStore,
    clients: ClientService,
}

impl CommentService {
    /// Create the service.
    pub fn new(store: MetadataStore, clients: ClientService) -> Self {
        Self { store, clients }
    }

    /// Comment on a live relic. The caller needs a display name.
    pub fn create(
        &self,
        key: Option<&str>,
        relic_id: &str,
        content: &str,
        line_number: Option<u32>,
        parent_id: Option<&str>,
    ) -> Result<CommentView> {
        let caller = self.clients.require(key)?;
        let Some(author_name) = caller.client.name.clone() else {
            return InvalidArgumentSnafu {
                message: "set a display name before commenting",
            }
            .fail();
        };
        let content = validate_content(content)?;

        let tx = self.store.write()?;
        match tx.relic(relic_id)? {
            Some(relic) if !relic.is_deleted() => {}
            _ => return NotFoundSnafu { what: "relic" }.fail(),
        }
        if let Some(parent_id) = parent_id {
            let parent = tx.comment(parent_id)?;
            ensure!(
                parent.is_some_and(|p| p.relic_id == relic_id),
                InvalidArgumentSnafu {
                    message: "parent comment does not belong to this relic"
                }
            );
        }
        let id = id::generate_unique_id(id::DEFAULT_MAX_RETRIES, |id| {
            Ok(tx.comment_exists(id)?)
        })?;
        let comment = Comment {
            id,
            relic_id: relic_id.to_string(),
            client_id: caller.client.id,
            line_number,
            parent_id: parent_id.map(str::to_string),
            content,
            created_at: Utc::now(),
            updated_at: None,
        };
        tx.put_comment(&comment)?;
        tx.commit()?;
        debug!(id = %comment.id, relic_id, "added comment");
        Ok(CommentView::new(comment, Some(author_name)))
    }

    /// Comments on a relic ordered by line, then creation time. Unanchored comments come first.
    pub fn list(&self, relic_id: &str) -> Result<Vec<CommentView>> {
        let tx = self.store.read()?;
        match tx.relic(relic_id)? {
            Some(relic) if !relic.is_deleted() => {}
            _ => return NotFoundSnafu { what: "relic" }.fail(),
        }
        let mut comments = tx.comments_of_relic(relic_id)?;
        comments.sort_by(|a, b| {
            (a.line_number, a.created_at).cmp(&(b.line_number, b.created_at))
        });
        let mut names = BTreeMap::new();
        let mut out = Vec::with_capacity(comments.len());
        for comment in comments {
            if !names.contains_key(&comment.client_id) {
                let name = tx.client(&comment.client_id)?.and_then(|c| c.name);
                names.insert(comment.client_id.clone(), name);
            }
            let name = names.get(&comment.client_id).cloned().flatten();
            out.push(CommentView::new(comment, name));
        }
        Ok(out)
    }

    /// Replace a comment's content. Only the author may do this.
    pub fn update(
        &self,
        key: Option<&str>,
        relic_id: &str,
        comment_id: &str,
        content: &str,
    ) -> Result<CommentView> {
        let caller = self.clients.require(key)?;
        let content = validate_content(content)?;
        let tx = self.store.write()?;
        let mut comment = comment_on(&tx.comment(comment_id)?, relic_id)?;
        ensure!(
            comment.client_id == caller.id(),
            ForbiddenSnafu {
                reason: "only the author can edit a comment"
            }
        );
        comment.content = content;
        comment.updated_at = Some(Utc::now());
        tx.put_comment(&comment)?;
        tx.commit()?;
        Ok(CommentView::new(comment, caller.client.name))
    }

    /// Delete a comment. The author and admins may do this.
    pub fn delete(&self, key: Option<&str>, relic_id: &str, comment_id: &str) -> Result<()> {
        let caller = self.clients.require(key)?;
        let tx = self.store.write()?;
        let comment = comment_on(&tx.comment(comment_id)?, relic_id)?;
        ensure!(
            caller.can_manage(Some(&comment.client_id)),
            ForbiddenSnafu {
                reason: "not allowed to delete this comment"
            }
        );
        tx.remove_comment(comment_id)?;
        tx.commit()?;
        debug!(id = comment_id, by = caller.id(), "deleted comment");
        Ok(())
    }
}

fn comment_on(comment: &Option<Comment>, relic_id: &str) -> Result<Comment> {
    match comment {
        Some(comment) if comment.relic_id == relic_id => Ok(comment.clone()),
        _ => NotFoundSnafu { what: "comment" }.fail(),
    }
}

fn validate_content(content: &str) -> Result<String> {
    let content = content.trim();
    ensure!(
        !content.is_empty(),
        InvalidArgumentSnafu {
            message: "comment must not be empty"
        }
    );
    ensure!(
        content.chars().count() <= MAX_CONTENT_LEN,
        InvalidArgumentSnafu {
            message: format!("comment must be at most {MAX_CONTENT_LEN} characters"),
        }
    );
    Ok(content.to_string())
}
