//! Client, bookmark, comment and report routes

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use super::{
    error::AppResult,
    extract::{ClientKey, JsonBody, Params},
    relics::{RelicView, views},
};
use crate::{bookmarks::BookmarkedRelic, comments::CommentView, state::AppState};

#[derive(Debug, Serialize)]
pub struct Registered {
    client_id: String,
    name: Option<String>,
    created_at: DateTime<Utc>,
    relic_count: u64,
    is_admin: bool,
    created: bool,
}

/// `POST /api/v1/client/register`
pub async fn register(
    State(state): State<AppState>,
    key: ClientKey,
) -> AppResult<(StatusCode, Json<Registered>)> {
    let (caller, created) = state.clients.register(key.as_deref())?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(Registered {
            client_id: caller.client.id,
            name: caller.client.name,
            created_at: caller.client.created_at,
            relic_count: caller.client.relic_count,
            is_admin: caller.is_admin,
            created,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct OwnedRelics {
    client_id: String,
    relic_count: usize,
    relics: Vec<RelicView>,
}

/// `GET /api/v1/client/relics`
pub async fn relics(
    State(state): State<AppState>,
    key: ClientKey,
) -> AppResult<Json<OwnedRelics>> {
    let (caller, relics) = state.relics.list_owned(key.as_deref())?;
    Ok(Json(OwnedRelics {
        client_id: caller.client.id,
        relic_count: relics.len(),
        relics: views(relics),
    }))
}

#[derive(Debug, Deserialize)]
pub struct NameUpdate {
    name: String,
}

#[derive(Debug, Serialize)]
pub struct NameUpdated {
    client_id: String,
    name: Option<String>,
}

/// `PUT /api/v1/client/name`
pub async fn set_name(
    State(state): State<AppState>,
    key: ClientKey,
    JsonBody(update): JsonBody<NameUpdate>,
) -> AppResult<Json<NameUpdated>> {
    let client = state.clients.set_name(key.as_deref(), &update.name)?;
    Ok(Json(NameUpdated {
        client_id: client.id,
        name: client.name,
    }))
}

#[derive(Debug, Deserialize)]
pub struct BookmarkQuery {
    relic_id: String,
}

#[derive(Debug, Serialize)]
pub struct BookmarkAdded {
    id: String,
    relic_id: String,
    created_at: DateTime<Utc>,
}

/// `POST /api/v1/bookmarks?relic_id=..`
pub async fn add_bookmark(
    State(state): State<AppState>,
    key: ClientKey,
    Params(query): Params<BookmarkQuery>,
) -> AppResult<(StatusCode, Json<BookmarkAdded>)> {
    let bookmark = state.bookmarks.add(key.as_deref(), &query.relic_id)?;
    Ok((
        StatusCode::CREATED,
        Json(BookmarkAdded {
            id: bookmark.id,
            relic_id: bookmark.relic_id,
            created_at: bookmark.created_at,
        }),
    ))
}

/// `DELETE /api/v1/bookmarks/{relic_id}`
pub async fn remove_bookmark(
    State(state): State<AppState>,
    key: ClientKey,
    Path(relic_id): Path<String>,
) -> AppResult<StatusCode> {
    state.bookmarks.remove(key.as_deref(), &relic_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct BookmarkCheck {
    relic_id: String,
    is_bookmarked: bool,
    bookmark_id: Option<String>,
}

/// `GET /api/v1/bookmarks/check/{relic_id}`
pub async fn check_bookmark(
    State(state): State<AppState>,
    key: ClientKey,
    Path(relic_id): Path<String>,
) -> AppResult<Json<BookmarkCheck>> {
    let bookmark = state.bookmarks.check(key.as_deref(), &relic_id)?;
    Ok(Json(BookmarkCheck {
        relic_id,
        is_bookmarked: bookmark.is_some(),
        bookmark_id: bookmark.map(|b| b.id),
    }))
}

#[derive(Debug, Serialize)]
pub struct BookmarkEntry {
    bookmark_id: String,
    bookmarked_at: DateTime<Utc>,
    #[serde(flatten)]
    relic: RelicView,
}

#[derive(Debug, Serialize)]
pub struct BookmarkList {
    bookmark_count: usize,
    bookmarks: Vec<BookmarkEntry>,
}

/// `GET /api/v1/bookmarks`
pub async fn list_bookmarks(
    State(state): State<AppState>,
    key: ClientKey,
) -> AppResult<Json<BookmarkList>> {
    let bookmarks: Vec<_> = state
        .bookmarks
        .list(key.as_deref())?
        .into_iter()
        .map(|entry: BookmarkedRelic| BookmarkEntry {
            bookmark_id: entry.bookmark_id,
            bookmarked_at: entry.bookmarked_at,
            relic: entry.relic.into(),
        })
        .collect();
    Ok(Json(BookmarkList {
        bookmark_count: bookmarks.len(),
        bookmarks,
    }))
}

#[derive(Debug, Deserialize)]
pub struct NewComment {
    content: String,
    line_number: Option<u32>,
    parent_id: Option<String>,
}

/// `POST /api/v1/relics/{id}/comments`
pub async fn create_comment(
    State(state): State<AppState>,
    key: ClientKey,
    Path(relic_id): Path<String>,
    JsonBody(comment): JsonBody<NewComment>,
) -> AppResult<(StatusCode, Json<CommentView>)> {
    let comment = state.comments.create(
        key.as_deref(),
        &relic_id,
        &comment.content,
        comment.line_number,
        comment.parent_id.as_deref(),
    )?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// `GET /api/v1/relics/{id}/comments`
pub async fn list_comments(
    State(state): State<AppState>,
    Path(relic_id): Path<String>,
) -> AppResult<Json<Vec<CommentView>>> {
    Ok(Json(state.comments.list(&relic_id)?))
}

#[derive(Debug, Deserialize)]
pub struct CommentUpdate {
    content: String,
}

/// `PUT /api/v1/relics/{id}/comments/{comment_id}`
pub async fn update_comment(
    State(state): State<AppState>,
    key: ClientKey,
    Path((relic_id, comment_id)): Path<(String, String)>,
    JsonBody(update): JsonBody<CommentUpdate>,
) -> AppResult<Json<CommentView>> {
    let comment =
        state
            .comments
            .update(key.as_deref(), &relic_id, &comment_id, &update.content)?;
    Ok(Json(comment))
}

/// `DELETE /api/v1/relics/{id}/comments/{comment_id}`
pub async fn delete_comment(
    State(state): State<AppState>,
    key: ClientKey,
    Path((relic_id, comment_id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    state
        .comments
        .delete(key.as_deref(), &relic_id, &comment_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct NewReport {
    relic_id: String,
    reason: String,
}

#[derive(Debug, Serialize)]
pub struct ReportFiled {
    id: String,
    relic_id: String,
}

/// `POST /api/v1/reports`
pub async fn create_report(
    State(state): State<AppState>,
    JsonBody(report): JsonBody<NewReport>,
) -> AppResult<(StatusCode, Json<ReportFiled>)> {
    let report = state.reports.create(&report.relic_id, &report.reason)?;
    Ok((
        StatusCode::CREATED,
        Json(ReportFiled {
            id: report.id,
            relic_id: report.relic_id,
        }),
    ))
}
