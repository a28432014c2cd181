//! Relic routes

use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use http::{
    HeaderValue, StatusCode,
    header::{CONTENT_DISPOSITION, CONTENT_TYPE},
};
use serde::{Deserialize, Serialize};

use super::{
    error::{AppError, AppResult},
    extract::{ClientKey, JsonBody, Params, UploadForm},
};
use crate::{
    blobs::Tier,
    models::{AccessLevel, Page, Relic},
    relics::{ForkOptions, History, NewRelic, RelicDiff, RelicUpdate},
    state::AppState,
};

/// Public projection of a relic.
#[derive(Debug, Clone, Serialize)]
pub struct RelicView {
    id: String,
    client_id: Option<String>,
    name: Option<String>,
    content_type: String,
    language_hint: Option<String>,
    size_bytes: u64,
    tier: Tier,
    access_level: AccessLevel,
    password_protected: bool,
    access_count: u64,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    parent_id: Option<String>,
    root_id: String,
    version_number: u32,
    fork_of: Option<String>,
}

impl From<Relic> for RelicView {
    fn from(relic: Relic) -> Self {
        Self {
            password_protected: relic.is_password_protected(),
            id: relic.id,
            client_id: relic.client_id,
            name: relic.name,
            content_type: relic.content_type,
            language_hint: relic.language_hint,
            size_bytes: relic.size_bytes,
            tier: relic.tier,
            access_level: relic.access_level,
            access_count: relic.access_count,
            created_at: relic.created_at,
            expires_at: relic.expires_at,
            parent_id: relic.parent_id,
            root_id: relic.root_id,
            version_number: relic.version_number,
            fork_of: relic.fork_of,
        }
    }
}

pub(super) fn views(relics: Vec<Relic>) -> Vec<RelicView> {
    relics.into_iter().map(RelicView::from).collect()
}

fn relic_url(id: &str) -> String {
    format!("/{id}")
}

#[derive(Debug, Serialize)]
pub struct Created {
    id: String,
    url: String,
    created_at: DateTime<Utc>,
    size_bytes: u64,
    version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fork_of: Option<String>,
}

impl From<Relic> for Created {
    fn from(relic: Relic) -> Self {
        Self {
            url: relic_url(&relic.id),
            id: relic.id,
            created_at: relic.created_at,
            size_bytes: relic.size_bytes,
            version: relic.version_number,
            parent_id: relic.parent_id,
            fork_of: relic.fork_of,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PasswordQuery {
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

impl From<PageQuery> for Page {
    fn from(query: PageQuery) -> Self {
        Page::new(query.limit, query.offset)
    }
}

#[derive(Debug, Serialize)]
pub struct RelicList {
    relics: Vec<RelicView>,
    total: usize,
}

#[derive(Debug, Deserialize)]
pub struct DiffQuery {
    #[serde(alias = "from")]
    from_id: String,
    #[serde(alias = "to")]
    to_id: String,
    /// Shared password for both sides.
    password: Option<String>,
    from_password: Option<String>,
    to_password: Option<String>,
}

fn file_required() -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, Some("file is required"))
}

/// `POST /api/v1/relics`
pub async fn create(
    State(state): State<AppState>,
    key: ClientKey,
    form: UploadForm,
) -> AppResult<(StatusCode, Json<Created>)> {
    let new = NewRelic {
        name: form.text("name"),
        content_type: form.text("content_type"),
        language_hint: form.text("language_hint"),
        access_level: form.text("access_level"),
        expires_in: form.text("expires_in"),
        password: form.text("password"),
    };
    let upload = form.file.ok_or_else(file_required)?;
    let relic = state.relics.create(key.as_deref(), upload, new).await?;
    Ok((StatusCode::CREATED, Json(relic.into())))
}

/// `GET /api/v1/relics`
pub async fn list(
    State(state): State<AppState>,
    Params(query): Params<PageQuery>,
) -> AppResult<Json<RelicList>> {
    let (relics, total) = state.relics.list(query.into())?;
    Ok(Json(RelicList {
        relics: views(relics),
        total,
    }))
}

/// `GET /api/v1/relics/{id}`
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Params(query): Params<PasswordQuery>,
) -> AppResult<Json<RelicView>> {
    let relic = state.relics.get(&id, query.password.as_deref()).await?;
    Ok(Json(relic.into()))
}

/// `GET /api/v1/relics/{id}/raw` and `GET /{id}/raw`
pub async fn raw(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Params(query): Params<PasswordQuery>,
) -> AppResult<Response> {
    let content = state.relics.get_raw(&id, query.password.as_deref()).await?;
    let content_type = HeaderValue::from_str(&content.content_type)
        .unwrap_or(HeaderValue::from_static(crate::relics::DEFAULT_CONTENT_TYPE));
    let file_name = content.file_name.replace(['"', '\\', '\r', '\n'], "_");
    let disposition = HeaderValue::from_str(&format!("inline; filename=\"{file_name}\""))
        .unwrap_or(HeaderValue::from_static("inline"));
    Ok((
        [(CONTENT_TYPE, content_type), (CONTENT_DISPOSITION, disposition)],
        content.data,
    )
        .into_response())
}

/// `PUT /api/v1/relics/{id}`
pub async fn update(
    State(state): State<AppState>,
    key: ClientKey,
    Path(id): Path<String>,
    JsonBody(update): JsonBody<RelicUpdate>,
) -> AppResult<Json<RelicView>> {
    let relic = state.relics.update(key.as_deref(), &id, update).await?;
    Ok(Json(relic.into()))
}

/// `DELETE /api/v1/relics/{id}`
pub async fn delete(
    State(state): State<AppState>,
    key: ClientKey,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.relics.delete(key.as_deref(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/v1/relics/{id}/fork`
pub async fn fork(
    State(state): State<AppState>,
    key: ClientKey,
    Path(id): Path<String>,
    Params(query): Params<PasswordQuery>,
    form: UploadForm,
) -> AppResult<(StatusCode, Json<Created>)> {
    let options = ForkOptions {
        name: form.text("name"),
        content_type: form.text("content_type"),
        access_level: form.text("access_level"),
        expires_in: form.text("expires_in"),
        password: query.password.or_else(|| form.text("password")),
    };
    let relic = state
        .relics
        .fork(key.as_deref(), &id, form.file, options)
        .await?;
    Ok((StatusCode::CREATED, Json(relic.into())))
}

/// `POST /api/v1/relics/{id}/edit`
pub async fn edit(
    State(state): State<AppState>,
    key: ClientKey,
    Path(id): Path<String>,
    form: UploadForm,
) -> AppResult<(StatusCode, Json<Created>)> {
    let name = form.text("name");
    let upload = form.file.ok_or_else(file_required)?;
    let relic = state
        .relics
        .edit(key.as_deref(), &id, upload, name)
        .await?;
    Ok((StatusCode::CREATED, Json(relic.into())))
}

/// `GET /api/v1/relics/{id}/history`
pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<History>> {
    Ok(Json(state.relics.history(&id)?))
}

/// `GET /api/v1/relics/{id}/parent`
pub async fn parent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<RelicView>> {
    Ok(Json(state.relics.parent(&id)?.into()))
}

/// `GET /api/v1/relics/{id}/children`
pub async fn children(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<RelicView>>> {
    Ok(Json(views(state.relics.children(&id)?)))
}

/// `GET /api/v1/relics/{id}/diff`
pub async fn diff_with_parent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Params(query): Params<PasswordQuery>,
) -> AppResult<Json<RelicDiff>> {
    let diff = state
        .relics
        .diff_with_parent(&id, query.password.as_deref())
        .await?;
    Ok(Json(diff))
}

/// `GET /api/v1/diff?from_id=..&to_id=..`
pub async fn diff(
    State(state): State<AppState>,
    Params(query): Params<DiffQuery>,
) -> AppResult<Json<RelicDiff>> {
    let from_password = query.from_password.as_deref().or(query.password.as_deref());
    let to_password = query.to_password.as_deref().or(query.password.as_deref());
    let diff = state
        .relics
        .diff(&query.from_id, &query.to_id, from_password, to_password)
        .await?;
    Ok(Json(diff))
}
