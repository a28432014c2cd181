//! Admin routes

use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use http::{
    HeaderValue, StatusCode,
    header::{CONTENT_DISPOSITION, CONTENT_TYPE},
};
use serde::{Deserialize, Serialize};

use super::{
    error::AppResult,
    extract::{ClientKey, Params},
    relics::{RelicView, views},
};
use crate::{
    admin::{AdminCheck, ClientDeletion, ClientView, RelicFilter, Stats},
    backup::BackupInfo,
    config::Config,
    models::{AccessLevel, Page},
    reports::ReportView,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct RelicsQuery {
    limit: Option<usize>,
    offset: Option<usize>,
    access_level: Option<String>,
    client_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RelicList {
    total: usize,
    limit: usize,
    offset: usize,
    relics: Vec<RelicView>,
}

/// `GET /api/v1/admin/check`
pub async fn check(State(state): State<AppState>, key: ClientKey) -> AppResult<Json<AdminCheck>> {
    Ok(Json(state.admin.check(key.as_deref())?))
}

/// `GET /api/v1/admin/relics`
pub async fn relics(
    State(state): State<AppState>,
    key: ClientKey,
    Params(query): Params<RelicsQuery>,
) -> AppResult<Json<RelicList>> {
    let filter = RelicFilter {
        access_level: query
            .access_level
            .as_deref()
            .map(AccessLevel::parse)
            .transpose()?,
        client_id: query.client_id,
    };
    let page = Page::new(query.limit, query.offset);
    let (relics, total) = state.admin.list_relics(key.as_deref(), &filter, page)?;
    Ok(Json(RelicList {
        total,
        limit: page.limit,
        offset: page.offset,
        relics: views(relics),
    }))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ClientList {
    total: usize,
    limit: usize,
    offset: usize,
    clients: Vec<ClientView>,
}

/// `GET /api/v1/admin/clients`
pub async fn clients(
    State(state): State<AppState>,
    key: ClientKey,
    Params(query): Params<PageQuery>,
) -> AppResult<Json<ClientList>> {
    let page = Page::new(query.limit, query.offset);
    let (clients, total) = state.admin.list_clients(key.as_deref(), page)?;
    Ok(Json(ClientList {
        total,
        limit: page.limit,
        offset: page.offset,
        clients,
    }))
}

/// `GET /api/v1/admin/stats`
pub async fn stats(State(state): State<AppState>, key: ClientKey) -> AppResult<Json<Stats>> {
    Ok(Json(state.admin.stats(key.as_deref())?))
}

/// `GET /api/v1/admin/config`
pub async fn config(
    State(state): State<AppState>,
    key: ClientKey,
) -> AppResult<Json<Config>> {
    let config = state.admin.config(key.as_deref())?;
    Ok(Json(Config::clone(&config)))
}

#[derive(Debug, Deserialize)]
pub struct DeleteClientQuery {
    #[serde(default)]
    delete_relics: bool,
}

/// `DELETE /api/v1/admin/clients/{id}`
pub async fn delete_client(
    State(state): State<AppState>,
    key: ClientKey,
    Path(client_id): Path<String>,
    Params(query): Params<DeleteClientQuery>,
) -> AppResult<Json<ClientDeletion>> {
    let outcome = state
        .admin
        .delete_client(key.as_deref(), &client_id, query.delete_relics)
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Serialize)]
pub struct ReportList {
    total: usize,
    reports: Vec<ReportView>,
}

/// `GET /api/v1/admin/reports`
pub async fn reports(
    State(state): State<AppState>,
    key: ClientKey,
) -> AppResult<Json<ReportList>> {
    let reports = state.admin.list_reports(key.as_deref())?;
    Ok(Json(ReportList {
        total: reports.len(),
        reports,
    }))
}

/// `DELETE /api/v1/admin/reports/{id}`
pub async fn dismiss_report(
    State(state): State<AppState>,
    key: ClientKey,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.admin.dismiss_report(key.as_deref(), &id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct BackupList {
    total: usize,
    total_size: u64,
    backups: Vec<BackupInfo>,
}

/// `GET /api/v1/admin/backups`
pub async fn backups(
    State(state): State<AppState>,
    key: ClientKey,
) -> AppResult<Json<BackupList>> {
    let backups = state.admin.list_backups(key.as_deref()).await?;
    Ok(Json(BackupList {
        total: backups.len(),
        total_size: backups.iter().map(|b| b.size_bytes).sum(),
        backups,
    }))
}

/// `POST /api/v1/admin/backups`
pub async fn create_backup(
    State(state): State<AppState>,
    key: ClientKey,
) -> AppResult<(StatusCode, Json<BackupInfo>)> {
    let backup = state.admin.create_backup(key.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(backup)))
}

/// `GET /api/v1/admin/backups/{filename}/download`
pub async fn download_backup(
    State(state): State<AppState>,
    key: ClientKey,
    Path(filename): Path<String>,
) -> AppResult<Response> {
    let data = state
        .admin
        .download_backup(key.as_deref(), &filename)
        .await?;
    // the name was validated by the backup service
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .unwrap_or(HeaderValue::from_static("attachment"));
    Ok((
        [
            (CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response())
}
