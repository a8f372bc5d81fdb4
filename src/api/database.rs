// ABOUTME: REST endpoints for the active database
// ABOUTME: Overview, document viewer, collection export/drop, sync, and backup listing

use actix_web::web::{delete, get, post, scope};
use actix_web::{web, HttpResponse, Responder, Scope};
use serde::Deserialize;
use serde_json::json;

use crate::api::{backup_response, registry_response, viewer_response};
use crate::models::SyncSchedule;
use crate::ops::{sync, viewer};
use crate::AppState;

/// Collection stats of the current primary
async fn overview(state: web::Data<AppState>) -> impl Responder {
    let overview = viewer::overview(&state.registry, state.config.probe_timeout()).await;
    HttpResponse::Ok().json(overview)
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default)]
    page: Option<u64>,
    #[serde(default)]
    limit: Option<u64>,
}

/// Paginated raw documents from one collection
async fn list_documents(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> impl Responder {
    let name = path.into_inner();
    match viewer::list_documents(
        &state.registry,
        &name,
        query.page.unwrap_or(1),
        query.limit.unwrap_or(25),
        state.config.probe_timeout(),
    )
    .await
    {
        Ok(page) => HttpResponse::Ok().json(page),
        Err(e) => viewer_response(e),
    }
}

/// Export one collection as a JSON array download
async fn export_collection(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let name = path.into_inner();
    match state.backups.export_collection(&state.registry, &name).await {
        Ok(docs) => HttpResponse::Ok()
            .content_type("application/json")
            .insert_header((
                "Content-Disposition",
                format!("attachment; filename=\"{}.json\"", name),
            ))
            .json(docs),
        Err(e) => backup_response(e),
    }
}

/// Drop a collection from the current primary
async fn drop_collection(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let name = path.into_inner();
    match state.backups.drop_collection(&state.registry, &name).await {
        Ok(()) => HttpResponse::Ok().json(json!({
            "success": true,
            "message": format!("Collection '{}' dropped", name),
        })),
        Err(e) => backup_response(e),
    }
}

#[derive(Deserialize)]
struct SyncRequest {
    #[serde(rename = "sourceId")]
    source_id: String,
    #[serde(rename = "targetIds")]
    target_ids: Vec<String>,
    #[serde(rename = "dropBeforeInsert", default)]
    drop_before_insert: bool,
}

/// Bulk-copy collections from a source server to one or more targets
async fn run_sync(state: web::Data<AppState>, body: web::Json<SyncRequest>) -> impl Responder {
    match sync::synchronize(
        &state.registry,
        &body.source_id,
        &body.target_ids,
        body.drop_before_insert,
        state.config.probe_timeout(),
        &state.cancel,
    )
    .await
    {
        Ok(report) => {
            let _ = state
                .registry
                .trim_history(state.config.max_history_entries);
            let message = if report.success {
                "Synchronization completed".to_string()
            } else {
                "Synchronization completed with errors".to_string()
            };
            HttpResponse::Ok().json(json!({
                "success": report.success,
                "message": message,
                "report": report,
            }))
        }
        Err(e) => registry_response(e),
    }
}

async fn get_schedule(state: web::Data<AppState>) -> impl Responder {
    match state.registry.get_sync_schedule() {
        Ok(schedule) => {
            HttpResponse::Ok().json(json!({ "success": true, "schedule": schedule }))
        }
        Err(e) => registry_response(e),
    }
}

async fn set_schedule(
    state: web::Data<AppState>,
    body: web::Json<SyncSchedule>,
) -> impl Responder {
    match state.registry.set_sync_schedule(&body) {
        Ok(()) => HttpResponse::Ok().json(json!({
            "success": true,
            "schedule": body.into_inner(),
        })),
        Err(e) => registry_response(e),
    }
}

async fn list_backups(state: web::Data<AppState>) -> impl Responder {
    match state.backups.list_backups() {
        Ok(backups) => {
            HttpResponse::Ok().json(json!({ "success": true, "backups": backups }))
        }
        Err(e) => backup_response(e),
    }
}

#[derive(Deserialize)]
struct RestoreRequest {
    #[serde(rename = "backupName")]
    backup_name: String,
}

/// Restore a named archive into the active database
async fn restore_backup(
    state: web::Data<AppState>,
    body: web::Json<RestoreRequest>,
) -> impl Responder {
    match state
        .backups
        .restore_backup(&state.registry, &body.backup_name, &state.cancel)
        .await
    {
        Ok(report) => {
            let message = if report.success {
                format!("Backup '{}' restored", body.backup_name)
            } else {
                format!("Backup '{}' restored with errors", body.backup_name)
            };
            HttpResponse::Ok().json(json!({
                "success": report.success,
                "message": message,
                "collections": report.collections,
            }))
        }
        Err(e) => backup_response(e),
    }
}

/// Download the raw archive file
async fn download_backup(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let name = path.into_inner();
    match state.backups.read_backup(&name) {
        Ok(bytes) => HttpResponse::Ok()
            .content_type("application/json")
            .insert_header((
                "Content-Disposition",
                format!("attachment; filename=\"{}.json\"", name),
            ))
            .body(bytes),
        Err(e) => backup_response(e),
    }
}

pub fn configure_routes() -> Scope {
    scope("/database")
        .route("/overview", get().to(overview))
        .route("/sync", post().to(run_sync))
        .route("/sync/schedule", get().to(get_schedule))
        .route("/sync/schedule", post().to(set_schedule))
        .route("/backup/list", get().to(list_backups))
        .route("/backup/restore", post().to(restore_backup))
        .route("/backup/download/{name}", get().to(download_backup))
        .route("/collections/{name}/documents", get().to(list_documents))
        .route("/collections/{name}", get().to(export_collection))
        .route("/collections/{name}", delete().to(drop_collection))
}
