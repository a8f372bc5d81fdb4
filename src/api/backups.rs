// ABOUTME: REST endpoints for backup creation, deletion, and foreign-archive import
// ABOUTME: Multipart upload analysis with a staged compare-before-overwrite flow

use actix_multipart::Multipart;
use actix_web::web::{delete, post, scope};
use actix_web::{web, HttpResponse, Responder, Scope};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

use crate::api::backup_response;
use crate::AppState;

/// Snapshot the current primary into a new archive
async fn create_backup(state: web::Data<AppState>) -> impl Responder {
    match state.backups.create_backup(&state.registry).await {
        Ok(backup) => {
            let _ = state
                .registry
                .trim_history(state.config.max_history_entries);
            HttpResponse::Ok().json(json!({ "success": true, "backup": backup }))
        }
        Err(e) => backup_response(e),
    }
}

async fn delete_backup(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let name = path.into_inner();
    match state.backups.delete_backup(&name) {
        Ok(()) => HttpResponse::Ok().json(json!({
            "success": true,
            "message": format!("Backup '{}' deleted", name),
        })),
        Err(e) => backup_response(e),
    }
}

/// Read the uploaded archive out of the multipart body
async fn read_upload(mut payload: Multipart) -> Result<Vec<u8>, String> {
    let mut bytes: Vec<u8> = Vec::new();

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| format!("invalid multipart payload: {}", e))?;

        // take the first "file" part; unnamed parts are accepted too
        let is_file = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .map(|n| n == "file")
            .unwrap_or(true);
        if !is_file {
            continue;
        }

        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| format!("upload read failed: {}", e))?;
            bytes.extend_from_slice(&chunk);
        }
        break;
    }

    if bytes.is_empty() {
        return Err("no archive file in upload".to_string());
    }
    Ok(bytes)
}

/// Stage an uploaded archive and return stats for comparison against the
/// current database, without committing anything
async fn analyze_upload(state: web::Data<AppState>, payload: Multipart) -> impl Responder {
    let bytes = match read_upload(payload).await {
        Ok(b) => b,
        Err(e) => {
            return HttpResponse::BadRequest().json(json!({ "success": false, "error": e }))
        }
    };

    match state.backups.analyze_foreign_archive(&bytes) {
        Ok(analysis) => HttpResponse::Ok().json(json!({
            "success": true,
            "backupId": analysis.backup_id,
            "totalSize": analysis.total_size,
            "collections": analysis.collections,
        })),
        Err(e) => backup_response(e),
    }
}

#[derive(Deserialize)]
struct RestoreUploadRequest {
    #[serde(rename = "backupId")]
    backup_id: String,
}

/// Commit a previously staged archive into the active database
async fn restore_upload(
    state: web::Data<AppState>,
    body: web::Json<RestoreUploadRequest>,
) -> impl Responder {
    match state
        .backups
        .import_staged_archive(&state.registry, &body.backup_id, &state.cancel)
        .await
    {
        Ok(report) => HttpResponse::Ok().json(json!({
            "success": report.success,
            "collections": report.collections,
        })),
        Err(e) => backup_response(e),
    }
}

pub fn configure_routes() -> Scope {
    scope("/system/backups")
        .route("", post().to(create_backup))
        .route("/analyze", post().to(analyze_upload))
        .route("/restore-upload", post().to(restore_upload))
        .route("/{name}", delete().to(delete_backup))
}
