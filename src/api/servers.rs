// ABOUTME: REST endpoints for the MongoDB server registry
// ABOUTME: CRUD, status sweep, connection test, switch, schema repair, and copy-data

use actix_web::web::{delete, get, post, put, scope};
use actix_web::{web, HttpResponse, Responder, Scope};
use serde::Deserialize;
use serde_json::json;

use crate::api::registry_response;
use crate::models::{NewServer, ServerPatch, ServerPublic};
use crate::ops::sync::CopyOptions;
use crate::ops::{probe, switch, sync};
use crate::AppState;

/// Registered servers plus the current-primary pointer
async fn list_servers(state: web::Data<AppState>) -> impl Responder {
    let current = match state.registry.current_primary_id() {
        Ok(id) => id,
        Err(e) => return registry_response(e),
    };
    match state.registry.list_servers() {
        Ok(servers) => {
            let servers: Vec<ServerPublic> = servers
                .iter()
                .map(|def| {
                    ServerPublic::from_definition(def, current.as_deref() == Some(def.id.as_str()))
                })
                .collect();
            HttpResponse::Ok().json(json!({
                "success": true,
                "servers": servers,
                "currentServer": current,
            }))
        }
        Err(e) => registry_response(e),
    }
}

async fn create_server(
    state: web::Data<AppState>,
    body: web::Json<NewServer>,
) -> impl Responder {
    match state.registry.create_server(&body) {
        Ok(def) => HttpResponse::Ok().json(json!({
            "success": true,
            "server": ServerPublic::from_definition(&def, false),
        })),
        Err(e) => registry_response(e),
    }
}

async fn update_server(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ServerPatch>,
) -> impl Responder {
    let id = path.into_inner();
    match state.registry.update_server(&id, &body) {
        Ok(def) => {
            let is_primary = state
                .registry
                .current_primary_id()
                .ok()
                .flatten()
                .as_deref()
                == Some(def.id.as_str());
            HttpResponse::Ok().json(json!({
                "success": true,
                "server": ServerPublic::from_definition(&def, is_primary),
            }))
        }
        Err(e) => registry_response(e),
    }
}

async fn delete_server(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    match state.registry.delete_server(&id) {
        Ok(()) => HttpResponse::Ok().json(json!({
            "success": true,
            "message": format!("Server '{}' deleted", id),
        })),
        Err(e) => registry_response(e),
    }
}

/// Probe every registered server concurrently
async fn server_status(state: web::Data<AppState>) -> impl Responder {
    match probe::status_sweep(&state.registry, state.config.probe_timeout()).await {
        Ok(status) => HttpResponse::Ok().json(json!({ "success": true, "status": status })),
        Err(e) => registry_response(e),
    }
}

/// Test connectivity to one registered server
async fn test_server(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    let def = match state.registry.get_server(&id) {
        Ok(Some(def)) => def,
        Ok(None) => {
            return registry_response(crate::db::registry::RegistryError::NotFound(id))
        }
        Err(e) => return registry_response(e),
    };

    let result = probe::test_connection(&def, state.config.probe_timeout()).await;
    let message = if result.reachable {
        format!("Connected to '{}' in {}ms", id, result.latency_ms)
    } else {
        format!("Could not reach '{}'", id)
    };
    HttpResponse::Ok().json(json!({
        "success": result.reachable,
        "serverInfo": result,
        "message": message,
    }))
}

#[derive(Deserialize)]
struct SwitchRequest {
    #[serde(rename = "autoCreate", default)]
    auto_create: bool,
}

/// Promote a server to primary
async fn switch_server(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SwitchRequest>,
) -> impl Responder {
    let id = path.into_inner();
    let outcome = switch::switch_primary(
        &state.registry,
        &state.switch_lock,
        &id,
        body.auto_create,
        state.config.probe_timeout(),
    )
    .await;

    let _ = state
        .registry
        .trim_history(state.config.max_history_entries);

    if outcome.success {
        HttpResponse::Ok().json(outcome)
    } else {
        HttpResponse::Conflict().json(outcome)
    }
}

/// Create whatever required collections the server is missing
async fn create_collections(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    let def = match state.registry.get_server(&id) {
        Ok(Some(def)) => def,
        Ok(None) => {
            return registry_response(crate::db::registry::RegistryError::NotFound(id))
        }
        Err(e) => return registry_response(e),
    };

    let timeout = state.config.probe_timeout();
    let summary = match probe::check_completeness(&def, timeout).await {
        Ok(s) => s,
        Err(e) => {
            return HttpResponse::BadGateway()
                .json(json!({ "success": false, "error": e.to_string() }))
        }
    };

    if summary.complete {
        return HttpResponse::Ok().json(json!({
            "success": true,
            "message": "Schema already complete",
            "created": Vec::<String>::new(),
            "failed": Vec::<String>::new(),
        }));
    }

    match probe::create_missing_collections(&def, &summary.missing, timeout).await {
        Ok(result) => {
            let message = format!(
                "Created {} of {} missing collections",
                result.created.len(),
                summary.missing.len()
            );
            HttpResponse::Ok().json(json!({
                "success": result.failed.is_empty(),
                "message": message,
                "created": result.created,
                "failed": result.failed,
            }))
        }
        Err(e) => HttpResponse::BadGateway()
            .json(json!({ "success": false, "error": e.to_string() })),
    }
}

#[derive(Deserialize)]
struct CopyDataRequest {
    #[serde(rename = "sourceServerId")]
    source_server_id: String,
    #[serde(rename = "targetServerId")]
    target_server_id: String,
    #[serde(default)]
    collections: Option<Vec<String>>,
    #[serde(rename = "includeIndexes", default)]
    include_indexes: bool,
    #[serde(rename = "overwriteExisting", default)]
    overwrite_existing: bool,
}

/// One-shot copy from one server to another, with optional index transfer
async fn copy_data(
    state: web::Data<AppState>,
    body: web::Json<CopyDataRequest>,
) -> impl Responder {
    let options = CopyOptions {
        collections: body.collections.clone(),
        drop_before_insert: body.overwrite_existing,
        include_indexes: body.include_indexes,
    };

    match sync::copy_data(
        &state.registry,
        &body.source_server_id,
        &body.target_server_id,
        &options,
        state.config.probe_timeout(),
        &state.cancel,
    )
    .await
    {
        Ok(result) => {
            let copied: u64 = result.collections.iter().map(|c| c.copied).sum();
            HttpResponse::Ok().json(json!({
                "success": result.success,
                "message": format!(
                    "Copied {} documents across {} collections",
                    copied,
                    result.collections.len()
                ),
                "details": result,
            }))
        }
        Err(e) => registry_response(e),
    }
}

pub fn configure_routes() -> Scope {
    scope("/mongo-servers")
        .route("", get().to(list_servers))
        .route("", post().to(create_server))
        .route("/status", get().to(server_status))
        .route("/copy-data", post().to(copy_data))
        .route("/{id}", put().to(update_server))
        .route("/{id}", delete().to(delete_server))
        .route("/{id}/test", post().to(test_server))
        .route("/{id}/switch", post().to(switch_server))
        .route("/{id}/create-collections", post().to(create_collections))
}
