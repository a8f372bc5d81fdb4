// ABOUTME: REST route modules for Mongo Warden
// ABOUTME: Error-to-HTTP mapping plus the health and history endpoints

pub mod backups;
pub mod database;
pub mod servers;

use actix_web::web::{get, scope};
use actix_web::{web, HttpResponse, Responder, Scope};
use serde_json::json;

use crate::db::mongo::MongoError;
use crate::db::registry::RegistryError;
use crate::ops::backup::BackupError;
use crate::ops::probe;
use crate::ops::viewer::ViewerError;
use crate::AppState;

/// Map a registry failure to its HTTP status, with a `{success, error}` body
pub(crate) fn registry_response(e: RegistryError) -> HttpResponse {
    let body = json!({ "success": false, "error": e.to_string() });
    match e {
        RegistryError::Validation(_)
        | RegistryError::Duplicate(_)
        | RegistryError::PrimaryDeletion(_) => HttpResponse::BadRequest().json(body),
        RegistryError::NotFound(_) => HttpResponse::NotFound().json(body),
        _ => HttpResponse::InternalServerError().json(body),
    }
}

pub(crate) fn backup_response(e: BackupError) -> HttpResponse {
    let body = json!({ "success": false, "error": e.to_string() });
    match e {
        BackupError::NotFound(_) => HttpResponse::NotFound().json(body),
        BackupError::CorruptArchive(_) => HttpResponse::UnprocessableEntity().json(body),
        BackupError::InvalidName(_) | BackupError::NoPrimary => {
            HttpResponse::BadRequest().json(body)
        }
        BackupError::Registry(inner) => registry_response(inner),
        _ => HttpResponse::InternalServerError().json(body),
    }
}

pub(crate) fn viewer_response(e: ViewerError) -> HttpResponse {
    let body = json!({ "success": false, "error": e.to_string() });
    match e {
        ViewerError::NoPrimary => HttpResponse::BadRequest().json(body),
        ViewerError::Mongo(MongoError::CollectionNotFound(_)) => {
            HttpResponse::NotFound().json(body)
        }
        ViewerError::Registry(inner) => registry_response(inner),
        ViewerError::Mongo(_) => HttpResponse::InternalServerError().json(body),
    }
}

/// Service version plus primary-server connectivity
async fn health(state: web::Data<AppState>) -> impl Responder {
    let primary = state.registry.get_current_primary().ok().flatten();
    let (connected, server_version) = match &primary {
        Some(def) => {
            let test = probe::test_connection(def, state.config.probe_timeout()).await;
            (test.reachable, test.server_version)
        }
        None => (false, None),
    };

    HttpResponse::Ok().json(json!({
        "success": true,
        "version": env!("CARGO_PKG_VERSION"),
        "connected": connected,
        "primaryServer": primary.map(|p| p.id),
        "mongoVersion": server_version,
    }))
}

#[derive(serde::Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    limit: Option<u32>,
}

async fn history(
    state: web::Data<AppState>,
    query: web::Query<HistoryQuery>,
) -> impl Responder {
    match state.registry.get_history(query.limit) {
        Ok(entries) => {
            HttpResponse::Ok().json(json!({ "success": true, "history": entries }))
        }
        Err(e) => registry_response(e),
    }
}

pub fn configure_routes() -> Scope {
    scope("/api")
        .route("/health", get().to(health))
        .route("/history", get().to(history))
        .service(servers::configure_routes())
        .service(database::configure_routes())
        .service(backups::configure_routes())
}
