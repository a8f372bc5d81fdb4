// ABOUTME: Connection probing and schema completeness checking
// ABOUTME: Short-lived reachability tests, multi-server status sweeps, required-collection repair

use std::time::{Duration, Instant};

use futures::future::join_all;
use log::warn;
use mongodb::error::ErrorKind;

use crate::db::registry::RegistryError;
use crate::db::{MongoServer, RegistryStore};
use crate::models::{
    CollectionFailure, CollectionsSummary, ConnectionStatus, CreateCollectionsResult,
    ServerDefinition, ServerStatus, TestResult,
};

/// Baseline collections the application requires on every server.
/// Bump the manifest version whenever this list changes.
pub const REQUIRED_COLLECTIONS: &[&str] = &[
    "clients",
    "tickets",
    "budgets",
    "contracts",
    "payments",
    "notifications",
    "users",
    "settings",
];

pub const SCHEMA_MANIFEST_VERSION: u32 = 1;

enum ProbeOutcome {
    Online {
        latency_ms: u64,
        version: Option<String>,
    },
    Offline {
        latency_ms: u64,
        error: String,
    },
    Error {
        latency_ms: u64,
        error: String,
    },
}

/// Reach the server, ping it, and read its version, all within one bounded timeout
async fn probe(def: &ServerDefinition, timeout: Duration) -> ProbeOutcome {
    let started = Instant::now();
    let attempt = tokio::time::timeout(timeout, async {
        let server = MongoServer::connect(def, timeout).await?;
        server.ping().await?;
        let version = server.server_version().await.ok();
        Ok::<_, crate::db::mongo::MongoError>(version)
    })
    .await;

    let latency_ms = started.elapsed().as_millis() as u64;
    match attempt {
        Ok(Ok(version)) => ProbeOutcome::Online {
            latency_ms,
            version,
        },
        Ok(Err(e)) => {
            let offline = matches!(
                &e,
                crate::db::mongo::MongoError::Driver(err)
                    if matches!(*err.kind, ErrorKind::ServerSelection { .. })
            );
            let error = e.to_string();
            if offline {
                ProbeOutcome::Offline { latency_ms, error }
            } else {
                ProbeOutcome::Error { latency_ms, error }
            }
        }
        Err(_) => ProbeOutcome::Offline {
            latency_ms,
            error: format!("connection timed out after {}s", timeout.as_secs()),
        },
    }
}

/// Test connectivity to one server; failures come back as status, never as errors
pub async fn test_connection(def: &ServerDefinition, timeout: Duration) -> TestResult {
    match probe(def, timeout).await {
        ProbeOutcome::Online {
            latency_ms,
            version,
        } => TestResult {
            reachable: true,
            latency_ms,
            server_version: version,
            error_message: None,
        },
        ProbeOutcome::Offline { latency_ms, error }
        | ProbeOutcome::Error { latency_ms, error } => TestResult {
            reachable: false,
            latency_ms,
            server_version: None,
            error_message: Some(error),
        },
    }
}

/// Compute the completeness summary for a server's collection names.
/// `existing` is restricted to the manifest; repeated calls with the same
/// input always produce the same sets.
pub fn completeness(collection_names: &[String]) -> CollectionsSummary {
    let required: Vec<String> = REQUIRED_COLLECTIONS.iter().map(|c| c.to_string()).collect();
    let existing: Vec<String> = required
        .iter()
        .filter(|r| collection_names.iter().any(|c| c == *r))
        .cloned()
        .collect();
    let missing: Vec<String> = required
        .iter()
        .filter(|r| !collection_names.iter().any(|c| c == *r))
        .cloned()
        .collect();
    let complete = missing.is_empty();
    let total = required.len();

    CollectionsSummary {
        existing,
        missing,
        required,
        total,
        complete,
    }
}

/// Check a server's collections against the required manifest
pub async fn check_completeness(
    def: &ServerDefinition,
    timeout: Duration,
) -> Result<CollectionsSummary, crate::db::mongo::MongoError> {
    let server = MongoServer::connect(def, timeout).await?;
    let names = server.collection_names().await?;
    Ok(completeness(&names))
}

/// Create each missing collection independently; one failure never blocks the rest
pub async fn create_missing_collections(
    def: &ServerDefinition,
    names: &[String],
    timeout: Duration,
) -> Result<CreateCollectionsResult, crate::db::mongo::MongoError> {
    let server = MongoServer::connect(def, timeout).await?;

    let mut created = Vec::new();
    let mut failed = Vec::new();
    for name in names {
        match server.create_collection(name).await {
            Ok(()) => created.push(name.clone()),
            Err(e) => {
                warn!("failed to create collection '{}' on '{}': {}", name, def.id, e);
                failed.push(CollectionFailure {
                    name: name.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(CreateCollectionsResult { created, failed })
}

/// Full status of one server: reachability plus schema completeness
pub async fn server_status(
    def: &ServerDefinition,
    is_primary: bool,
    timeout: Duration,
) -> ServerStatus {
    match probe(def, timeout).await {
        ProbeOutcome::Online { latency_ms, .. } => {
            // A second short-lived connection for the collection sweep
            let summary = match check_completeness(def, timeout).await {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("collection sweep failed for '{}': {}", def.id, e);
                    None
                }
            };
            ServerStatus {
                id: def.id.clone(),
                name: def.name.clone(),
                connection_status: ConnectionStatus::Online,
                is_primary,
                latency_ms: Some(latency_ms),
                collections: summary,
                error: None,
            }
        }
        ProbeOutcome::Offline { latency_ms, error } => ServerStatus {
            id: def.id.clone(),
            name: def.name.clone(),
            connection_status: ConnectionStatus::Offline,
            is_primary,
            latency_ms: Some(latency_ms),
            collections: None,
            error: Some(error),
        },
        ProbeOutcome::Error { latency_ms, error } => ServerStatus {
            id: def.id.clone(),
            name: def.name.clone(),
            connection_status: ConnectionStatus::Error,
            is_primary,
            latency_ms: Some(latency_ms),
            collections: None,
            error: Some(error),
        },
    }
}

/// Probe every registered server concurrently; one unreachable server
/// never stalls or fails the sweep
pub async fn status_sweep(
    registry: &RegistryStore,
    timeout: Duration,
) -> Result<Vec<ServerStatus>, RegistryError> {
    let servers = registry.list_servers()?;
    let primary_id = registry.current_primary_id()?;

    let probes = servers.iter().map(|def| {
        let is_primary = primary_id.as_deref() == Some(def.id.as_str());
        server_status(def, is_primary, timeout)
    });

    Ok(join_all(probes).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_server_is_missing_everything() {
        let summary = completeness(&[]);
        assert!(summary.existing.is_empty());
        assert_eq!(summary.missing.len(), REQUIRED_COLLECTIONS.len());
        assert_eq!(summary.total, REQUIRED_COLLECTIONS.len());
        assert!(!summary.complete);
    }

    #[test]
    fn full_manifest_is_complete() {
        let summary = completeness(&names(REQUIRED_COLLECTIONS));
        assert!(summary.missing.is_empty());
        assert!(summary.complete);
        assert_eq!(summary.existing, summary.required);
    }

    #[test]
    fn extra_collections_are_ignored() {
        let mut all = names(REQUIRED_COLLECTIONS);
        all.push("scratch_data".to_string());
        let summary = completeness(&all);
        assert!(summary.complete);
        assert!(!summary.existing.contains(&"scratch_data".to_string()));
    }

    #[test]
    fn partial_manifest_reports_missing() {
        let summary = completeness(&names(&["clients", "users", "settings"]));
        assert_eq!(summary.existing, names(&["clients", "users", "settings"]));
        assert!(summary.missing.contains(&"tickets".to_string()));
        assert_eq!(
            summary.existing.len() + summary.missing.len(),
            summary.required.len()
        );
    }

    #[test]
    fn completeness_is_idempotent() {
        let input = names(&["tickets", "budgets", "clients"]);
        let first = completeness(&input);
        let second = completeness(&input);
        assert_eq!(first, second);
    }
}
