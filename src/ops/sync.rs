// ABOUTME: Data synchronization engine
// ABOUTME: Bulk-copies collections between registered servers, on demand or on a schedule

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use log::{info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::mongo::MongoError;
use crate::db::registry::RegistryError;
use crate::db::{MongoServer, RegistryStore};
use crate::models::{
    CollectionCopyResult, HistoryEntry, ServerDefinition, SyncReport, TargetSyncResult,
};

/// Documents per insert_many batch while copying a collection
const COPY_BATCH_SIZE: usize = 500;

/// Simultaneous target servers during one sync run
const MAX_CONCURRENT_TARGETS: usize = 3;

/// Options for a single-target copy (the copy-data operation)
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// Restrict the copy to these collections; all source collections when None
    pub collections: Option<Vec<String>>,
    /// Clear each target collection before inserting
    pub drop_before_insert: bool,
    /// Best-effort copy of index definitions alongside the data
    pub include_indexes: bool,
}

/// Copy all collections from a source server to one or more targets.
///
/// Targets run with bounded concurrency; per-collection errors are recorded
/// on that collection's result and processing continues. The aggregate
/// success flag is true only when every collection on every target copied
/// cleanly. Cancelled runs leave partial copies in place.
pub async fn synchronize(
    registry: &RegistryStore,
    source_id: &str,
    target_ids: &[String],
    drop_before_insert: bool,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<SyncReport, RegistryError> {
    if target_ids.is_empty() {
        return Err(RegistryError::Validation(
            "at least one target server is required".into(),
        ));
    }
    if target_ids.iter().any(|t| t == source_id) {
        return Err(RegistryError::Validation(
            "a server cannot be a sync target of itself".into(),
        ));
    }

    let source = registry
        .get_server(source_id)?
        .ok_or_else(|| RegistryError::NotFound(source_id.to_string()))?;

    let started_at = Utc::now();
    let options = CopyOptions {
        collections: None,
        drop_before_insert,
        include_indexes: false,
    };

    let tasks = target_ids.iter().cloned().enumerate().map(|(index, target_id)| {
        let target = registry.get_server(&target_id);
        let source = source.clone();
        let options = options.clone();
        let cancel = cancel.clone();
        async move {
            let result = match target {
                Ok(Some(target_def)) => {
                    sync_one_target(&source, &target_def, &options, timeout, &cancel).await
                }
                Ok(None) => TargetSyncResult {
                    target_id: target_id.clone(),
                    success: false,
                    collections: Vec::new(),
                    error: Some(format!("Target server '{}' is not registered", target_id)),
                },
                Err(e) => TargetSyncResult {
                    target_id: target_id.clone(),
                    success: false,
                    collections: Vec::new(),
                    error: Some(format!("Registry lookup for '{}' failed: {}", target_id, e)),
                },
            };
            (index, result)
        }
    });

    let mut indexed: Vec<(usize, TargetSyncResult)> = stream::iter(tasks)
        .buffer_unordered(MAX_CONCURRENT_TARGETS)
        .collect()
        .await;
    indexed.sort_by_key(|(index, _)| *index);
    let targets: Vec<TargetSyncResult> = indexed.into_iter().map(|(_, r)| r).collect();

    let report = SyncReport {
        source_id: source_id.to_string(),
        success: aggregate_success(&targets),
        targets,
        started_at,
        finished_at: Utc::now(),
    };

    let _ = registry.add_history(&HistoryEntry {
        id: Uuid::new_v4().to_string(),
        operation_type: "synchronize".to_string(),
        timestamp: report.finished_at,
        details: Some(serde_json::json!({
            "sourceId": source_id,
            "targetIds": target_ids,
            "dropBeforeInsert": drop_before_insert,
        })),
        results: serde_json::to_value(&report).ok(),
    });

    Ok(report)
}

/// Copy data from one source to one target with a collection filter and
/// optional index transfer
pub async fn copy_data(
    registry: &RegistryStore,
    source_id: &str,
    target_id: &str,
    options: &CopyOptions,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<TargetSyncResult, RegistryError> {
    if source_id == target_id {
        return Err(RegistryError::Validation(
            "source and target must be different servers".into(),
        ));
    }
    let source = registry
        .get_server(source_id)?
        .ok_or_else(|| RegistryError::NotFound(source_id.to_string()))?;
    let target = registry
        .get_server(target_id)?
        .ok_or_else(|| RegistryError::NotFound(target_id.to_string()))?;

    let result = sync_one_target(&source, &target, options, timeout, cancel).await;

    let _ = registry.add_history(&HistoryEntry {
        id: Uuid::new_v4().to_string(),
        operation_type: "copy_data".to_string(),
        timestamp: Utc::now(),
        details: Some(serde_json::json!({
            "sourceId": source_id,
            "targetId": target_id,
            "includeIndexes": options.include_indexes,
            "overwriteExisting": options.drop_before_insert,
        })),
        results: serde_json::to_value(&result).ok(),
    });

    Ok(result)
}

/// Copy the source's collections onto a single target, sequentially per
/// collection so one target is never overwhelmed
async fn sync_one_target(
    source_def: &ServerDefinition,
    target_def: &ServerDefinition,
    options: &CopyOptions,
    timeout: Duration,
    cancel: &CancellationToken,
) -> TargetSyncResult {
    let source = match MongoServer::connect(source_def, timeout).await {
        Ok(s) => s,
        Err(e) => return target_failure(target_def, format!("Source connection failed: {}", e)),
    };
    let target = match MongoServer::connect(target_def, timeout).await {
        Ok(t) => t,
        Err(e) => return target_failure(target_def, format!("Target connection failed: {}", e)),
    };

    // Source-enumeration order; no cross-collection consistency guarantee
    let names = match source.collection_names().await {
        Ok(names) => names,
        Err(e) => {
            return target_failure(
                target_def,
                format!("Failed to enumerate source collections: {}", e),
            )
        }
    };
    let names: Vec<String> = match &options.collections {
        Some(filter) => names.into_iter().filter(|n| filter.contains(n)).collect(),
        None => names,
    };

    let mut collections = Vec::with_capacity(names.len());
    let mut cancelled = false;

    for name in &names {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        let (copied, error) = copy_collection(&source, &target, name, options.drop_before_insert).await;
        match error {
            None => {
                if options.include_indexes {
                    copy_indexes(&source, &target, name).await;
                }
                collections.push(CollectionCopyResult {
                    collection: name.clone(),
                    copied,
                    error: None,
                });
            }
            Some(e) => {
                warn!(
                    "copy of '{}' from '{}' to '{}' failed after {} documents: {}",
                    name, source_def.id, target_def.id, copied, e
                );
                collections.push(CollectionCopyResult {
                    collection: name.clone(),
                    copied,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let clean = collections.iter().all(|c| c.error.is_none());
    TargetSyncResult {
        target_id: target_def.id.clone(),
        success: clean && !cancelled,
        collections,
        error: cancelled.then(|| "sync cancelled before completion".to_string()),
    }
}

/// Stream one collection's documents across in batches. On failure the
/// documents already inserted are reported alongside the error so the
/// result reflects actual partial progress.
async fn copy_collection(
    source: &MongoServer,
    target: &MongoServer,
    name: &str,
    drop_before_insert: bool,
) -> (u64, Option<MongoError>) {
    let mut copied = 0u64;

    if drop_before_insert {
        // clearing keeps the collection and its indexes in place
        if let Err(e) = target.clear_collection(name).await {
            return (copied, Some(e));
        }
    }

    let mut cursor = match source.all_documents(name).await {
        Ok(c) => c,
        Err(e) => return (copied, Some(e)),
    };
    let mut batch = Vec::with_capacity(COPY_BATCH_SIZE);

    loop {
        match cursor.try_next().await {
            Ok(Some(document)) => {
                batch.push(document);
                if batch.len() >= COPY_BATCH_SIZE {
                    match target.insert_many(name, std::mem::take(&mut batch)).await {
                        Ok(n) => copied += n,
                        Err(e) => return (copied, Some(e)),
                    }
                }
            }
            Ok(None) => break,
            Err(e) => return (copied, Some(e.into())),
        }
    }

    match target.insert_many(name, batch).await {
        Ok(n) => copied += n,
        Err(e) => return (copied, Some(e)),
    }

    (copied, None)
}

/// Best-effort transfer of index definitions; failures are logged, never fatal
async fn copy_indexes(source: &MongoServer, target: &MongoServer, name: &str) {
    let mut cursor = match source.list_indexes(name).await {
        Ok(c) => c,
        Err(e) => {
            warn!("listing indexes of '{}' failed: {}", name, e);
            return;
        }
    };

    loop {
        match cursor.try_next().await {
            Ok(Some(index)) => {
                let index_name = index
                    .options
                    .as_ref()
                    .and_then(|o| o.name.clone())
                    .unwrap_or_default();
                if index_name == "_id_" {
                    continue;
                }
                if let Err(e) = target.create_index(name, index).await {
                    warn!("creating index '{}' on '{}' failed: {}", index_name, name, e);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("reading indexes of '{}' failed: {}", name, e);
                break;
            }
        }
    }
}

fn target_failure(target_def: &ServerDefinition, error: String) -> TargetSyncResult {
    TargetSyncResult {
        target_id: target_def.id.clone(),
        success: false,
        collections: Vec::new(),
        error: Some(error),
    }
}

/// The aggregate flag is true only when every target copied cleanly
pub fn aggregate_success(targets: &[TargetSyncResult]) -> bool {
    !targets.is_empty() && targets.iter().all(|t| t.success)
}

/// Thin interval driver for the persisted schedule. Re-reads the record on
/// every tick so edits take effect without a restart; the engine itself
/// stays a plain callable unit.
pub fn spawn_schedule_driver(
    registry: Arc<RegistryStore>,
    config: AppConfig,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_run: Option<chrono::DateTime<Utc>> = None;
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let schedule = match registry.get_sync_schedule() {
                Ok(s) => s,
                Err(e) => {
                    warn!("could not read sync schedule: {}", e);
                    continue;
                }
            };
            if !schedule.enabled || schedule.target_ids.is_empty() {
                continue;
            }

            let now = Utc::now();
            if let Some(start_at) = schedule.start_at {
                if now < start_at {
                    continue;
                }
            }
            let due = match last_run {
                Some(prev) => {
                    now - prev >= chrono::Duration::minutes(i64::from(schedule.interval_minutes))
                }
                None => true,
            };
            if !due {
                continue;
            }

            info!(
                "scheduled sync: '{}' -> {:?}",
                schedule.source_id, schedule.target_ids
            );
            last_run = Some(now);
            match synchronize(
                &registry,
                &schedule.source_id,
                &schedule.target_ids,
                schedule.drop_before_insert,
                config.probe_timeout(),
                &cancel,
            )
            .await
            {
                Ok(report) if report.success => info!("scheduled sync completed"),
                Ok(_) => warn!("scheduled sync completed with errors"),
                Err(e) => warn!("scheduled sync failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewServer;

    fn target_result(id: &str, success: bool, errors: &[Option<&str>]) -> TargetSyncResult {
        TargetSyncResult {
            target_id: id.to_string(),
            success,
            collections: errors
                .iter()
                .enumerate()
                .map(|(i, e)| CollectionCopyResult {
                    collection: format!("c{}", i),
                    copied: if e.is_none() { 3 } else { 0 },
                    error: e.map(str::to_string),
                })
                .collect(),
            error: None,
        }
    }

    #[test]
    fn aggregate_requires_every_target_clean() {
        assert!(aggregate_success(&[
            target_result("a", true, &[None, None]),
            target_result("b", true, &[None]),
        ]));
        assert!(!aggregate_success(&[
            target_result("a", true, &[None]),
            target_result("b", false, &[Some("insert failed")]),
        ]));
        assert!(!aggregate_success(&[]));
    }

    #[tokio::test]
    async fn empty_target_list_is_rejected() {
        let registry = RegistryStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        let err = synchronize(
            &registry,
            "alpha",
            &[],
            true,
            Duration::from_secs(1),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
    }

    #[tokio::test]
    async fn source_as_its_own_target_is_rejected() {
        let registry = RegistryStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        let err = synchronize(
            &registry,
            "alpha",
            &["alpha".to_string()],
            false,
            Duration::from_secs(1),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
    }

    #[test]
    fn partial_progress_survives_on_a_failed_collection() {
        let result = TargetSyncResult {
            target_id: "beta".to_string(),
            success: false,
            collections: vec![CollectionCopyResult {
                collection: "tickets".to_string(),
                copied: 500,
                error: Some("connection reset during insert".to_string()),
            }],
            error: None,
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["collections"][0]["copied"], 500);
        assert!(json["collections"][0]["error"]
            .as_str()
            .unwrap()
            .contains("reset"));
        assert!(!aggregate_success(&[result]));
    }

    #[tokio::test]
    async fn registry_failure_on_a_target_is_reported_as_such() {
        let registry = RegistryStore::open_in_memory().unwrap();
        registry
            .create_server(&NewServer {
                id: "alpha".to_string(),
                name: None,
                host: Some("localhost".to_string()),
                port: Some(27017),
                database: Some("admin_app".to_string()),
                username: None,
                password: None,
                description: None,
                active: None,
            })
            .unwrap();
        // a malformed row makes the target lookup itself fail
        registry
            .execute_batch(
                "INSERT INTO servers (id, name, host, port, db_name, active, created_at, updated_at)
                 VALUES ('beta', 'Beta', 'localhost', 'not-a-port', 'admin_app', 1,
                         '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            )
            .unwrap();

        let cancel = CancellationToken::new();
        let report = synchronize(
            &registry,
            "alpha",
            &["beta".to_string()],
            false,
            Duration::from_millis(50),
            &cancel,
        )
        .await
        .unwrap();

        assert!(!report.success);
        let error = report.targets[0].error.as_deref().unwrap();
        assert!(error.contains("Registry lookup"));
        assert!(!error.contains("not registered"));
    }

    #[tokio::test]
    async fn unknown_source_is_not_found() {
        let registry = RegistryStore::open_in_memory().unwrap();
        registry
            .create_server(&NewServer {
                id: "beta".to_string(),
                name: None,
                host: Some("localhost".to_string()),
                port: Some(27017),
                database: Some("admin_app".to_string()),
                username: None,
                password: None,
                description: None,
                active: None,
            })
            .unwrap();
        let cancel = CancellationToken::new();
        let err = synchronize(
            &registry,
            "ghost",
            &["beta".to_string()],
            false,
            Duration::from_secs(1),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }
}
