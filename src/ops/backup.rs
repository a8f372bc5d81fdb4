// ABOUTME: Backup and restore manager
// ABOUTME: JSON archives of the active database, plus staged import of uploaded archives

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use log::{info, warn};
use mongodb::bson::Document;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::mongo::MongoError;
use crate::db::registry::RegistryError;
use crate::db::{MongoServer, RegistryStore};
use crate::models::{ArchiveAnalysis, BackupInfo, CollectionCopyResult, CollectionInfo, HistoryEntry};

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Backup not found: {0}")]
    NotFound(String),
    #[error("Archive cannot be parsed: {0}")]
    CorruptArchive(String),
    #[error("Invalid backup name: {0}")]
    InvalidName(String),
    #[error("No primary server is configured")]
    NoPrimary,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("MongoDB error: {0}")]
    Mongo(#[from] MongoError),
}

/// On-disk archive layout: the whole database as one JSON document
#[derive(Debug, Serialize, Deserialize)]
struct Archive {
    name: String,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
    database: String,
    collections: BTreeMap<String, Vec<Document>>,
}

/// Result of restoring an archive into the active database
#[derive(Debug, Serialize)]
pub struct RestoreReport {
    pub backup: String,
    pub success: bool,
    pub collections: Vec<CollectionCopyResult>,
}

pub struct BackupManager {
    backups_dir: PathBuf,
    timeout: Duration,
}

impl BackupManager {
    pub fn new(backups_dir: PathBuf, timeout: Duration) -> Result<Self, BackupError> {
        fs::create_dir_all(&backups_dir)?;
        Ok(Self {
            backups_dir,
            timeout,
        })
    }

    fn staging_dir(&self) -> PathBuf {
        self.backups_dir.join("staging")
    }

    /// Resolve an archive name to its file path, rejecting traversal attempts
    pub fn archive_path(&self, name: &str) -> Result<PathBuf, BackupError> {
        validate_archive_name(name)?;
        Ok(self.backups_dir.join(format!("{}.json", name)))
    }

    /// Snapshot every collection of the current primary into a new archive
    pub async fn create_backup(
        &self,
        registry: &RegistryStore,
    ) -> Result<BackupInfo, BackupError> {
        let primary = registry.get_current_primary()?.ok_or(BackupError::NoPrimary)?;
        let server = MongoServer::connect(&primary, self.timeout).await?;

        let created_at = Utc::now();
        let mut collections = BTreeMap::new();
        for name in server.collection_names().await? {
            let mut cursor = server.all_documents(&name).await?;
            let mut docs = Vec::new();
            while let Some(doc) = cursor.try_next().await.map_err(MongoError::from)? {
                docs.push(doc);
            }
            collections.insert(name, docs);
        }

        let name = self.unique_archive_name(created_at);
        let archive = Archive {
            name: name.clone(),
            created_at,
            database: primary.database.clone(),
            collections,
        };

        let path = self.archive_path(&name)?;
        let file = fs::File::create(&path)?;
        serde_json::to_writer(BufWriter::new(file), &archive)?;
        let size = fs::metadata(&path)?.len();

        info!("created backup '{}' ({} bytes)", name, size);
        let _ = registry.add_history(&HistoryEntry {
            id: Uuid::new_v4().to_string(),
            operation_type: "create_backup".to_string(),
            timestamp: created_at,
            details: Some(serde_json::json!({
                "name": name,
                "server": primary.id,
                "size": size,
            })),
            results: None,
        });

        Ok(BackupInfo {
            name,
            created_at,
            size,
        })
    }

    /// Timestamp-derived name; a numeric suffix resolves same-second collisions
    fn unique_archive_name(&self, created_at: DateTime<Utc>) -> String {
        let base = format!("backup_{}", created_at.format("%Y%m%d_%H%M%S"));
        let mut name = base.clone();
        let mut attempt = 1;
        while self.backups_dir.join(format!("{}.json", name)).exists() {
            attempt += 1;
            name = format!("{}_{}", base, attempt);
        }
        name
    }

    /// Archives on disk, newest first
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>, BackupError> {
        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.backups_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") || !path.is_file() {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let metadata = entry.metadata()?;
            let created_at = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            backups.push(BackupInfo {
                name: name.to_string(),
                created_at,
                size: metadata.len(),
            });
        }
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    pub fn delete_backup(&self, name: &str) -> Result<(), BackupError> {
        let path = self.archive_path(name)?;
        if !path.exists() {
            return Err(BackupError::NotFound(name.to_string()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    /// Raw archive bytes, for the download endpoint
    pub fn read_backup(&self, name: &str) -> Result<Vec<u8>, BackupError> {
        let path = self.archive_path(name)?;
        if !path.exists() {
            return Err(BackupError::NotFound(name.to_string()));
        }
        Ok(fs::read(path)?)
    }

    /// Restore a named archive into the active database
    pub async fn restore_backup(
        &self,
        registry: &RegistryStore,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<RestoreReport, BackupError> {
        let path = self.archive_path(name)?;
        if !path.exists() {
            return Err(BackupError::NotFound(name.to_string()));
        }
        let archive = parse_archive_file(&path)?;
        self.restore_archive(registry, archive, cancel).await
    }

    /// Parse an uploaded archive and stage it for a later import, returning
    /// stats comparable against the current database
    pub fn analyze_foreign_archive(&self, bytes: &[u8]) -> Result<ArchiveAnalysis, BackupError> {
        let archive: Archive = serde_json::from_slice(bytes)
            .map_err(|e| BackupError::CorruptArchive(e.to_string()))?;

        let collections = archive_stats(&archive);
        let backup_id = Uuid::new_v4().to_string();

        let staging = self.staging_dir();
        fs::create_dir_all(&staging)?;
        fs::write(staging.join(format!("{}.json", backup_id)), bytes)?;

        Ok(ArchiveAnalysis {
            backup_id,
            total_size: bytes.len() as u64,
            collections,
        })
    }

    /// Commit a previously staged archive, then discard the staged file
    pub async fn import_staged_archive(
        &self,
        registry: &RegistryStore,
        backup_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RestoreReport, BackupError> {
        validate_archive_name(backup_id)?;
        let path = self.staging_dir().join(format!("{}.json", backup_id));
        if !path.exists() {
            return Err(BackupError::NotFound(backup_id.to_string()));
        }
        let archive = parse_archive_file(&path)?;
        let report = self.restore_archive(registry, archive, cancel).await?;

        if let Err(e) = fs::remove_file(&path) {
            warn!("could not remove staged archive '{}': {}", backup_id, e);
        }
        Ok(report)
    }

    /// Replace the content of each archived collection on the current primary.
    /// Per-collection failures are collected; partial restores are left as-is.
    async fn restore_archive(
        &self,
        registry: &RegistryStore,
        archive: Archive,
        cancel: &CancellationToken,
    ) -> Result<RestoreReport, BackupError> {
        let primary = registry.get_current_primary()?.ok_or(BackupError::NoPrimary)?;
        let server = MongoServer::connect(&primary, self.timeout).await?;

        let mut results = Vec::with_capacity(archive.collections.len());
        for (name, docs) in archive.collections {
            if cancel.is_cancelled() {
                break;
            }
            let outcome = async {
                server.clear_collection(&name).await?;
                server.insert_many(&name, docs).await
            }
            .await;

            match outcome {
                Ok(restored) => results.push(CollectionCopyResult {
                    collection: name,
                    copied: restored,
                    error: None,
                }),
                Err(e) => {
                    warn!("restore of collection '{}' failed: {}", name, e);
                    results.push(CollectionCopyResult {
                        collection: name,
                        copied: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let success = results.iter().all(|r| r.error.is_none());
        let report = RestoreReport {
            backup: archive.name,
            success,
            collections: results,
        };

        let _ = registry.add_history(&HistoryEntry {
            id: Uuid::new_v4().to_string(),
            operation_type: "restore_backup".to_string(),
            timestamp: Utc::now(),
            details: Some(serde_json::json!({
                "backup": report.backup,
                "server": primary.id,
            })),
            results: serde_json::to_value(&report.collections).ok(),
        });

        Ok(report)
    }

    /// Every document of one collection on the current primary
    pub async fn export_collection(
        &self,
        registry: &RegistryStore,
        name: &str,
    ) -> Result<Vec<Document>, BackupError> {
        let primary = registry.get_current_primary()?.ok_or(BackupError::NoPrimary)?;
        let server = MongoServer::connect(&primary, self.timeout).await?;

        if !server.collection_exists(name).await? {
            return Err(BackupError::NotFound(name.to_string()));
        }

        let mut cursor = server.all_documents(name).await?;
        let mut docs = Vec::new();
        while let Some(doc) = cursor.try_next().await.map_err(MongoError::from)? {
            docs.push(doc);
        }
        Ok(docs)
    }

    /// Drop a collection and its documents from the current primary
    pub async fn drop_collection(
        &self,
        registry: &RegistryStore,
        name: &str,
    ) -> Result<(), BackupError> {
        let primary = registry.get_current_primary()?.ok_or(BackupError::NoPrimary)?;
        let server = MongoServer::connect(&primary, self.timeout).await?;

        if !server.collection_exists(name).await? {
            return Err(BackupError::NotFound(name.to_string()));
        }
        server.drop_collection(name).await?;
        Ok(())
    }
}

fn parse_archive_file(path: &Path) -> Result<Archive, BackupError> {
    let file = fs::File::open(path)?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| BackupError::CorruptArchive(e.to_string()))
}

/// Per-collection counts and serialized sizes of an archive
fn archive_stats(archive: &Archive) -> Vec<CollectionInfo> {
    archive
        .collections
        .iter()
        .map(|(name, docs)| CollectionInfo {
            name: name.clone(),
            count: docs.len() as u64,
            size: serde_json::to_vec(docs).map(|v| v.len() as u64).unwrap_or(0),
        })
        .collect()
}

/// Archive names come from user input; keep them to a single flat file name
fn validate_archive_name(name: &str) -> Result<(), BackupError> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(BackupError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    fn manager() -> (tempfile::TempDir, BackupManager) {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = BackupManager::new(tmp.path().join("backups"), Duration::from_secs(1)).unwrap();
        (tmp, mgr)
    }

    fn sample_archive() -> Archive {
        let mut collections = BTreeMap::new();
        collections.insert(
            "clients".to_string(),
            vec![doc! {"name": "Acme"}, doc! {"name": "Globex"}],
        );
        collections.insert("tickets".to_string(), vec![]);
        Archive {
            name: "backup_20260829_120000".to_string(),
            created_at: Utc::now(),
            database: "admin_app".to_string(),
            collections,
        }
    }

    #[test]
    fn archive_names_reject_traversal() {
        assert!(validate_archive_name("backup_20260829_120000").is_ok());
        assert!(validate_archive_name("../etc/passwd").is_err());
        assert!(validate_archive_name("a/b").is_err());
        assert!(validate_archive_name("a\\b").is_err());
        assert!(validate_archive_name("").is_err());
    }

    #[test]
    fn list_and_delete_backups() {
        let (_tmp, mgr) = manager();
        let archive = sample_archive();
        let path = mgr.archive_path(&archive.name).unwrap();
        fs::write(&path, serde_json::to_vec(&archive).unwrap()).unwrap();

        let backups = mgr.list_backups().unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].name, archive.name);
        assert!(backups[0].size > 0);

        mgr.delete_backup(&archive.name).unwrap();
        assert!(mgr.list_backups().unwrap().is_empty());
        assert!(matches!(
            mgr.delete_backup(&archive.name),
            Err(BackupError::NotFound(_))
        ));
    }

    #[test]
    fn unique_names_get_a_suffix_on_collision() {
        let (_tmp, mgr) = manager();
        let now = Utc::now();
        let first = mgr.unique_archive_name(now);
        fs::write(
            mgr.backups_dir.join(format!("{}.json", first)),
            b"{}",
        )
        .unwrap();
        let second = mgr.unique_archive_name(now);
        assert_ne!(first, second);
        assert!(second.starts_with(&first));
    }

    #[test]
    fn analyze_stages_a_valid_archive() {
        let (_tmp, mgr) = manager();
        let bytes = serde_json::to_vec(&sample_archive()).unwrap();

        let analysis = mgr.analyze_foreign_archive(&bytes).unwrap();
        assert_eq!(analysis.total_size, bytes.len() as u64);
        assert_eq!(analysis.collections.len(), 2);
        let clients = analysis
            .collections
            .iter()
            .find(|c| c.name == "clients")
            .unwrap();
        assert_eq!(clients.count, 2);
        assert!(clients.size > 0);

        let staged = mgr
            .staging_dir()
            .join(format!("{}.json", analysis.backup_id));
        assert!(staged.exists());
    }

    #[test]
    fn analyze_rejects_garbage() {
        let (_tmp, mgr) = manager();
        let err = mgr.analyze_foreign_archive(b"not json at all").unwrap_err();
        assert!(matches!(err, BackupError::CorruptArchive(_)));
        // nothing staged on failure
        assert!(!mgr.staging_dir().exists());
    }

    #[test]
    fn archive_round_trips_through_json() {
        let archive = sample_archive();
        let bytes = serde_json::to_vec(&archive).unwrap();
        let parsed: Archive = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.name, archive.name);
        assert_eq!(parsed.database, archive.database);
        assert_eq!(parsed.collections.len(), 2);
        assert_eq!(parsed.collections["clients"].len(), 2);
        assert_eq!(
            parsed.collections["clients"][0].get_str("name").unwrap(),
            "Acme"
        );
    }

    #[tokio::test]
    async fn restore_of_missing_archive_is_not_found() {
        let (_tmp, mgr) = manager();
        let registry = RegistryStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        let err = mgr
            .restore_backup(&registry, "backup_19990101_000000", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::NotFound(_)));
    }
}
