// ABOUTME: Shared data models for Mongo Warden
// ABOUTME: Wire types for the server registry, probing, sync, and backup APIs

use chrono::{DateTime, Utc};
use mongodb::bson::Document;
use serde::{Deserialize, Serialize};

/// A registered MongoDB server definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDefinition {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

/// Server definition without credentials, safe to return to clients
#[derive(Debug, Clone, Serialize)]
pub struct ServerPublic {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub active: bool,
    #[serde(rename = "isPrimary")]
    pub is_primary: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl ServerPublic {
    pub fn from_definition(def: &ServerDefinition, is_primary: bool) -> Self {
        Self {
            id: def.id.clone(),
            name: def.name.clone(),
            host: def.host.clone(),
            port: def.port,
            database: def.database.clone(),
            username: def.username.clone(),
            description: def.description.clone(),
            active: def.active,
            is_primary,
            created_at: def.created_at,
            updated_at: def.updated_at,
        }
    }
}

/// Request body for creating a server definition
#[derive(Debug, Clone, Deserialize)]
pub struct NewServer {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

/// Partial update for a server definition; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

/// Connection state reported by a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Online,
    Offline,
    Error,
    Unknown,
}

/// Result of a single connection test
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub reachable: bool,
    #[serde(rename = "latencyMs")]
    pub latency_ms: u64,
    #[serde(rename = "serverVersion", skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// A collection with its document count and on-disk size in bytes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub count: u64,
    pub size: u64,
}

/// Completeness of a server's schema against the required-collection manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionsSummary {
    pub existing: Vec<String>,
    pub missing: Vec<String>,
    pub required: Vec<String>,
    pub total: usize,
    pub complete: bool,
}

/// Derived status of one registered server, recomputed per probe
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub id: String,
    pub name: String,
    #[serde(rename = "connectionStatus")]
    pub connection_status: ConnectionStatus,
    #[serde(rename = "isPrimary")]
    pub is_primary: bool,
    #[serde(rename = "latencyMs", skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<CollectionsSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of creating missing collections on a server
#[derive(Debug, Clone, Serialize)]
pub struct CreateCollectionsResult {
    pub created: Vec<String>,
    pub failed: Vec<CollectionFailure>,
}

/// One collection that could not be created
#[derive(Debug, Clone, Serialize)]
pub struct CollectionFailure {
    pub name: String,
    pub error: String,
}

/// Per-collection outcome within a sync run
#[derive(Debug, Clone, Serialize)]
pub struct CollectionCopyResult {
    pub collection: String,
    pub copied: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-target outcome within a sync run
#[derive(Debug, Clone, Serialize)]
pub struct TargetSyncResult {
    #[serde(rename = "targetId")]
    pub target_id: String,
    pub success: bool,
    pub collections: Vec<CollectionCopyResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of one synchronize invocation
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    #[serde(rename = "sourceId")]
    pub source_id: String,
    pub success: bool,
    pub targets: Vec<TargetSyncResult>,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "finishedAt")]
    pub finished_at: DateTime<Utc>,
}

/// Persisted recurring-sync configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncSchedule {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "intervalMinutes", default = "default_interval")]
    pub interval_minutes: u32,
    #[serde(rename = "startAt", default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(rename = "sourceId", default)]
    pub source_id: String,
    #[serde(rename = "targetIds", default)]
    pub target_ids: Vec<String>,
    #[serde(rename = "dropBeforeInsert", default)]
    pub drop_before_insert: bool,
}

fn default_interval() -> u32 {
    60
}

/// A backup archive on disk
#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub name: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub size: u64,
}

/// Stats of an uploaded archive, staged for compare-before-import
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveAnalysis {
    #[serde(rename = "backupId")]
    pub backup_id: String,
    #[serde(rename = "totalSize")]
    pub total_size: u64,
    pub collections: Vec<CollectionInfo>,
}

/// Page descriptor for document listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u64,
    #[serde(rename = "totalPages")]
    pub total_pages: u64,
    pub total: u64,
}

/// One page of raw documents from a collection
#[derive(Debug, Clone, Serialize)]
pub struct DocumentPage {
    pub documents: Vec<Document>,
    pub pagination: Pagination,
}

/// Aggregate view of the primary database
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseOverview {
    #[serde(rename = "dbName")]
    pub db_name: String,
    pub connected: bool,
    pub collections: Vec<CollectionInfo>,
    #[serde(rename = "totalSize")]
    pub total_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// History entry for tracking operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub operation_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    #[serde(default)]
    pub results: Option<serde_json::Value>,
}
