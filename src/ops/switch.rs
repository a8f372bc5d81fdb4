// ABOUTME: Primary/secondary switch coordinator
// ABOUTME: Validates, schema-checks, and atomically promotes a server to primary

use std::time::Duration;

use chrono::Utc;
use log::info;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::mongo::MongoError;
use crate::db::RegistryStore;
use crate::models::{
    CollectionsSummary, CreateCollectionsResult, HistoryEntry, ServerDefinition, TestResult,
};
use crate::ops::probe;

/// Probe operations the coordinator depends on, split out so the schema
/// phase can be exercised without a reachable server
pub(crate) trait SwitchProbe {
    async fn test_connection(&self, def: &ServerDefinition, timeout: Duration) -> TestResult;
    async fn check_completeness(
        &self,
        def: &ServerDefinition,
        timeout: Duration,
    ) -> Result<CollectionsSummary, MongoError>;
    async fn create_missing_collections(
        &self,
        def: &ServerDefinition,
        names: &[String],
        timeout: Duration,
    ) -> Result<CreateCollectionsResult, MongoError>;
}

/// Default probe backed by real connections
struct LiveProbe;

impl SwitchProbe for LiveProbe {
    async fn test_connection(&self, def: &ServerDefinition, timeout: Duration) -> TestResult {
        probe::test_connection(def, timeout).await
    }

    async fn check_completeness(
        &self,
        def: &ServerDefinition,
        timeout: Duration,
    ) -> Result<CollectionsSummary, MongoError> {
        probe::check_completeness(def, timeout).await
    }

    async fn create_missing_collections(
        &self,
        def: &ServerDefinition,
        names: &[String],
        timeout: Duration,
    ) -> Result<CreateCollectionsResult, MongoError> {
        probe::create_missing_collections(def, names, timeout).await
    }
}

/// Result of one switch request; the log is returned whether or not
/// the switch succeeded so operators can diagnose partial runs
#[derive(Debug, Serialize)]
pub struct SwitchOutcome {
    pub success: bool,
    #[serde(rename = "targetServerId")]
    pub target_server_id: String,
    pub log: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SwitchOutcome {
    fn failed(target_id: &str, log: Vec<String>, error: String) -> Self {
        Self {
            success: false,
            target_server_id: target_id.to_string(),
            log,
            error: Some(error),
        }
    }
}

/// Promote `target_id` to primary.
///
/// Runs Validating -> CheckingSchema -> Promoting; any failure before the
/// promotion leaves the current primary untouched. Collection auto-creation
/// is best-effort and additive, so there is no rollback of created
/// collections on a later failure.
pub async fn switch_primary(
    registry: &RegistryStore,
    switch_lock: &Mutex<()>,
    target_id: &str,
    auto_create: bool,
    timeout: Duration,
) -> SwitchOutcome {
    switch_with(&LiveProbe, registry, switch_lock, target_id, auto_create, timeout).await
}

async fn switch_with(
    probe: &impl SwitchProbe,
    registry: &RegistryStore,
    switch_lock: &Mutex<()>,
    target_id: &str,
    auto_create: bool,
    timeout: Duration,
) -> SwitchOutcome {
    let mut log = Vec::new();

    // Validating
    log.push(format!("Validating target server '{}'", target_id));
    let def = match registry.get_server(target_id) {
        Ok(Some(def)) => def,
        Ok(None) => {
            let error = format!("Target server '{}' is not registered", target_id);
            log.push(error.clone());
            return SwitchOutcome::failed(target_id, log, error);
        }
        Err(e) => {
            let error = format!("Registry lookup failed: {}", e);
            log.push(error.clone());
            return SwitchOutcome::failed(target_id, log, error);
        }
    };
    if !def.active {
        let error = format!("Target server '{}' is marked inactive", target_id);
        log.push(error.clone());
        return SwitchOutcome::failed(target_id, log, error);
    }

    let test = probe.test_connection(&def, timeout).await;
    if !test.reachable {
        let error = format!(
            "Target server '{}' is unreachable: {}",
            target_id,
            test.error_message.unwrap_or_else(|| "unknown error".to_string())
        );
        log.push(error.clone());
        return SwitchOutcome::failed(target_id, log, error);
    }
    log.push(format!(
        "Target reachable in {}ms (MongoDB {})",
        test.latency_ms,
        test.server_version.as_deref().unwrap_or("unknown")
    ));

    // CheckingSchema
    log.push("Checking schema completeness".to_string());
    let summary = match probe.check_completeness(&def, timeout).await {
        Ok(s) => s,
        Err(e) => {
            let error = format!("Schema check failed: {}", e);
            log.push(error.clone());
            return SwitchOutcome::failed(target_id, log, error);
        }
    };

    if summary.complete {
        log.push(format!(
            "Schema complete ({}/{} required collections)",
            summary.existing.len(),
            summary.total
        ));
    } else if !auto_create {
        let error = format!(
            "Incomplete schema; missing collections: {}",
            summary.missing.join(", ")
        );
        log.push(error.clone());
        return SwitchOutcome::failed(target_id, log, error);
    } else {
        log.push(format!(
            "Missing collections: {}; creating them",
            summary.missing.join(", ")
        ));
        match probe.create_missing_collections(&def, &summary.missing, timeout).await {
            Ok(result) => {
                for name in &result.created {
                    log.push(format!("Created collection '{}'", name));
                }
                // creation failures are logged but do not fail the switch
                for failure in &result.failed {
                    log.push(format!(
                        "Could not create collection '{}': {}",
                        failure.name, failure.error
                    ));
                }
            }
            Err(e) => {
                log.push(format!("Collection creation attempt failed: {}", e));
            }
        }
    }

    // Promoting, serialized across concurrent switch requests
    let _guard = switch_lock.lock().await;

    let previous = registry.current_primary_id().unwrap_or(None);
    if let Some(prev) = &previous {
        if prev != target_id {
            log.push(format!("Demoting previous primary '{}'", prev));
        }
    }

    if let Err(e) = registry.set_primary(target_id) {
        let error = format!("Promotion failed: {}", e);
        log.push(error.clone());
        return SwitchOutcome::failed(target_id, log, error);
    }

    log.push(format!(
        "Switch complete: '{}' is now the primary server",
        target_id
    ));
    info!("primary switched from {:?} to '{}'", previous, target_id);

    let _ = registry.add_history(&HistoryEntry {
        id: Uuid::new_v4().to_string(),
        operation_type: "switch_primary".to_string(),
        timestamp: Utc::now(),
        details: Some(serde_json::json!({
            "targetServerId": target_id,
            "previousPrimary": previous,
            "autoCreate": auto_create,
        })),
        results: Some(serde_json::json!({ "log": log })),
    });

    SwitchOutcome {
        success: true,
        target_server_id: target_id.to_string(),
        log,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewServer;

    fn registry_with(defs: &[(&str, bool)]) -> RegistryStore {
        let store = RegistryStore::open_in_memory().unwrap();
        for (id, active) in defs {
            store
                .create_server(&NewServer {
                    id: id.to_string(),
                    name: Some(id.to_string()),
                    host: Some("localhost".to_string()),
                    port: Some(27017),
                    database: Some("admin_app".to_string()),
                    username: None,
                    password: None,
                    description: None,
                    active: Some(*active),
                })
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn unknown_target_fails_and_primary_is_unchanged() {
        let registry = registry_with(&[("alpha", true)]);
        registry.set_primary("alpha").unwrap();
        let lock = Mutex::new(());

        let outcome =
            switch_primary(&registry, &lock, "ghost", false, Duration::from_secs(1)).await;

        assert!(!outcome.success);
        assert!(outcome.log.iter().any(|l| l.contains("not registered")));
        assert_eq!(
            registry.current_primary_id().unwrap().as_deref(),
            Some("alpha")
        );
    }

    #[tokio::test]
    async fn inactive_target_fails_validation() {
        let registry = registry_with(&[("alpha", true), ("beta", false)]);
        registry.set_primary("alpha").unwrap();
        let lock = Mutex::new(());

        let outcome =
            switch_primary(&registry, &lock, "beta", true, Duration::from_secs(1)).await;

        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("inactive"));
        assert_eq!(
            registry.current_primary_id().unwrap().as_deref(),
            Some("alpha")
        );
    }

    #[tokio::test]
    async fn failed_switch_still_returns_the_step_log() {
        let registry = registry_with(&[]);
        let lock = Mutex::new(());

        let outcome =
            switch_primary(&registry, &lock, "ghost", false, Duration::from_secs(1)).await;

        assert!(!outcome.log.is_empty());
        assert!(outcome.log[0].contains("Validating"));
    }

    /// Canned probe: always reachable, with a fixed set of missing collections
    struct CannedProbe {
        missing: Vec<String>,
    }

    impl SwitchProbe for CannedProbe {
        async fn test_connection(
            &self,
            _def: &ServerDefinition,
            _timeout: Duration,
        ) -> TestResult {
            TestResult {
                reachable: true,
                latency_ms: 4,
                server_version: Some("7.0.5".to_string()),
                error_message: None,
            }
        }

        async fn check_completeness(
            &self,
            _def: &ServerDefinition,
            _timeout: Duration,
        ) -> Result<CollectionsSummary, MongoError> {
            let names: Vec<String> = probe::REQUIRED_COLLECTIONS
                .iter()
                .filter(|c| !self.missing.iter().any(|m| m == *c))
                .map(|c| c.to_string())
                .collect();
            Ok(probe::completeness(&names))
        }

        async fn create_missing_collections(
            &self,
            _def: &ServerDefinition,
            names: &[String],
            _timeout: Duration,
        ) -> Result<CreateCollectionsResult, MongoError> {
            Ok(CreateCollectionsResult {
                created: names.to_vec(),
                failed: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn missing_collection_without_auto_create_blocks_the_switch() {
        let registry = registry_with(&[("alpha", true), ("beta", true)]);
        registry.set_primary("alpha").unwrap();
        let lock = Mutex::new(());
        let probe = CannedProbe {
            missing: vec!["tickets".to_string()],
        };

        let outcome =
            switch_with(&probe, &registry, &lock, "beta", false, Duration::from_secs(1)).await;

        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("tickets"));
        assert_eq!(
            registry.current_primary_id().unwrap().as_deref(),
            Some("alpha")
        );
    }

    #[tokio::test]
    async fn missing_collection_with_auto_create_creates_and_promotes() {
        let registry = registry_with(&[("alpha", true), ("beta", true)]);
        registry.set_primary("alpha").unwrap();
        let lock = Mutex::new(());
        let probe = CannedProbe {
            missing: vec!["tickets".to_string()],
        };

        let outcome =
            switch_with(&probe, &registry, &lock, "beta", true, Duration::from_secs(1)).await;

        assert!(outcome.success);
        assert!(outcome
            .log
            .iter()
            .any(|l| l.contains("Created collection 'tickets'")));
        assert_eq!(
            registry.current_primary_id().unwrap().as_deref(),
            Some("beta")
        );
    }

    #[tokio::test]
    async fn complete_schema_promotes_without_creation() {
        let registry = registry_with(&[("alpha", true), ("beta", true)]);
        registry.set_primary("alpha").unwrap();
        let lock = Mutex::new(());
        let probe = CannedProbe { missing: Vec::new() };

        let outcome =
            switch_with(&probe, &registry, &lock, "beta", false, Duration::from_secs(1)).await;

        assert!(outcome.success);
        assert!(outcome.log.iter().any(|l| l.contains("Schema complete")));
        assert_eq!(
            registry.current_primary_id().unwrap().as_deref(),
            Some("beta")
        );
    }
}
