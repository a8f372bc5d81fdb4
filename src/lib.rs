// ABOUTME: Main library for the Mongo Warden service
// ABOUTME: Module declarations and shared application state

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod ops;

use config::AppConfig;
use db::RegistryStore;
use ops::backup::BackupManager;

/// State shared by every request handler
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<RegistryStore>,
    pub backups: BackupManager,
    /// Serializes primary-pointer promotions across concurrent switch requests
    pub switch_lock: Mutex<()>,
    /// Signals long-running sync/restore jobs to stop issuing work
    pub cancel: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let registry_path = config.registry_path().context("resolving registry path")?;
        let registry =
            Arc::new(RegistryStore::open(&registry_path).context("opening server registry")?);
        let backups = BackupManager::new(
            config.backups_dir().context("resolving backups directory")?,
            config.probe_timeout(),
        )
        .context("opening backups directory")?;

        Ok(Self {
            config,
            registry,
            backups,
            switch_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
        })
    }
}
