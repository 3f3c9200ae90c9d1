use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Locale, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use regulator_common::{ActuatorSnapshot, NameIdMap, RegulatorConfig, WeatherFile};

use crate::resilient::SnapshotStore;

#[derive(Clone)]
pub struct AppStore {
    config_path: Arc<PathBuf>,
    timezone: Tz,
    // Keyed by file path.
    locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl AppStore {
    pub fn new(config_path: PathBuf, timezone: Tz) -> Self {
        Self {
            config_path: Arc::new(config_path),
            timezone,
            locks: Arc::default(),
        }
    }

    pub fn base_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    pub async fn load_config(&self) -> RegulatorConfig {
        let _guard = self.path_lock(&self.config_path).await;
        match tokio::fs::read(self.config_path.as_ref()).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|err| {
                warn!(
                    "config {} unreadable, using defaults: {err}",
                    self.config_path.display()
                );
                RegulatorConfig::default()
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let config = RegulatorConfig::default();
                match write_json(&self.config_path, &config).await {
                    Ok(()) => info!("created default config at {}", self.config_path.display()),
                    Err(err) => warn!("failed to create default config: {err:#}"),
                }
                config
            }
            Err(err) => {
                warn!(
                    "failed to read config {}: {err}",
                    self.config_path.display()
                );
                RegulatorConfig::default()
            }
        }
    }

    pub async fn load_name_map(&self, path: &Path) -> anyhow::Result<NameIdMap> {
        let _guard = self.path_lock(path).await;
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read name map {}", path.display()))?;
        Ok(NameIdMap::from_slice(&raw)?)
    }

    pub async fn load_actuator(&self, path: &Path) -> anyhow::Result<Option<ActuatorSnapshot>> {
        let _guard = self.path_lock(path).await;
        match read_optional(path).await? {
            Some(raw) => Ok(Some(ActuatorSnapshot::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn save_actuator(&self, path: &Path, snapshot: &ActuatorSnapshot) -> anyhow::Result<()> {
        let _guard = self.path_lock(path).await;
        write_json(path, snapshot).await
    }

    pub async fn load_weather(&self, path: &Path) -> anyhow::Result<Option<WeatherFile>> {
        let _guard = self.path_lock(path).await;
        read_weather(path).await
    }

    // Without a new `diff` the one already on disk is kept.
    pub async fn save_weather(
        &self,
        path: &Path,
        data: &Value,
        diff: Option<f64>,
    ) -> anyhow::Result<()> {
        let _guard = self.path_lock(path).await;
        let diff = match diff {
            Some(diff) => diff,
            None => match read_weather(path).await {
                Ok(previous) => previous.map(|file| file.diff).unwrap_or(0.0),
                Err(err) => {
                    warn!("previous weather snapshot unreadable: {err:#}");
                    0.0
                }
            },
        };

        let now = Utc::now();
        let file = WeatherFile::new(data.clone(), now.timestamp(), self.datestring(now), diff);
        write_json(path, &file).await
    }

    async fn path_lock(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(path.to_path_buf()).or_default())
        };
        lock.lock_owned().await
    }

    // e.g. `Montag, 19. Oktober 2026 um 14:05:03`
    pub fn datestring(&self, now: DateTime<Utc>) -> String {
        now.with_timezone(&self.timezone)
            .format_localized("%A, %-d. %B %Y um %H:%M:%S", Locale::de_DE)
            .to_string()
    }

    pub fn actuator_snapshot(&self, path: PathBuf) -> ActuatorSnapshotFile {
        ActuatorSnapshotFile {
            store: self.clone(),
            path,
        }
    }

    pub fn weather_snapshot(&self, path: PathBuf) -> WeatherSnapshotFile {
        WeatherSnapshotFile {
            store: self.clone(),
            path,
        }
    }
}

pub struct ActuatorSnapshotFile {
    store: AppStore,
    path: PathBuf,
}

#[async_trait]
impl SnapshotStore<ActuatorSnapshot> for ActuatorSnapshotFile {
    async fn load(&self) -> anyhow::Result<Option<ActuatorSnapshot>> {
        self.store.load_actuator(&self.path).await
    }

    async fn save(&self, value: &ActuatorSnapshot) -> anyhow::Result<()> {
        self.store.save_actuator(&self.path, value).await
    }
}

pub struct WeatherSnapshotFile {
    store: AppStore,
    path: PathBuf,
}

#[async_trait]
impl SnapshotStore<Value> for WeatherSnapshotFile {
    async fn load(&self) -> anyhow::Result<Option<Value>> {
        Ok(self
            .store
            .load_weather(&self.path)
            .await?
            .map(|file| file.data))
    }

    async fn save(&self, value: &Value) -> anyhow::Result<()> {
        self.store.save_weather(&self.path, value, None).await
    }
}

async fn read_optional(path: &Path) -> anyhow::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

async fn read_weather(path: &Path) -> anyhow::Result<Option<WeatherFile>> {
    match read_optional(path).await? {
        Some(raw) => Ok(Some(WeatherFile::from_slice(&raw)?)),
        None => Ok(None),
    }
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, payload)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
