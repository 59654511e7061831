use crate::vault::{self, StoreKey};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// History entries kept per target. Older entries are dropped silently.
pub const HISTORY_CAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Unknown,
    Installed,
    NotInstalled,
    Offline,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: String,
    pub timestamp: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// A remote machine we manage over SSH.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    pub status: TargetStatus,
    #[serde(default)]
    pub last_check: Option<String>,
    #[serde(default)]
    pub installed_at: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

fn default_port() -> u16 {
    22
}

impl Target {
    /// Prepend a history entry, keeping the log bounded and newest-first.
    pub fn record(&mut self, action: &str, success: bool, extra: Option<serde_json::Value>) {
        self.history.insert(
            0,
            HistoryEntry {
                action: action.to_string(),
                timestamp: Utc::now().to_rfc3339(),
                success,
                extra,
            },
        );
        self.history.truncate(HISTORY_CAP);
    }
}

/// What `list()` exposes. No credential fields, ever.
#[derive(Debug, Clone, Serialize)]
pub struct TargetSummary {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub status: TargetStatus,
    pub last_check: Option<String>,
    pub installed_at: Option<String>,
    pub history: Vec<HistoryEntry>,
}

impl From<&Target> for TargetSummary {
    fn from(t: &Target) -> Self {
        Self {
            id: t.id.clone(),
            name: t.name.clone(),
            host: t.host.clone(),
            port: t.port,
            username: t.username.clone(),
            status: t.status,
            last_check: t.last_check.clone(),
            installed_at: t.installed_at.clone(),
            history: t.history.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NewTarget {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryDoc {
    targets: Vec<Target>,
}

/// Durable store of all targets, persisted as one JSON document.
///
/// Every read-modify-write runs under a single async mutex and writes go
/// through a temp file + rename, so two overlapping deployments can never
/// drop each other's updates. Credentials are sealed with the store key
/// before they touch disk. Per-target deployment locks live here too.
pub struct TargetRegistry {
    path: PathBuf,
    key: StoreKey,
    doc: Mutex<RegistryDoc>,
    deploy_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TargetRegistry {
    /// Open (or initialize) the registry at `data_dir/targets.json`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir {:?}", data_dir))?;
        let key = StoreKey::load_or_generate(data_dir)?;
        let path = data_dir.join("targets.json");

        let mut doc = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str::<RegistryDoc>(&content)
                .with_context(|| format!("Corrupt registry file {:?}", path))?,
            Err(_) => RegistryDoc::default(),
        };
        for target in &mut doc.targets {
            if let Some(password) = &target.password {
                target.password = Some(vault::open_sealed(&key, password)?);
            }
            if let Some(private_key) = &target.private_key {
                target.private_key = Some(vault::open_sealed(&key, private_key)?);
            }
        }

        Ok(Self {
            path,
            key,
            doc: Mutex::new(doc),
            deploy_locks: DashMap::new(),
        })
    }

    /// Credential-free view of all targets.
    pub async fn list(&self) -> Vec<TargetSummary> {
        let doc = self.doc.lock().await;
        doc.targets.iter().map(TargetSummary::from).collect()
    }

    /// Full record, credentials included. Internal use only.
    pub async fn get(&self, id: &str) -> Option<Target> {
        let doc = self.doc.lock().await;
        doc.targets.iter().find(|t| t.id == id).cloned()
    }

    pub async fn create(&self, new: NewTarget) -> Result<String> {
        if new.name.trim().is_empty() || new.host.trim().is_empty() || new.username.trim().is_empty()
        {
            return Err(anyhow!("Name, host, and username are required"));
        }

        let target = Target {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            host: new.host,
            port: new.port,
            username: new.username,
            password: new.password,
            private_key: new.private_key,
            status: TargetStatus::Unknown,
            last_check: None,
            installed_at: None,
            history: Vec::new(),
        };
        let id = target.id.clone();

        let mut doc = self.doc.lock().await;
        doc.targets.push(target);
        self.save_locked(&doc)?;
        Ok(id)
    }

    /// Forget a target. No remote cleanup happens here.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let mut doc = self.doc.lock().await;
        let before = doc.targets.len();
        doc.targets.retain(|t| t.id != id);
        let removed = doc.targets.len() != before;
        if removed {
            self.save_locked(&doc)?;
            self.deploy_locks.remove(id);
        }
        Ok(removed)
    }

    /// Mutate one target under the document lock and persist the result.
    pub async fn update<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Target),
    {
        let mut doc = self.doc.lock().await;
        let target = doc
            .targets
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow!("Target '{}' not found", id))?;
        f(target);
        self.save_locked(&doc)
    }

    /// Per-target mutex serializing deployments against the same machine.
    pub fn deploy_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.deploy_locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn save_locked(&self, doc: &RegistryDoc) -> Result<()> {
        // Credentials never hit disk in clear
        let mut sealed = doc.clone();
        for target in &mut sealed.targets {
            if let Some(password) = &target.password {
                target.password = Some(vault::seal(&self.key, password)?);
            }
            if let Some(private_key) = &target.private_key {
                target.private_key = Some(vault::seal(&self.key, private_key)?);
            }
        }

        let json = serde_json::to_string_pretty(&sealed)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {:?}", self.path))?;
        Ok(())
    }
}
