//! Subscription Registry
//!
//! Named subscription URLs, the servers each one last delivered, and a flat
//! list of servers added by hand. The whole store is one JSON document,
//! rewritten on every mutation.
//!
//! # Refresh
//!
//! ```text
//! GET url ──▶ 2xx? ──▶ base64? ──▶ lines ──▶ decode each ──▶ replace servers
//!              │          │                      │
//!              ▼          ▼                      ▼
//!            false    raw body             drop failures
//! ```

use chrono::{DateTime, Utc};
use futures::future::join_all;
use mdla_link::{ServerDescriptor, decode, decode_base64_text, decode_lines};
use mdla_network::{HttpClient, HttpError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default auto-update interval (1 hour)
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 3600;

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Fetch failed: {0}")]
    Http(#[from] HttpError),

    #[error("Server responded with status {0}")]
    Status(u16),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// One subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Subscription {
    /// Short unique id (8 hex chars)
    pub id: String,
    pub name: String,
    pub url: String,
    /// Servers from the last successful refresh
    pub servers: Vec<ServerDescriptor>,
    /// Time of the last successful refresh
    pub last_update: Option<DateTime<Utc>>,
    pub auto_update: bool,
    /// Seconds between automatic refreshes
    pub update_interval: u64,
}

impl Default for Subscription {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            url: String::new(),
            servers: Vec::new(),
            last_update: None,
            auto_update: true,
            update_interval: DEFAULT_UPDATE_INTERVAL_SECS,
        }
    }
}

impl Subscription {
    /// Whether an automatic refresh is due at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.auto_update {
            return false;
        }
        match self.last_update {
            None => true,
            Some(last) => {
                let elapsed = now.signed_duration_since(last).num_seconds();
                elapsed >= self.update_interval as i64
            }
        }
    }
}

/// Persisted document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreDocument {
    pub subscriptions: Vec<Subscription>,
    /// Servers added by hand
    pub servers: Vec<ServerDescriptor>,
}

/// Decode a subscription body into servers
///
/// The body is tried as base64 first and used as-is when that fails.
/// Lines that do not decode are dropped.
pub fn parse_subscription_body(body: &[u8]) -> Vec<ServerDescriptor> {
    let text = String::from_utf8_lossy(body);
    match decode_base64_text(&text) {
        Ok(decoded) => decode_lines(&decoded),
        Err(_) => decode_lines(&text),
    }
}

/// Subscription and server store
pub struct SubscriptionRegistry {
    path: PathBuf,
    store: RwLock<StoreDocument>,
    client: HttpClient,
}

impl SubscriptionRegistry {
    /// Open the store at `path`
    ///
    /// A missing or unreadable store starts empty.
    pub async fn open(path: impl Into<PathBuf>, client: HttpClient) -> Self {
        let path = path.into();
        let store = match load_store(&path).await {
            Ok(Some(store)) => {
                info!(
                    "Loaded {} subscriptions and {} servers from {:?}",
                    store.subscriptions.len(),
                    store.servers.len(),
                    path
                );
                store
            }
            Ok(None) => {
                debug!("No store at {:?}, starting empty", path);
                StoreDocument::default()
            }
            Err(e) => {
                warn!("Ignoring unreadable store {:?}: {}", path, e);
                StoreDocument::default()
            }
        };

        Self {
            path,
            store: RwLock::new(store),
            client,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register a subscription; its servers arrive with the first refresh
    pub async fn add(&self, name: &str, url: &str) -> Subscription {
        let mut store = self.store.write().await;

        let id = loop {
            let candidate = format!("{:08x}", rand::random::<u32>());
            if !store.subscriptions.iter().any(|s| s.id == candidate) {
                break candidate;
            }
        };

        let subscription = Subscription {
            id,
            name: name.to_string(),
            url: url.to_string(),
            ..Default::default()
        };
        store.subscriptions.push(subscription.clone());
        self.save(&store).await;

        info!("Added subscription {} ({})", subscription.name, subscription.id);
        subscription
    }

    /// Remove a subscription and its servers
    pub async fn remove(&self, id: &str) -> bool {
        let mut store = self.store.write().await;
        let before = store.subscriptions.len();
        store.subscriptions.retain(|s| s.id != id);
        if store.subscriptions.len() == before {
            return false;
        }
        self.save(&store).await;
        info!("Removed subscription {}", id);
        true
    }

    /// Change auto-update settings
    pub async fn set_auto_update(&self, id: &str, enabled: bool, interval_secs: u64) -> bool {
        let mut store = self.store.write().await;
        let Some(subscription) = store.subscriptions.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        subscription.auto_update = enabled;
        subscription.update_interval = interval_secs;
        self.save(&store).await;
        true
    }

    /// Fetch a subscription and replace its servers
    ///
    /// On failure the previous servers and `last_update` are kept.
    pub async fn refresh(&self, id: &str) -> bool {
        let url = {
            let store = self.store.read().await;
            match store.subscriptions.iter().find(|s| s.id == id) {
                Some(subscription) => subscription.url.clone(),
                None => {
                    warn!("Refresh of unknown subscription {}", id);
                    return false;
                }
            }
        };

        let servers = match self.fetch(&url).await {
            Ok(servers) => servers,
            Err(e) => {
                warn!("Subscription {} refresh failed: {}", id, e);
                return false;
            }
        };

        let mut store = self.store.write().await;
        let Some(subscription) = store.subscriptions.iter_mut().find(|s| s.id == id) else {
            debug!("Subscription {} removed during refresh", id);
            return false;
        };
        info!(
            "Subscription {} refreshed: {} servers",
            subscription.name,
            servers.len()
        );
        subscription.servers = servers;
        subscription.last_update = Some(Utc::now());
        self.save(&store).await;
        true
    }

    /// Refresh every subscription concurrently
    pub async fn refresh_all(&self) -> HashMap<String, bool> {
        let ids = self.subscription_ids(|_| true).await;
        self.refresh_many(ids).await
    }

    /// Refresh the auto-update subscriptions that are due at `now`
    pub async fn refresh_due(&self, now: DateTime<Utc>) -> HashMap<String, bool> {
        let ids = self.subscription_ids(|s| s.is_due(now)).await;
        self.refresh_many(ids).await
    }

    async fn refresh_many(&self, ids: Vec<String>) -> HashMap<String, bool> {
        let results = join_all(ids.into_iter().map(|id| async move {
            let ok = self.refresh(&id).await;
            (id, ok)
        }))
        .await;
        results.into_iter().collect()
    }

    async fn subscription_ids(&self, filter: impl Fn(&Subscription) -> bool) -> Vec<String> {
        let store = self.store.read().await;
        store
            .subscriptions
            .iter()
            .filter(|s| filter(s))
            .map(|s| s.id.clone())
            .collect()
    }

    async fn fetch(&self, url: &str) -> Result<Vec<ServerDescriptor>, RegistryError> {
        let response = self.client.get(url).await?;
        if !response.is_success() {
            return Err(RegistryError::Status(response.status.as_u16()));
        }
        Ok(parse_subscription_body(&response.body))
    }

    /// Every server: subscriptions in order, then the hand-added ones
    pub async fn list_all_descriptors(&self) -> Vec<ServerDescriptor> {
        let store = self.store.read().await;
        store
            .subscriptions
            .iter()
            .flat_map(|s| s.servers.iter())
            .chain(store.servers.iter())
            .cloned()
            .collect()
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.store.read().await.subscriptions.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Subscription> {
        let store = self.store.read().await;
        store.subscriptions.iter().find(|s| s.id == id).cloned()
    }

    /// Hand-added servers
    pub async fn servers(&self) -> Vec<ServerDescriptor> {
        self.store.read().await.servers.clone()
    }

    /// Decode a share link and keep it as a hand-added server
    pub async fn add_server_from_link(&self, link: &str) -> Option<ServerDescriptor> {
        let descriptor = decode(link)?;
        let mut store = self.store.write().await;
        store.servers.push(descriptor.clone());
        self.save(&store).await;
        info!("Added server {}", descriptor.label());
        Some(descriptor)
    }

    /// Import every decodable line of a pasted block
    pub async fn add_servers_from_text(&self, text: &str) -> Vec<ServerDescriptor> {
        let added = decode_lines(text);
        if added.is_empty() {
            return added;
        }
        let mut store = self.store.write().await;
        store.servers.extend(added.iter().cloned());
        self.save(&store).await;
        info!("Imported {} servers", added.len());
        added
    }

    /// Remove a hand-added server by position
    pub async fn remove_server(&self, index: usize) -> bool {
        let mut store = self.store.write().await;
        if index >= store.servers.len() {
            return false;
        }
        let removed = store.servers.remove(index);
        self.save(&store).await;
        info!("Removed server {}", removed.label());
        true
    }

    /// Write the document via a temp file and rename; failures are logged
    async fn save(&self, store: &StoreDocument) {
        if let Err(e) = save_store(&self.path, store).await {
            warn!("Failed to save store {:?}: {}", self.path, e);
        }
    }
}

async fn load_store(path: &Path) -> Result<Option<StoreDocument>, RegistryError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(RegistryError::IoError(e.to_string())),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| RegistryError::ParseError(e.to_string()))
}

async fn save_store(path: &Path, store: &StoreDocument) -> Result<(), RegistryError> {
    let json = serde_json::to_string_pretty(store)
        .map_err(|e| RegistryError::ParseError(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| RegistryError::IoError(e.to_string()))?;
    }

    let temp = path.with_extension("json.tmp");
    tokio::fs::write(&temp, json)
        .await
        .map_err(|e| RegistryError::IoError(e.to_string()))?;
    tokio::fs::rename(&temp, path)
        .await
        .map_err(|e| RegistryError::IoError(e.to_string()))?;
    Ok(())
}
