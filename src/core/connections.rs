use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::core::config::JenkinsSettings;
use crate::core::jenkins::{ClientFactory, Credentials, JenkinsApi, JenkinsError};
use crate::core::resolver::{EndpointResolver, ResolveError};

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("no Jenkins endpoint could be resolved for grid {0}")]
    Unresolved(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Client(#[from] JenkinsError),
}

/// Per-grid endpoint table and client handles.
///
/// Every `get_or_create` re-resolves the grid before building a fresh handle, so
/// a handle always matches the endpoint recorded next to it. Resolution and
/// replacement for one grid run under that grid's lock; other grids proceed
/// independently.
pub struct ConnectionCache {
    resolver: Arc<EndpointResolver>,
    factory: Arc<dyn ClientFactory>,
    credentials: Credentials,
    discovery: bool,
    urls: RwLock<HashMap<String, Option<String>>>,
    clients: RwLock<HashMap<String, Arc<dyn JenkinsApi>>>,
    grid_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConnectionCache {
    pub fn new(
        resolver: Arc<EndpointResolver>,
        factory: Arc<dyn ClientFactory>,
        jenkins: &JenkinsSettings,
    ) -> Self {
        let urls = jenkins
            .urls
            .iter()
            .map(|(grid, url)| (grid.clone(), Some(url.trim_end_matches('/').to_string())))
            .collect();
        Self {
            resolver,
            factory,
            credentials: jenkins.credentials.clone(),
            discovery: jenkins.discovery,
            urls: RwLock::new(urls),
            clients: RwLock::new(HashMap::new()),
            grid_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    async fn grid_lock(&self, grid: &str) -> Arc<Mutex<()>> {
        let mut locks = self.grid_locks.lock().await;
        locks.entry(grid.to_string()).or_default().clone()
    }

    /// The endpoint recorded by the last resolution, if it succeeded.
    pub async fn endpoint(&self, grid: &str) -> Option<String> {
        self.urls.read().await.get(grid).cloned().flatten()
    }

    #[cfg(test)]
    pub async fn cached(&self, grid: &str) -> Option<Arc<dyn JenkinsApi>> {
        self.clients.read().await.get(grid).cloned()
    }

    /// Drops the handle for `grid`. A discovered endpoint is forgotten with it;
    /// the static table is configuration and stays.
    async fn forget(&self, grid: &str) {
        self.clients.write().await.remove(grid);
        if self.discovery {
            self.urls.write().await.insert(grid.to_string(), None);
        }
    }

    /// Resolves `grid`, then binds the endpoint and shared credentials into a new
    /// handle that supersedes any previous one.
    pub async fn get_or_create(&self, grid: &str) -> Result<Arc<dyn JenkinsApi>, ConnectError> {
        let lock = self.grid_lock(grid).await;
        let _guard = lock.lock().await;

        let endpoint = if self.discovery {
            let resolved = match self.resolver.resolve(grid).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!("[{}] Resolution failed, dropping cached client: {}", grid, e);
                    self.forget(grid).await;
                    return Err(e.into());
                }
            };
            self.urls
                .write()
                .await
                .insert(grid.to_string(), resolved.clone());
            resolved
        } else {
            self.endpoint(grid).await
        };

        let Some(endpoint) = endpoint else {
            warn!("[{}] No Jenkins endpoint, dropping cached client", grid);
            self.clients.write().await.remove(grid);
            return Err(ConnectError::Unresolved(grid.to_string()));
        };

        let client = match self.factory.connect(&endpoint, &self.credentials) {
            Ok(client) => client,
            Err(e) => {
                warn!("[{}] Could not connect to {}: {}", grid, endpoint, e);
                self.forget(grid).await;
                return Err(e.into());
            }
        };
        debug!("[{}] Connected to Jenkins at {}", grid, endpoint);
        self.clients
            .write()
            .await
            .insert(grid.to_string(), client.clone());
        Ok(client)
    }
}
