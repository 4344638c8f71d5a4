use anyhow::Result;
use std::sync::Arc;

use crate::core::config::Settings;
use crate::core::connections::ConnectionCache;
use crate::core::jenkins::{ClientFactory, HttpClientFactory};
use crate::core::resolver::{
    BootstrapFetcher, EndpointResolver, HostLookup, HttpBootstrap, SystemLookup,
};

/// Everything a command or webhook handler needs, passed explicitly.
#[derive(Clone)]
pub struct BotContext {
    pub settings: Arc<Settings>,
    pub connections: Arc<ConnectionCache>,
}

impl BotContext {
    /// Wires the system DNS resolver, the HTTP bootstrap poller and the Jenkins
    /// HTTP client.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        Ok(Self::with_backends(
            settings,
            Arc::new(SystemLookup::from_system_conf()?),
            Arc::new(HttpBootstrap::new()),
            Arc::new(HttpClientFactory),
        ))
    }

    pub fn with_backends(
        settings: Settings,
        dns: Arc<dyn HostLookup>,
        bootstrap: Arc<dyn BootstrapFetcher>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        let resolver = EndpointResolver::new(
            &settings.domain,
            settings.resolver.clone(),
            dns,
            bootstrap,
        );
        let connections = ConnectionCache::new(Arc::new(resolver), factory, &settings.jenkins);
        Self {
            settings: Arc::new(settings),
            connections: Arc::new(connections),
        }
    }
}
