//! Grid endpoint discovery.
//!
//! A grid publishes the address of its current Jenkins master through a small
//! bootstrap service. Grids behind a load balancer answer on
//! `master-<grid>-alb.<domain>`; older grids without one are reached through the
//! relay script on `slave-<grid>.<domain>`. Bootstrap nodes can lag behind a
//! deploy, so the service is polled a bounded number of times.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}").expect("valid regex"));

const BOOTSTRAP_PORT: u16 = 3000;
const BOOTSTRAP_SCRIPT: &str = "scripts/jenkins_url";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    pub attempts: u32,
    pub retry_interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            attempts: 29,
            retry_interval_ms: 1000,
            timeout_ms: 5000,
        }
    }
}

impl ResolverSettings {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("name does not exist: {0}")]
    NxDomain(String),
    #[error("lookup failed: {0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection refused, timed out or otherwise unreachable. Retried.
    #[error("connection to bootstrap endpoint failed: {0}")]
    Connection(String),
    /// The endpoint answered with something that is not JSON. Not retried.
    #[error("bootstrap endpoint returned invalid JSON: {0}")]
    Body(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Fetch(FetchError),
    #[error("bootstrap response from {url} is missing a string `stdout[0]`")]
    MissingStdout { url: String },
}

/// DNS "A record" lookup.
#[async_trait]
pub trait HostLookup: Send + Sync {
    async fn lookup_a(&self, host: &str) -> Result<(), LookupError>;
}

/// One GET against a bootstrap URL, returning the decoded JSON body.
#[async_trait]
pub trait BootstrapFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Value, FetchError>;
}

pub struct SystemLookup {
    resolver: hickory_resolver::TokioAsyncResolver,
}

impl SystemLookup {
    pub fn from_system_conf() -> anyhow::Result<Self> {
        let resolver = hickory_resolver::TokioAsyncResolver::tokio_from_system_conf()?;
        Ok(Self { resolver })
    }
}

#[async_trait]
impl HostLookup for SystemLookup {
    async fn lookup_a(&self, host: &str) -> Result<(), LookupError> {
        use hickory_resolver::error::ResolveErrorKind;
        use hickory_resolver::proto::op::ResponseCode;

        match self.resolver.ipv4_lookup(host).await {
            Ok(_) => Ok(()),
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { response_code, .. }
                    if *response_code == ResponseCode::NXDomain =>
                {
                    Err(LookupError::NxDomain(host.to_string()))
                }
                _ => Err(LookupError::Other(e.to_string())),
            },
        }
    }
}

pub struct HttpBootstrap {
    http: reqwest::Client,
}

impl HttpBootstrap {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpBootstrap {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BootstrapFetcher for HttpBootstrap {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Value, FetchError> {
        let resp = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::Connection(e.to_string()))?;
        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::Connection(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| FetchError::Body(e.to_string()))
    }
}

/// Extracts the advertised address when `stdout[0]` starts with a dotted quad.
/// `Ok(None)` means the service answered but has not published an address yet.
pub fn advertised_address(url: &str, body: &Value) -> Result<Option<String>, ResolveError> {
    let first = body
        .get("stdout")
        .and_then(|out| out.get(0))
        .and_then(Value::as_str)
        .ok_or_else(|| ResolveError::MissingStdout {
            url: url.to_string(),
        })?;
    if ADDRESS_RE.is_match(first) {
        Ok(Some(first.trim().to_string()))
    } else {
        Ok(None)
    }
}

pub struct EndpointResolver {
    domain: String,
    settings: ResolverSettings,
    dns: Arc<dyn HostLookup>,
    bootstrap: Arc<dyn BootstrapFetcher>,
}

impl EndpointResolver {
    pub fn new(
        domain: &str,
        settings: ResolverSettings,
        dns: Arc<dyn HostLookup>,
        bootstrap: Arc<dyn BootstrapFetcher>,
    ) -> Self {
        Self {
            domain: domain.to_string(),
            settings,
            dns,
            bootstrap,
        }
    }

    pub fn balancer_host(&self, grid: &str) -> String {
        format!("master-{}-alb.{}", grid, self.domain)
    }

    /// Picks the bootstrap URL: the direct relay when the balancer name does not
    /// exist, the balancer otherwise (including any other DNS failure).
    pub async fn bootstrap_url(&self, grid: &str) -> String {
        let host = self.balancer_host(grid);
        match self.dns.lookup_a(&host).await {
            Err(LookupError::NxDomain(e)) => {
                debug!("[{}] New instance api endpoint not supported: {}", grid, e);
                format!(
                    "http://slave-{}.{}:{}/{}",
                    grid, self.domain, BOOTSTRAP_PORT, BOOTSTRAP_SCRIPT
                )
            }
            Err(LookupError::Other(e)) => {
                debug!("[{}] Lookup of {} failed, keeping balancer: {}", grid, host, e);
                format!("https://{}:{}/{}", host, BOOTSTRAP_PORT, BOOTSTRAP_SCRIPT)
            }
            Ok(()) => format!("https://{}:{}/{}", host, BOOTSTRAP_PORT, BOOTSTRAP_SCRIPT),
        }
    }

    /// Returns `Ok(Some(endpoint))` as soon as the bootstrap service advertises
    /// an address, `Ok(None)` once every attempt has failed. Non-JSON bodies and
    /// responses without `stdout[0]` abort immediately.
    pub async fn resolve(&self, grid: &str) -> Result<Option<String>, ResolveError> {
        let url = self.bootstrap_url(grid).await;
        let timeout = self.settings.timeout();

        for attempt in 1..=self.settings.attempts {
            match self.bootstrap.fetch(&url, timeout).await {
                Ok(body) => {
                    if let Some(address) = advertised_address(&url, &body)? {
                        let endpoint = format!("http://{}", address);
                        info!(
                            "[{}] Resolved Jenkins endpoint {} (attempt {})",
                            grid, endpoint, attempt
                        );
                        return Ok(Some(endpoint));
                    }
                    debug!(
                        "[{}] Bootstrap at {} has no address yet (attempt {})",
                        grid, url, attempt
                    );
                }
                Err(FetchError::Connection(e)) => {
                    warn!(
                        "[{}] Connection timeout to Instance API endpoint: {}",
                        grid, e
                    );
                }
                Err(e @ FetchError::Body(_)) => return Err(ResolveError::Fetch(e)),
            }
            tokio::time::sleep(self.settings.retry_interval()).await;
        }

        warn!(
            "[{}] Gave up resolving Jenkins endpoint after {} attempts",
            grid, self.settings.attempts
        );
        Ok(None)
    }
}


#[cfg(test)]
mod tests {
    use super::fake::{FakeLookup, ScriptedBootstrap};
    use super::*;
    use serde_json::json;

    fn resolver(
        lookup: Result<(), LookupError>,
        bootstrap: Arc<ScriptedBootstrap>,
    ) -> EndpointResolver {
        EndpointResolver::new(
            "example.com",
            ResolverSettings::default(),
            Arc::new(FakeLookup(lookup)),
            bootstrap,
        )
    }

    fn refused() -> Result<Value, FetchError> {
        Err(FetchError::Connection("connection refused".to_string()))
    }

    #[tokio::test]
    async fn nxdomain_selects_direct_host_url() {
        let bootstrap = Arc::new(ScriptedBootstrap::new(vec![]));
        let r = resolver(
            Err(LookupError::NxDomain("master-prod-alb.example.com".to_string())),
            bootstrap,
        );
        assert_eq!(
            r.bootstrap_url("prod").await,
            "http://slave-prod.example.com:3000/scripts/jenkins_url"
        );
    }

    #[tokio::test]
    async fn other_lookup_outcomes_select_balancer_url() {
        let expected = "https://master-prod-alb.example.com:3000/scripts/jenkins_url";
        let ok = resolver(Ok(()), Arc::new(ScriptedBootstrap::new(vec![])));
        assert_eq!(ok.bootstrap_url("prod").await, expected);

        let servfail = resolver(
            Err(LookupError::Other("SERVFAIL".to_string())),
            Arc::new(ScriptedBootstrap::new(vec![])),
        );
        assert_eq!(servfail.bootstrap_url("prod").await, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_polling_at_first_valid_address() {
        let bootstrap = Arc::new(ScriptedBootstrap::new(vec![
            refused(),
            Ok(json!({ "stdout": ["booting"] })),
            Ok(json!({ "stdout": ["10.20.30.40:8080", "extra"] })),
            Ok(json!({ "stdout": ["10.0.0.1"] })),
        ]));
        let r = resolver(Ok(()), bootstrap.clone());

        let endpoint = r.resolve("prod").await.unwrap();
        assert_eq!(endpoint.as_deref(), Some("http://10.20.30.40:8080"));
        assert_eq!(bootstrap.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_exactly_29_attempts_then_leaves_unresolved() {
        let bootstrap = Arc::new(ScriptedBootstrap::new(vec![
            refused(),
            Ok(json!({ "stdout": ["not-an-address"] })),
        ]));
        let r = resolver(Ok(()), bootstrap.clone());

        let started = tokio::time::Instant::now();
        assert_eq!(r.resolve("prod").await.unwrap(), None);
        assert_eq!(bootstrap.calls(), 29);
        assert_eq!(started.elapsed(), Duration::from_secs(29));
    }

    #[tokio::test(start_paused = true)]
    async fn connection_failures_only_also_exhaust() {
        let bootstrap = Arc::new(ScriptedBootstrap::new(vec![refused()]));
        let r = resolver(
            Err(LookupError::NxDomain("x".to_string())),
            bootstrap.clone(),
        );
        assert_eq!(r.resolve("legacy").await.unwrap(), None);
        assert_eq!(bootstrap.calls(), 29);
        assert!(bootstrap
            .urls
            .lock()
            .unwrap()
            .iter()
            .all(|u| u == "http://slave-legacy.example.com:3000/scripts/jenkins_url"));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_body_fails_without_retry() {
        let bootstrap = Arc::new(ScriptedBootstrap::new(vec![Ok(json!({ "stderr": [] }))]));
        let r = resolver(Ok(()), bootstrap.clone());
        let err = r.resolve("prod").await.unwrap_err();
        assert!(matches!(err, ResolveError::MissingStdout { .. }));
        assert_eq!(bootstrap.calls(), 1);

        let bootstrap = Arc::new(ScriptedBootstrap::new(vec![Err(FetchError::Body(
            "expected value at line 1".to_string(),
        ))]));
        let r = resolver(Ok(()), bootstrap.clone());
        assert!(matches!(
            r.resolve("prod").await.unwrap_err(),
            ResolveError::Fetch(FetchError::Body(_))
        ));
        assert_eq!(bootstrap.calls(), 1);
    }

    #[test]
    fn address_must_lead_the_first_line() {
        let url = "http://bootstrap";
        assert_eq!(
            advertised_address(url, &json!({ "stdout": ["172.16.0.9"] })).unwrap(),
            Some("172.16.0.9".to_string())
        );
        assert_eq!(
            advertised_address(url, &json!({ "stdout": ["ip: 172.16.0.9"] })).unwrap(),
            None
        );
        assert!(advertised_address(url, &json!({ "stdout": [] })).is_err());
        assert!(advertised_address(url, &json!({ "stdout": [42] })).is_err());
    }

    #[tokio::test]
    async fn http_bootstrap_distinguishes_refused_from_garbage() {
        let fetcher = HttpBootstrap::new();
        // Port 9 on loopback is reserved for discard and normally closed.
        let err = fetcher
            .fetch("http://127.0.0.1:9/scripts/jenkins_url", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Connection(_)));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route(
            "/scripts/jenkins_url",
            axum::routing::get(|| async { "<html>starting</html>" }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let err = fetcher
            .fetch(
                &format!("http://{addr}/scripts/jenkins_url"),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Body(_)));
    }
}
