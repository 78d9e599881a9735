//! Probe contract: every probe is a function of a target (plus shared,
//! read-only discovery outputs) to a list of findings.

pub mod throttle;
pub mod tls;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use url::Url;

use crate::concurrent::ConcurrentProbe;
use crate::config::ScanConfig;
use crate::findings::Finding;
use crate::http_client::{self, FetchedPage};
use throttle::Pacer;

/// The scanned domain and the base URL probes address it by. The base URL is
/// `https://<domain>/` in production; tests point it at a mock server.
#[derive(Debug, Clone)]
pub struct Target {
    pub domain: String,
    pub base_url: Url,
}

impl Target {
    pub fn new(domain: &str) -> Result<Self> {
        let base_url = Url::parse(&format!("https://{}/", domain))?;
        Ok(Self { domain: domain.to_string(), base_url })
    }

    pub fn with_base_url(domain: &str, base_url: &str) -> Result<Self> {
        Ok(Self {
            domain: domain.to_string(),
            base_url: Url::parse(base_url)?,
        })
    }

    /// Absolute URL for a path on the target.
    pub fn url(&self, path: &str) -> String {
        self.base_url
            .join(path)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("{}{}", self.base_url, path.trim_start_matches('/')))
    }

    /// The base URL over plain HTTP.
    pub fn http_url(&self) -> String {
        let mut url = self.base_url.clone();
        if url.scheme() == "https" {
            let _ = url.set_scheme("http");
            if url.port() == Some(443) {
                let _ = url.set_port(None);
            }
        }
        url.to_string()
    }

    /// Same scheme and port as the base URL, different host.
    pub fn url_for_host(&self, host: &str, path: &str) -> String {
        let mut url = self.base_url.clone();
        if url.set_host(Some(host)).is_err() {
            return format!("https://{}{}", host, path);
        }
        url.set_path(path);
        url.to_string()
    }
}

/// Everything a probe may read. Nothing in here is mutated by probes.
pub struct ProbeContext {
    pub target: Target,
    pub config: Arc<ScanConfig>,
    pub client: Client,
    pub no_redirect_client: Client,
    /// Crawl output; empty before the discovery stage has run.
    pub discovered_urls: Arc<Vec<String>>,
    pub subdomains: Arc<Vec<String>>,
}

impl ProbeContext {
    pub fn new(target: Target, config: Arc<ScanConfig>) -> Result<Self> {
        let client = http_client::build_client(&config)?;
        let no_redirect_client = http_client::build_no_redirect_client(&config)?;
        Ok(Self {
            target,
            config,
            client,
            no_redirect_client,
            discovered_urls: Arc::new(Vec::new()),
            subdomains: Arc::new(Vec::new()),
        })
    }

    pub fn with_discovery(mut self, discovered_urls: Vec<String>, subdomains: Vec<String>) -> Self {
        self.discovered_urls = Arc::new(discovered_urls);
        self.subdomains = Arc::new(subdomains);
        self
    }

    pub fn pacer(&self) -> Pacer {
        Pacer::new(self.config.request_delay())
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        http_client::fetch(&self.client, url, self.config.max_body_bytes).await
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &ProbeContext) -> Result<Vec<Finding>>;
}

/// Outcome of one probe inside a stage.
#[derive(Debug)]
pub struct ProbeReport {
    pub probe: &'static str,
    pub findings: Vec<Finding>,
    pub error: Option<String>,
}

/// Fan out `probes` with the configured cap. A failing or panicking probe
/// degrades to an empty report carrying the error text.
pub async fn run_probes(probes: Vec<Arc<dyn Probe>>, ctx: Arc<ProbeContext>) -> Vec<ProbeReport> {
    let names: Vec<&'static str> = probes.iter().map(|p| p.name()).collect();
    let executor = ConcurrentProbe::new(ctx.config.probe_concurrency);

    let results = executor
        .execute(probes, move |probe: Arc<dyn Probe>| {
            let ctx = ctx.clone();
            async move {
                let name = probe.name();
                let started = std::time::Instant::now();
                let result = probe.run(&ctx).await;
                tracing::debug!(probe = name, elapsed_ms = started.elapsed().as_millis() as u64, "probe finished");
                result
            }
        })
        .await;

    names
        .into_iter()
        .zip(results)
        .map(|(probe, result)| match result {
            Some(Ok(findings)) => {
                tracing::info!(probe, findings = findings.len(), "probe completed");
                ProbeReport { probe, findings, error: None }
            }
            Some(Err(e)) => {
                tracing::warn!(probe, error = %e, "probe failed, continuing with empty result");
                ProbeReport { probe, findings: Vec::new(), error: Some(e.to_string()) }
            }
            None => {
                tracing::warn!(probe, "probe panicked, continuing with empty result");
                ProbeReport { probe, findings: Vec::new(), error: Some("probe panicked".to_string()) }
            }
        })
        .collect()
}
