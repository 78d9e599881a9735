use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Tunables for a scan. Every field has a default so partial JSON files work.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub dns_timeout_secs: u64,
    /// Delay between consecutive requests to the same host within a probe.
    pub request_delay_ms: u64,
    /// Independent probes run concurrently within a stage, at most this many.
    pub probe_concurrency: usize,
    /// Wordlist DNS lookups in flight at once.
    pub dns_concurrency: usize,
    pub max_redirects: usize,
    /// Response bodies are truncated beyond this many bytes.
    pub max_body_bytes: usize,
    pub max_pages: usize,
    pub max_subdomains: usize,
    pub max_secret_pages: usize,
    pub max_scripts: usize,
    pub max_sqli_targets: usize,
    pub max_params_per_url: usize,
    pub rate_limit_burst: usize,
    pub cors_paths: Vec<String>,
    pub user_agent: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            connect_timeout_secs: 5,
            dns_timeout_secs: 5,
            request_delay_ms: 250,
            probe_concurrency: 4,
            dns_concurrency: 10,
            max_redirects: 5,
            max_body_bytes: 2 * 1024 * 1024,
            max_pages: 50,
            max_subdomains: 40,
            max_secret_pages: 20,
            max_scripts: 15,
            max_sqli_targets: 10,
            max_params_per_url: 3,
            rate_limit_burst: 20,
            cors_paths: vec![
                "/".to_string(),
                "/api".to_string(),
                "/api/v1".to_string(),
                "/graphql".to_string(),
            ],
            user_agent: format!("webrecon/{} (security scanner)", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ScanConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: ScanConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config.validate())
    }

    /// Clamp values into bounds that keep every probe finite and polite.
    pub fn validate(mut self) -> Self {
        self.request_timeout_secs = self.request_timeout_secs.clamp(1, 60);
        self.connect_timeout_secs = self.connect_timeout_secs.clamp(1, self.request_timeout_secs);
        self.dns_timeout_secs = self.dns_timeout_secs.clamp(1, 30);
        self.request_delay_ms = self.request_delay_ms.min(5_000);
        self.probe_concurrency = self.probe_concurrency.clamp(1, 16);
        self.dns_concurrency = self.dns_concurrency.clamp(1, 50);
        self.max_redirects = self.max_redirects.min(10);
        self.max_body_bytes = self.max_body_bytes.clamp(1024, 16 * 1024 * 1024);
        self.max_pages = self.max_pages.clamp(1, 1_000);
        self.max_subdomains = self.max_subdomains.min(500);
        self.max_scripts = self.max_scripts.min(100);
        self.rate_limit_burst = self.rate_limit_burst.clamp(1, 100);
        if self.cors_paths.is_empty() {
            self.cors_paths.push("/".to_string());
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.dns_timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: ScanConfig = serde_json::from_str(r#"{"max_pages": 5}"#).unwrap();
        assert_eq!(cfg.max_pages, 5);
        assert_eq!(cfg.request_timeout_secs, 10);
        assert_eq!(cfg.cors_paths.len(), 4);
    }

    #[test]
    fn validate_clamps_out_of_range_values() {
        let cfg = ScanConfig {
            max_pages: 0,
            probe_concurrency: 64,
            request_timeout_secs: 600,
            max_redirects: 50,
            cors_paths: vec![],
            ..ScanConfig::default()
        }
        .validate();
        assert_eq!(cfg.max_pages, 1);
        assert_eq!(cfg.probe_concurrency, 16);
        assert_eq!(cfg.request_timeout_secs, 60);
        assert_eq!(cfg.max_redirects, 10);
        assert_eq!(cfg.cors_paths, vec!["/".to_string()]);
    }
}
