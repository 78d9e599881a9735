//! Record lookups shared by the email, subdomain and takeover checks, behind
//! a trait so they can be answered without a network.

pub mod email_auth;

use anyhow::Result;
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioAsyncResolver;
use reqwest::Client;

use crate::config::ScanConfig;

pub const DOH_ENDPOINT: &str = "https://dns.google/resolve";

/// The record lookups the email, subdomain and takeover checks need. Every
/// method treats NXDOMAIN, timeouts and empty answers alike.
#[async_trait]
pub trait DnsLookup: Send + Sync {
    /// All TXT strings at `name`.
    async fn txt(&self, name: &str) -> Vec<String>;
    /// Mail exchangers, without the trailing dot.
    async fn mx(&self, name: &str) -> Vec<String>;
    async fn caa(&self, name: &str) -> Vec<String>;
    /// CNAME targets, lowercased and without the trailing dot.
    async fn cname(&self, name: &str) -> Vec<String>;
    /// IPv4 addresses; `None` when the name does not resolve.
    async fn ipv4(&self, name: &str) -> Option<Vec<String>>;
}

/// `DnsLookup` over the system's upstream resolvers.
pub struct SystemResolver {
    inner: TokioAsyncResolver,
}

impl SystemResolver {
    pub fn new(config: &ScanConfig) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = config.dns_timeout();
        opts.attempts = 2;
        Self { inner: TokioAsyncResolver::tokio(ResolverConfig::default(), opts) }
    }
}

#[async_trait]
impl DnsLookup for SystemResolver {
    async fn txt(&self, name: &str) -> Vec<String> {
        match self.inner.txt_lookup(name).await {
            Ok(lookup) => lookup.iter().map(|r| r.to_string()).collect(),
            Err(e) => {
                tracing::debug!(name, error = %e, "TXT lookup returned nothing");
                Vec::new()
            }
        }
    }

    async fn mx(&self, name: &str) -> Vec<String> {
        match self.inner.mx_lookup(name).await {
            Ok(lookup) => lookup
                .iter()
                .map(|mx| mx.exchange().to_utf8().trim_end_matches('.').to_string())
                .collect(),
            Err(e) => {
                tracing::debug!(name, error = %e, "MX lookup returned nothing");
                Vec::new()
            }
        }
    }

    async fn caa(&self, name: &str) -> Vec<String> {
        match self.inner.lookup(name, RecordType::CAA).await {
            Ok(lookup) => lookup
                .iter()
                .filter(|r| r.record_type() == RecordType::CAA)
                .map(|r| r.to_string())
                .collect(),
            Err(e) => {
                tracing::debug!(name, error = %e, "CAA lookup returned nothing");
                Vec::new()
            }
        }
    }

    async fn cname(&self, name: &str) -> Vec<String> {
        match self.inner.lookup(name, RecordType::CNAME).await {
            Ok(lookup) => lookup
                .iter()
                .filter_map(|r| match r {
                    RData::CNAME(target) => Some(target.to_string().trim_end_matches('.').to_ascii_lowercase()),
                    _ => None,
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn ipv4(&self, name: &str) -> Option<Vec<String>> {
        match self.inner.ipv4_lookup(name).await {
            Ok(lookup) => {
                let ips: Vec<String> = lookup.iter().map(|ip| ip.to_string()).collect();
                if ips.is_empty() { None } else { Some(ips) }
            }
            Err(_) => None,
        }
    }
}

/// Whether a validating resolver marks `domain` as authenticated (the `AD`
/// flag of a DNS-over-HTTPS JSON answer).
pub async fn dnssec_authenticated(client: &Client, domain: &str) -> Result<bool> {
    let url = format!("{}?name={}&type=A&do=1", DOH_ENDPOINT, urlencoding::encode(domain));
    let body: serde_json::Value = client
        .get(&url)
        .header("accept", "application/dns-json")
        .send()
        .await?
        .json()
        .await?;
    Ok(parse_doh_ad_flag(&body))
}

pub fn parse_doh_ad_flag(body: &serde_json::Value) -> bool {
    body.get("AD").and_then(|v| v.as_bool()).unwrap_or(false)
}

/// Fixed answers for tests. With a wildcard set, every name without its own
/// A record resolves to the wildcard address.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct StaticLookup {
    records: std::collections::HashMap<(&'static str, String), Vec<String>>,
    wildcard: Option<String>,
}

#[cfg(test)]
impl StaticLookup {
    pub(crate) fn with(mut self, kind: &'static str, name: &str, values: &[&str]) -> Self {
        self.records
            .insert((kind, name.to_string()), values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub(crate) fn wildcard(mut self, ip: &str) -> Self {
        self.wildcard = Some(ip.to_string());
        self
    }

    fn get(&self, kind: &'static str, name: &str) -> Vec<String> {
        self.records.get(&(kind, name.to_string())).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
#[async_trait]
impl DnsLookup for StaticLookup {
    async fn txt(&self, name: &str) -> Vec<String> {
        self.get("TXT", name)
    }

    async fn mx(&self, name: &str) -> Vec<String> {
        self.get("MX", name)
    }

    async fn caa(&self, name: &str) -> Vec<String> {
        self.get("CAA", name)
    }

    async fn cname(&self, name: &str) -> Vec<String> {
        self.get("CNAME", name)
    }

    async fn ipv4(&self, name: &str) -> Option<Vec<String>> {
        let ips = self.get("A", name);
        if !ips.is_empty() {
            return Some(ips);
        }
        self.wildcard.clone().map(|ip| vec![ip])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ad_flag_parsing() {
        assert!(parse_doh_ad_flag(&serde_json::json!({"Status": 0, "AD": true})));
        assert!(!parse_doh_ad_flag(&serde_json::json!({"Status": 0, "AD": false})));
        assert!(!parse_doh_ad_flag(&serde_json::json!({"Status": 2})));
    }
}
