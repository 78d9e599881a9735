use anyhow::Result;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::crtsh::crtsh_subdomains;
use crate::dns::{DnsLookup, SystemResolver};
use crate::findings::{Category, Finding, FindingDetails, Severity};
use crate::probe::ProbeContext;
use crate::utils::apex_domain;

/// Prefixes resolved during active discovery.
pub const WORDLIST: &[&str] = &[
    "www", "api", "app", "admin", "dev", "staging", "stage", "test", "qa", "uat", "preprod", "beta", "demo", "sandbox",
    "mail", "webmail", "smtp", "vpn", "remote", "portal", "dashboard", "console", "internal", "intranet", "secure",
    "cdn", "static", "assets", "media", "img", "files", "upload", "download", "docs", "help", "support", "status",
    "blog", "shop", "store", "m", "mobile", "auth", "login", "sso", "id", "accounts", "git", "gitlab", "jenkins", "ci",
    "grafana", "kibana", "monitor", "db", "backup", "old", "legacy", "v1", "v2",
];

/// Name tokens suggesting an environment that should not be public.
pub const DANGEROUS_KEYWORDS: &[&str] = &[
    "dev", "develop", "development", "staging", "stage", "test", "testing", "qa", "uat", "preprod", "sandbox", "admin",
    "administrator", "internal", "intranet", "backup", "old", "legacy", "debug", "jenkins", "gitlab", "git", "db",
    "phpmyadmin", "grafana", "kibana", "monitor",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubdomainSource {
    CertificateTransparency,
    Wordlist,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubdomainStatus {
    pub name: String,
    pub source: SubdomainSource,
    pub resolves: bool,
    pub https: bool,
    pub http: bool,
}

impl SubdomainStatus {
    pub fn is_live(&self) -> bool {
        self.https || self.http
    }
}

pub fn is_dangerous_name(name: &str, domain: &str) -> bool {
    let label = name.strip_suffix(&format!(".{}", domain)).unwrap_or(name);
    label
        .split(['-', '.', '_'])
        .map(|t| t.trim_end_matches(|c: char| c.is_ascii_digit()))
        .any(|t| DANGEROUS_KEYWORDS.contains(&t))
}

/// Wordlist names that resolve. With wildcard DNS, names answering only with
/// the wildcard's addresses are dropped.
pub async fn wordlist_candidates(lookup: &dyn DnsLookup, domain: &str, concurrency: usize) -> Vec<String> {
    let (hits, wildcard) = tokio::join!(
        wordlist_hits(lookup, domain, concurrency),
        wildcard_ips(lookup, domain),
    );
    if !wildcard.is_empty() {
        tracing::info!(domain = %domain, "wildcard DNS detected, filtering wordlist hits");
    }
    hits.into_iter()
        .filter(|(_, ips)| wildcard.is_empty() || !ips.iter().all(|ip| wildcard.contains(ip)))
        .map(|(name, _)| name)
        .collect()
}

async fn wordlist_hits(lookup: &dyn DnsLookup, domain: &str, concurrency: usize) -> Vec<(String, Vec<String>)> {
    stream::iter(WORDLIST)
        .map(|prefix| {
            let name = format!("{}.{}", prefix, domain);
            async move { lookup.ipv4(&name).await.map(|ips| (name, ips)) }
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|hit| async move { hit })
        .collect::<Vec<_>>()
        .boxed()
        .await
}

/// Addresses a random, surely-unregistered label resolves to. Wildcard DNS
/// would otherwise make every wordlist entry look real.
async fn wildcard_ips(lookup: &dyn DnsLookup, domain: &str) -> HashSet<String> {
    let label: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(16)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    lookup
        .ipv4(&format!("wr-{}.{}", label, domain))
        .await
        .map(|ips| ips.into_iter().collect())
        .unwrap_or_default()
}

/// HTTPS first, plain HTTP only when that fails. Hosts are addressed on the
/// target's port, so a non-default base URL carries over.
async fn check_liveness(ctx: &ProbeContext, name: &str) -> (bool, bool) {
    let primary = ctx.target.url_for_host(name, "/");
    let primary_is_https = primary.starts_with("https://");
    if ctx.client.head(&primary).send().await.is_ok() {
        return (primary_is_https, !primary_is_https);
    }
    if !primary_is_https {
        return (false, false);
    }
    let http = ctx.client.head(format!("http://{}/", name)).send().await.is_ok();
    (false, http)
}

/// Passive plus active discovery, capped at the configured ceiling, with
/// DNS and HTTP(S) status for each name.
pub async fn enumerate_subdomains(ctx: &ProbeContext) -> Result<Vec<SubdomainStatus>> {
    let domain = apex_domain(&ctx.target.domain).to_string();
    let resolver = SystemResolver::new(&ctx.config);

    let (passive, active) = tokio::join!(
        crtsh_subdomains(&ctx.client, &domain, ctx.config.max_body_bytes),
        wordlist_candidates(&resolver, &domain, ctx.config.dns_concurrency),
    );
    let passive = passive.unwrap_or_else(|e| {
        tracing::warn!(domain = %domain, error = %e, "certificate transparency lookup failed");
        Vec::new()
    });
    Ok(check_candidates(ctx, &resolver, &domain, passive, active).await)
}

/// Merge both candidate lists, cap them, and keep the names that resolve,
/// each with its HTTP(S) reachability. Sorted by name.
pub async fn check_candidates(
    ctx: &ProbeContext,
    lookup: &dyn DnsLookup,
    domain: &str,
    passive: Vec<String>,
    active: Vec<String>,
) -> Vec<SubdomainStatus> {
    let mut names: BTreeMap<String, SubdomainSource> = BTreeMap::new();
    for name in active {
        names.insert(name, SubdomainSource::Wordlist);
    }
    for name in passive {
        names.entry(name).or_insert(SubdomainSource::CertificateTransparency);
    }
    names.remove(domain);

    let capped: Vec<(String, SubdomainSource)> = names.into_iter().take(ctx.config.max_subdomains).collect();
    tracing::info!(domain = %domain, count = capped.len(), "checking subdomains");

    let statuses = stream::iter(capped)
        .map(|(name, source)| async move {
            let resolves = lookup.ipv4(&name).await.is_some();
            let (https, http) = if resolves { check_liveness(ctx, &name).await } else { (false, false) };
            SubdomainStatus { name, source, resolves, https, http }
        })
        .buffer_unordered(ctx.config.probe_concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

    let mut statuses: Vec<SubdomainStatus> = statuses.into_iter().filter(|s| s.resolves).collect();
    statuses.sort_by(|a, b| a.name.cmp(&b.name));
    statuses
}

pub fn analyze_subdomains(domain: &str, statuses: &[SubdomainStatus]) -> Vec<Finding> {
    let mut findings = Vec::new();

    for s in statuses.iter().filter(|s| s.resolves) {
        let url = format!("https://{}/", s.name);
        let details = FindingDetails::Subdomain {
            subdomains: vec![s.name.clone()],
            source: Some(format!("{:?}", s.source).to_ascii_lowercase()),
        };

        if !s.is_live() {
            findings.push(
                Finding::new(
                    Category::Dns,
                    Severity::Medium,
                    format!("Potential subdomain takeover: {}", s.name),
                    format!("{} resolves in DNS but serves nothing over HTTP or HTTPS; the resource behind it may be unclaimed.", s.name),
                )
                .with_url(url)
                .with_recommendation("Remove DNS records for decommissioned services or reclaim the resource they point to.")
                .with_details(details),
            );
            continue;
        }

        if !s.https {
            findings.push(
                Finding::new(
                    Category::Dns,
                    Severity::Medium,
                    format!("Subdomain without HTTPS: {}", s.name),
                    format!("{} only answers over plain HTTP.", s.name),
                )
                .with_url(format!("http://{}/", s.name))
                .with_recommendation("Serve every subdomain over HTTPS.")
                .with_details(details.clone()),
            );
        }

        if is_dangerous_name(&s.name, domain) {
            findings.push(
                Finding::new(
                    Category::Dns,
                    Severity::Medium,
                    format!("Sensitive subdomain exposed: {}", s.name),
                    format!("{} looks like a development, staging or administrative host and is publicly reachable.", s.name),
                )
                .with_url(url)
                .with_recommendation("Restrict non-production and administrative hosts to a VPN or IP allow-list.")
                .with_details(details),
            );
        }
    }

    let names: Vec<String> = statuses.iter().map(|s| s.name.clone()).collect();
    findings.push(
        Finding::new(
            Category::Dns,
            Severity::Info,
            format!("{} subdomains discovered", names.len()),
            format!("Certificate transparency and wordlist resolution found {} subdomains of {}.", names.len(), domain),
        )
        .with_details(FindingDetails::Subdomain { subdomains: names, source: None }),
    );
    findings
}
