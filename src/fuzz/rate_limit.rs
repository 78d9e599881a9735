use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::HeaderMap;

use crate::findings::{Category, Finding, FindingDetails, Severity};
use crate::probe::{Probe, ProbeContext};

pub const RATE_LIMIT_HEADERS: &[&str] = &[
    "x-ratelimit-limit",
    "x-ratelimit-remaining",
    "x-ratelimit-reset",
    "x-rate-limit-limit",
    "x-rate-limit-remaining",
    "ratelimit-limit",
    "ratelimit-remaining",
    "ratelimit-policy",
    "retry-after",
];

/// Login-like endpoints most worth protecting against brute force.
pub const AUTH_PATHS: &[&str] = &[
    "/login",
    "/api/login",
    "/auth/login",
    "/signin",
    "/wp-login.php",
    "/api/auth",
    "/user/login",
    "/account/login",
];

const MAX_AUTH_ENDPOINTS: usize = 3;

pub fn rate_limit_headers(headers: &HeaderMap) -> Vec<String> {
    RATE_LIMIT_HEADERS
        .iter()
        .filter(|h| headers.contains_key(**h))
        .map(|h| h.to_string())
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BurstOutcome {
    pub sent: usize,
    /// 1-based request number that drew a 429 or a refused connection.
    pub limited_at: Option<usize>,
    pub headers: Vec<String>,
}

impl BurstOutcome {
    pub fn limited(&self) -> bool {
        self.limited_at.is_some()
    }
}

/// Back-to-back GETs without pacing; stops at the first sign of limiting.
async fn burst(ctx: &ProbeContext, url: &str, count: usize) -> BurstOutcome {
    let mut outcome = BurstOutcome::default();
    for i in 1..=count {
        outcome.sent = i;
        match ctx.no_redirect_client.get(url).send().await {
            Ok(response) => {
                for h in rate_limit_headers(response.headers()) {
                    if !outcome.headers.contains(&h) {
                        outcome.headers.push(h);
                    }
                }
                if response.status().as_u16() == 429 {
                    outcome.limited_at = Some(i);
                    break;
                }
            }
            Err(e) if e.is_connect() => {
                outcome.limited_at = Some(i);
                break;
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "burst request failed");
            }
        }
    }
    outcome
}

fn details(endpoint: &str, outcome: &BurstOutcome) -> FindingDetails {
    FindingDetails::RateLimit {
        endpoint: endpoint.to_string(),
        requests_sent: outcome.sent,
        limited_at: outcome.limited_at,
        headers: outcome.headers.clone(),
    }
}

/// Findings for the root: advertised headers are noted, and a burst that
/// neither advertises nor enforces limits is flagged.
pub fn evaluate_root(url: &str, advertised: &[String], outcome: &BurstOutcome) -> Vec<Finding> {
    let mut findings = Vec::new();
    if !advertised.is_empty() {
        findings.push(
            Finding::new(
                Category::Informational,
                Severity::Info,
                "Rate limiting headers present",
                format!("The site advertises request limits ({}).", advertised.join(", ")),
            )
            .with_url(url)
            .with_details(details(url, outcome)),
        );
    }
    if !outcome.limited() && advertised.is_empty() && outcome.headers.is_empty() {
        findings.push(
            Finding::new(
                Category::Vulnerability,
                Severity::Low,
                "No rate limiting detected",
                format!("{} rapid requests to the site root were all served without throttling or rate-limit headers.", outcome.sent),
            )
            .with_url(url)
            .with_recommendation("Apply per-client request limits at the edge or application layer.")
            .with_details(details(url, outcome)),
        );
    }
    findings
}

pub fn evaluate_auth_endpoint(path: &str, url: &str, outcome: &BurstOutcome) -> Finding {
    match outcome.limited_at {
        Some(at) => Finding::new(
            Category::Informational,
            Severity::Info,
            format!("Rate limiting enforced on {}", path),
            format!("Requests to {} were throttled after {} attempts.", path, at),
        )
        .with_url(url)
        .with_details(details(path, outcome)),
        None => Finding::new(
            Category::Vulnerability,
            Severity::Medium,
            format!("No rate limiting on authentication endpoint {}", path),
            format!("{} rapid requests to {} were all accepted, leaving it open to credential stuffing.", outcome.sent, path),
        )
        .with_url(url)
        .with_recommendation("Throttle authentication attempts per account and per client, and add lockout or CAPTCHA after repeated failures.")
        .with_details(details(path, outcome)),
    }
}

pub struct RateLimitProbe;

#[async_trait]
impl Probe for RateLimitProbe {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<Vec<Finding>> {
        let root = ctx.target.base_url.to_string();
        let burst_size = ctx.config.rate_limit_burst;

        let first = ctx.no_redirect_client.get(&root).send().await?;
        let advertised = rate_limit_headers(first.headers());
        let outcome = burst(ctx, &root, burst_size).await;
        tracing::debug!(sent = outcome.sent, limited_at = ?outcome.limited_at, "root burst finished");
        let mut findings = evaluate_root(&root, &advertised, &outcome);

        let pacer = ctx.pacer();
        let mut tested = 0;
        for path in AUTH_PATHS {
            if tested >= MAX_AUTH_ENDPOINTS {
                break;
            }
            let url = ctx.target.url(path);
            pacer.wait_url(&url).await;
            let exists = match ctx.no_redirect_client.get(&url).send().await {
                Ok(r) => !matches!(r.status().as_u16(), 404 | 410),
                Err(_) => false,
            };
            if !exists {
                continue;
            }
            tested += 1;
            let outcome = burst(ctx, &url, burst_size).await;
            findings.push(evaluate_auth_endpoint(path, &url, &outcome));
        }
        Ok(findings)
    }
}
