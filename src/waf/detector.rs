use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;

use super::signatures::{WafSignature, SIGNATURES};
use crate::findings::{Category, Finding, FindingDetails, Severity};
use crate::http_client::send_capped;
use crate::probe::{Probe, ProbeContext};

const HEADER_WEIGHT: f32 = 0.3;
const SERVER_WEIGHT: f32 = 0.4;
const COOKIE_WEIGHT: f32 = 0.25;
const BODY_WEIGHT: f32 = 0.15;
const BLOCK_WEIGHT: f32 = 0.2;
const DETECTION_THRESHOLD: f32 = 0.3;

/// Requests that a protection layer is expected to refuse. All are GETs with
/// inert query strings.
pub const ACTIVE_PROBES: &[(&str, &str)] = &[
    ("script tag", "?q=%3Cscript%3Ealert(1)%3C%2Fscript%3E"),
    ("sql tautology", "?id=1%27%20OR%20%271%27%3D%271"),
    ("path traversal", "?file=..%2F..%2F..%2F..%2Fetc%2Fpasswd"),
];

const BLOCK_STATUSES: &[u16] = &[403, 406, 429, 503];

const BLOCK_PHRASES: &[&str] = &[
    "access denied",
    "request blocked",
    "has been blocked",
    "you have been blocked",
    "firewall",
    "security policy",
    "request rejected",
    "suspicious activity",
    "incident id",
    "attention required",
];

#[derive(Debug, Clone, PartialEq)]
pub struct WafMatch {
    pub provider: &'static str,
    pub confidence: f32,
    pub evidence: Vec<String>,
}

fn score_signature(sig: &WafSignature, headers: &HeaderMap, body: &str) -> (f32, Vec<String>) {
    let mut confidence: f32 = 0.0;
    let mut evidence = Vec::new();

    for (name, pattern) in sig.headers {
        if let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) {
            if value.to_ascii_lowercase().contains(&pattern.to_ascii_lowercase()) {
                confidence += HEADER_WEIGHT;
                evidence.push(format!("header {}: {}", name, value));
            }
        }
    }

    if let Some(server) = headers.get("server").and_then(|v| v.to_str().ok()) {
        let server_lower = server.to_ascii_lowercase();
        if sig.server_patterns.iter().any(|p| server_lower.contains(p)) {
            confidence += SERVER_WEIGHT;
            evidence.push(format!("server: {}", server));
        }
    }

    let cookies: Vec<&str> = headers
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    for pattern in sig.cookies {
        if cookies.iter().any(|c| c.contains(pattern)) {
            confidence += COOKIE_WEIGHT;
            evidence.push(format!("cookie {}", pattern));
        }
    }

    if confidence > 0.0 {
        for pattern in sig.body_patterns {
            if body.contains(pattern) {
                confidence += BODY_WEIGHT;
                evidence.push(format!("body contains '{}'", pattern));
            }
        }
    }

    (confidence.min(1.0), evidence)
}

/// Best passive match above the detection threshold.
pub fn detect_passive(headers: &HeaderMap, body: &str) -> Option<WafMatch> {
    SIGNATURES
        .iter()
        .map(|sig| {
            let (confidence, evidence) = score_signature(sig, headers, body);
            WafMatch { provider: sig.provider, confidence, evidence }
        })
        .filter(|m| m.confidence > DETECTION_THRESHOLD)
        .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal))
}

pub fn is_blocked_response(status: u16, body: &str) -> bool {
    if BLOCK_STATUSES.contains(&status) {
        return true;
    }
    let lower = body.to_ascii_lowercase();
    BLOCK_PHRASES.iter().any(|p| lower.contains(p))
}

pub struct WafProbe;

#[async_trait]
impl Probe for WafProbe {
    fn name(&self) -> &'static str {
        "waf"
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<Vec<Finding>> {
        let base = ctx.target.base_url.to_string();
        let max = ctx.config.max_body_bytes;
        let baseline = ctx.fetch(&base).await.with_context(|| format!("fetching {}", base))?;
        let passive = detect_passive(&baseline.headers, &baseline.body);

        // A baseline that already looks blocked makes active probing meaningless.
        let baseline_blocked = is_blocked_response(baseline.status, &baseline.body);

        let mut blocked_probes = Vec::new();
        if !baseline_blocked {
            let pacer = ctx.pacer();
            for (label, query) in ACTIVE_PROBES {
                let url = ctx.target.url(&format!("/{}", query));
                pacer.wait_url(&url).await;
                match send_capped(ctx.client.get(&url), max).await {
                    Ok(page) if is_blocked_response(page.status, &page.body) => {
                        tracing::debug!(probe = label, status = page.status, "request blocked");
                        blocked_probes.push(label.to_string());
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!(probe = label, error = %e, "waf probe request failed"),
                }
            }
        }

        Ok(vec![waf_finding(&base, passive, blocked_probes)])
    }
}

/// Fold passive and active evidence into the single WAF finding.
pub fn waf_finding(url: &str, passive: Option<WafMatch>, blocked_probes: Vec<String>) -> Finding {
    let (provider, mut confidence, evidence) = match passive {
        Some(m) => (Some(m.provider.to_string()), m.confidence, m.evidence),
        None => (None, 0.0, Vec::new()),
    };
    confidence = (confidence + BLOCK_WEIGHT * blocked_probes.len() as f32).min(1.0);

    let detected = provider.is_some() || !blocked_probes.is_empty();
    let details = FindingDetails::Waf {
        provider: provider.clone(),
        confidence,
        evidence,
        blocked_probes: blocked_probes.clone(),
    };

    if !detected {
        return Finding::new(
            Category::Informational,
            Severity::Medium,
            "No WAF or CDN detected",
            "No web application firewall or CDN fingerprint was found and suspicious requests were not blocked.",
        )
        .with_url(url)
        .with_recommendation("Place the site behind a WAF or CDN with managed rule sets.")
        .with_details(details);
    }

    let name = provider.unwrap_or_else(|| "unidentified WAF".to_string());
    Finding::new(
        Category::Informational,
        Severity::Info,
        format!("WAF/CDN detected: {}", name),
        format!(
            "Protection layer '{}' detected with confidence {:.0}%; {} of {} suspicious requests were blocked.",
            name,
            confidence * 100.0,
            blocked_probes.len(),
            ACTIVE_PROBES.len()
        ),
    )
    .with_url(url)
    .with_details(details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::probe::Target;
    use reqwest::header::{HeaderName, HeaderValue};
    use std::sync::Arc;
    use wiremock::matchers::{method, path, query_param, query_param_contains};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn local_context(server: &MockServer) -> ProbeContext {
        let target = Target::with_base_url("127.0.0.1", &format!("{}/", server.uri())).unwrap();
        ProbeContext::new(target, Arc::new(ScanConfig { request_delay_ms: 0, ..ScanConfig::default() })).unwrap()
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(HeaderName::from_bytes(k.as_bytes()).unwrap(), HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn cloudflare_is_recognised() {
        let h = headers(&[("server", "cloudflare"), ("cf-ray", "8a1b2c3d4e-AMS")]);
        let m = detect_passive(&h, "").unwrap();
        assert_eq!(m.provider, "Cloudflare");
        assert!(m.confidence > 0.6);
    }

    #[test]
    fn a_single_weak_signal_is_below_threshold() {
        let h = headers(&[("x-served-by", "cache-ams21")]);
        assert!(detect_passive(&h, "").is_none());
    }

    #[test]
    fn cookies_from_every_set_cookie_header_count() {
        let h = headers(&[("set-cookie", "a=1"), ("set-cookie", "incap_ses_123=x"), ("x-iinfo", "1-2-3")]);
        assert_eq!(detect_passive(&h, "").unwrap().provider, "Imperva Incapsula");
    }

    #[test]
    fn block_detection() {
        assert!(is_blocked_response(403, ""));
        assert!(is_blocked_response(200, "<h1>Request blocked by security policy</h1>"));
        assert!(!is_blocked_response(200, "<h1>Welcome</h1>"));
    }

    #[test]
    fn absence_of_protection_is_medium() {
        let f = waf_finding("https://example.com/", None, Vec::new());
        assert_eq!(f.severity, Severity::Medium);

        let f = waf_finding("https://example.com/", None, vec!["script tag".to_string()]);
        assert_eq!(f.severity, Severity::Info);
        assert!(f.title.contains("unidentified"));
    }

    #[tokio::test]
    async fn refused_attack_requests_count_as_protection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "<script>alert(1)</script>"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param_contains("id", "OR"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<h1>Request blocked</h1><p>Incident ID: 42</p>", "text/html"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<h1>Welcome</h1>", "text/html"))
            .mount(&server)
            .await;

        let findings = WafProbe.run(&local_context(&server)).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Info);
        assert_eq!(findings[0].title, "WAF/CDN detected: unidentified WAF");
        match &findings[0].details {
            FindingDetails::Waf { blocked_probes, provider, .. } => {
                assert_eq!(blocked_probes, &vec!["script tag".to_string(), "sql tautology".to_string()]);
                assert!(provider.is_none());
            }
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[tokio::test]
    async fn blocked_baseline_skips_attack_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Access denied"))
            .expect(1)
            .mount(&server)
            .await;

        let findings = WafProbe.run(&local_context(&server)).await.unwrap();
        assert_eq!(findings.len(), 1);
        server.verify().await;
    }

    #[tokio::test]
    async fn fingerprinted_cdn_is_named() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("server", "cloudflare")
                    .insert_header("cf-ray", "8a1b2c3d4e-AMS")
                    .set_body_string("ok"),
            )
            .mount(&server)
            .await;

        let findings = WafProbe.run(&local_context(&server)).await.unwrap();
        assert_eq!(findings[0].title, "WAF/CDN detected: Cloudflare");
    }
}
