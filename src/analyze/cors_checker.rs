use anyhow::Result;
use async_trait::async_trait;

use crate::findings::{Category, Finding, FindingDetails, Severity};
use crate::probe::{Probe, ProbeContext};

/// How much an origin should be trusted by the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginTrust {
    /// Attacker-controlled: any reflection is exploitable.
    Untrusted,
    /// Same registrable domain or a scheme downgrade: only risky with credentials.
    Related,
}

#[derive(Debug, Clone)]
pub struct CraftedOrigin {
    pub label: &'static str,
    pub origin: String,
    pub trust: OriginTrust,
}

pub fn crafted_origins(domain: &str) -> Vec<CraftedOrigin> {
    vec![
        CraftedOrigin { label: "arbitrary origin", origin: "https://evil-webrecon.example".to_string(), trust: OriginTrust::Untrusted },
        CraftedOrigin { label: "null origin", origin: "null".to_string(), trust: OriginTrust::Untrusted },
        CraftedOrigin { label: "suffix-matched origin", origin: format!("https://{}.attacker-example.com", domain), trust: OriginTrust::Untrusted },
        CraftedOrigin { label: "sibling subdomain", origin: format!("https://untrusted.{}", domain), trust: OriginTrust::Related },
        CraftedOrigin { label: "scheme downgrade", origin: format!("http://{}", domain), trust: OriginTrust::Related },
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorsVerdict {
    pub severity: Severity,
    pub title: String,
    pub description: String,
    /// Further origins tell nothing new for this URL.
    pub stop: bool,
}

/// Classify one CORS response to a request carrying `sent.origin`.
pub fn classify_cors(sent: &CraftedOrigin, allow_origin: Option<&str>, allow_credentials: bool) -> Option<CorsVerdict> {
    let allow_origin = allow_origin?.trim();

    if allow_origin == "*" {
        return Some(if allow_credentials {
            CorsVerdict {
                severity: Severity::Critical,
                title: "CORS wildcard origin with credentials".to_string(),
                description: "Access-Control-Allow-Origin is '*' while Access-Control-Allow-Credentials is true.".to_string(),
                stop: true,
            }
        } else {
            CorsVerdict {
                severity: Severity::Medium,
                title: "CORS allows any origin".to_string(),
                description: "Access-Control-Allow-Origin is '*', so any website can read these responses.".to_string(),
                stop: true,
            }
        });
    }

    if allow_origin != sent.origin {
        return None;
    }

    let verdict = match (sent.trust, allow_credentials) {
        (OriginTrust::Untrusted, true) => CorsVerdict {
            severity: Severity::Critical,
            title: "CORS reflects untrusted origin with credentials".to_string(),
            description: format!(
                "The {} '{}' is reflected with credentials allowed; any site can make authenticated reads.",
                sent.label, sent.origin
            ),
            stop: false,
        },
        (OriginTrust::Untrusted, false) => CorsVerdict {
            severity: Severity::High,
            title: "CORS reflects untrusted origin".to_string(),
            description: format!("The {} '{}' is reflected in Access-Control-Allow-Origin.", sent.label, sent.origin),
            stop: false,
        },
        (OriginTrust::Related, true) => CorsVerdict {
            severity: Severity::Medium,
            title: format!("CORS trusts {} with credentials", sent.label),
            description: format!(
                "The {} '{}' is trusted with credentials; a compromised or insecure origin could read authenticated data.",
                sent.label, sent.origin
            ),
            stop: false,
        },
        (OriginTrust::Related, false) => return None,
    };
    Some(verdict)
}

pub struct CorsProbe;

#[async_trait]
impl Probe for CorsProbe {
    fn name(&self) -> &'static str {
        "cors"
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<Vec<Finding>> {
        let pacer = ctx.pacer();
        let origins = crafted_origins(&ctx.target.domain);
        let mut findings = Vec::new();

        for path in &ctx.config.cors_paths {
            let url = ctx.target.url(path);
            for sent in &origins {
                pacer.wait_url(&url).await;
                let resp = match ctx.client.get(&url).header("Origin", &sent.origin).send().await {
                    Ok(resp) => resp,
                    Err(e) => {
                        tracing::debug!(url = %url, error = %e, "cors request failed");
                        break;
                    }
                };
                let headers = resp.headers();
                let allow_origin = headers
                    .get("access-control-allow-origin")
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.to_string());
                let allow_credentials = headers
                    .get("access-control-allow-credentials")
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.trim().eq_ignore_ascii_case("true"))
                    .unwrap_or(false);

                if let Some(verdict) = classify_cors(sent, allow_origin.as_deref(), allow_credentials) {
                    let stop = verdict.stop;
                    findings.push(
                        Finding::new(Category::Cors, verdict.severity, verdict.title, verdict.description)
                            .with_url(url.clone())
                            .with_recommendation("Validate Origin against an explicit allow-list and never combine wildcards or reflected origins with credentials.")
                            .with_details(FindingDetails::Cors {
                                origin_sent: sent.origin.clone(),
                                allow_origin,
                                allow_credentials,
                            }),
                    );
                    if stop {
                        break;
                    }
                }
            }
        }

        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::probe::Target;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn origin(trust: OriginTrust) -> CraftedOrigin {
        CraftedOrigin { label: "test", origin: "https://evil.test".to_string(), trust }
    }

    #[test]
    fn classification_table() {
        let untrusted = origin(OriginTrust::Untrusted);
        let related = origin(OriginTrust::Related);

        assert_eq!(classify_cors(&untrusted, Some("*"), true).unwrap().severity, Severity::Critical);
        assert_eq!(classify_cors(&untrusted, Some("*"), false).unwrap().severity, Severity::Medium);
        assert_eq!(classify_cors(&untrusted, Some("https://evil.test"), true).unwrap().severity, Severity::Critical);
        assert_eq!(classify_cors(&untrusted, Some("https://evil.test"), false).unwrap().severity, Severity::High);
        assert_eq!(classify_cors(&related, Some("https://evil.test"), true).unwrap().severity, Severity::Medium);
        assert!(classify_cors(&related, Some("https://evil.test"), false).is_none());
        assert!(classify_cors(&untrusted, Some("https://example.com"), true).is_none());
        assert!(classify_cors(&untrusted, None, true).is_none());
    }

    #[tokio::test]
    async fn wildcard_with_credentials_reports_once_and_stops() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("access-control-allow-origin", "*")
                    .insert_header("access-control-allow-credentials", "true"),
            )
            .mount(&server)
            .await;

        let config = ScanConfig {
            cors_paths: vec!["/".to_string()],
            request_delay_ms: 0,
            ..ScanConfig::default()
        };
        let target = Target::with_base_url("127.0.0.1", &format!("{}/", server.uri())).unwrap();
        let ctx = ProbeContext::new(target, Arc::new(config)).unwrap();

        let findings = CorsProbe.run(&ctx).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
    }
}
