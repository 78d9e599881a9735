use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;

use crate::findings::{Category, Finding, FindingDetails, Severity};
use crate::http_client::send_capped;
use crate::probe::{Probe, ProbeContext};

/// Unique, unresolvable host used as the forged value.
pub fn forged_host() -> String {
    let tag: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(10)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("wr-{}.invalid", tag)
}

/// (header, value) pairs replayed against the root.
pub fn injection_variants(domain: &str, marker: &str) -> Vec<(&'static str, String)> {
    vec![
        ("Host", marker.to_string()),
        ("X-Forwarded-Host", marker.to_string()),
        ("Host", format!("{}@{}", domain, marker)),
    ]
}

/// Where the forged host came back, if anywhere. A redirect is worse than a
/// body reflection because it sends users off-site.
pub fn classify_reflection(marker: &str, location: Option<&str>, body: &str) -> Option<(Severity, &'static str)> {
    if location.is_some_and(|l| l.contains(marker)) {
        return Some((Severity::High, "location"));
    }
    if body.contains(marker) {
        return Some((Severity::Medium, "body"));
    }
    None
}

pub struct HostHeaderProbe;

#[async_trait]
impl Probe for HostHeaderProbe {
    fn name(&self) -> &'static str {
        "host_header"
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<Vec<Finding>> {
        let marker = forged_host();
        let url = ctx.target.base_url.to_string();
        let pacer = ctx.pacer();
        let mut findings = Vec::new();

        for (header, value) in injection_variants(&ctx.target.domain, &marker) {
            pacer.wait_url(&url).await;
            let request = ctx.no_redirect_client.get(&url).header(header, &value);
            let page = match send_capped(request, ctx.config.max_body_bytes).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::debug!(header, error = %e, "forged host request failed");
                    continue;
                }
            };

            let Some((severity, reflected_in)) = classify_reflection(&marker, page.header("location"), &page.body) else {
                continue;
            };
            let (title, description) = if reflected_in == "location" {
                (
                    format!("Host header injection via {} (redirect)", header),
                    format!("A forged {} value is used to build the redirect target, enabling cache poisoning and password-reset link hijacking.", header),
                )
            } else {
                (
                    format!("Host header reflected via {}", header),
                    format!("A forged {} value is echoed into the page body, so generated links can point at an attacker host.", header),
                )
            };
            findings.push(
                Finding::new(Category::Vulnerability, severity, title, description)
                    .with_url(url.clone())
                    .with_recommendation("Build absolute URLs from a configured canonical host and ignore Host/X-Forwarded-Host values not on an allow-list.")
                    .with_details(FindingDetails::HostHeader {
                        header: header.to_string(),
                        injected_value: value,
                        reflected_in: reflected_in.to_string(),
                    }),
            );
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
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    #[test]
    fn reflection_classes() {
        let m = "wr-abc.invalid";
        assert_eq!(classify_reflection(m, Some("https://wr-abc.invalid/login"), ""), Some((Severity::High, "location")));
        assert_eq!(classify_reflection(m, None, "<a href=\"https://wr-abc.invalid/\">"), Some((Severity::Medium, "body")));
        assert_eq!(classify_reflection(m, Some("https://example.com/"), "<p>hi</p>"), None);
    }

    #[test]
    fn markers_are_unique() {
        let a = forged_host();
        assert!(a.starts_with("wr-") && a.ends_with(".invalid"));
        assert_ne!(a, forged_host());
        let variants = injection_variants("example.com", &a);
        assert_eq!(variants[2].1, format!("example.com@{}", a));
    }

    struct EchoForwardedHost;

    impl Respond for EchoForwardedHost {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            match request.headers.get("x-forwarded-host").and_then(|v| v.to_str().ok()) {
                Some(host) => ResponseTemplate::new(302).insert_header("location", format!("https://{}/home", host).as_str()),
                None => ResponseTemplate::new(200).set_body_string("<p>home</p>"),
            }
        }
    }

    #[tokio::test]
    async fn forwarded_host_redirect_is_high() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(EchoForwardedHost).mount(&server).await;

        let config = ScanConfig { request_delay_ms: 0, ..ScanConfig::default() };
        let target = Target::with_base_url("127.0.0.1", &format!("{}/", server.uri())).unwrap();
        let ctx = ProbeContext::new(target, Arc::new(config)).unwrap();

        let findings = HostHeaderProbe.run(&ctx).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
        match &findings[0].details {
            FindingDetails::HostHeader { header, reflected_in, .. } => {
                assert_eq!(header, "X-Forwarded-Host");
                assert_eq!(reflected_in, "location");
            }
            other => panic!("unexpected details {:?}", other),
        }
    }
}
