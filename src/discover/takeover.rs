use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::dns::{DnsLookup, SystemResolver};
use crate::findings::{Category, Finding, FindingDetails, Severity};
use crate::probe::{Probe, ProbeContext};

/// Third-party host that can be claimed by anyone once the customer
/// resource behind a CNAME is deleted.
#[derive(Debug)]
pub struct TakeoverProvider {
    pub name: &'static str,
    pub cname_patterns: &'static [&'static str],
    /// Body fragments the provider serves for an unclaimed resource.
    pub signatures: &'static [&'static str],
    /// A CNAME into this provider that no longer answers is itself claimable.
    pub dead_host_vulnerable: bool,
}

pub const PROVIDERS: &[TakeoverProvider] = &[
    TakeoverProvider { name: "AWS S3", cname_patterns: &[".s3.amazonaws.com", ".s3-website-", ".s3-website."], signatures: &["NoSuchBucket", "The specified bucket does not exist"], dead_host_vulnerable: false },
    TakeoverProvider { name: "GitHub Pages", cname_patterns: &[".github.io"], signatures: &["There isn't a GitHub Pages site here", "For root URLs (like http://example.com/) you must provide an index.html file"], dead_host_vulnerable: false },
    TakeoverProvider { name: "Heroku", cname_patterns: &[".herokuapp.com", ".herokudns.com"], signatures: &["No such app", "herokucdn.com/error-pages/no-such-app.html"], dead_host_vulnerable: false },
    TakeoverProvider { name: "Azure", cname_patterns: &[".azurewebsites.net", ".cloudapp.net", ".cloudapp.azure.com", ".trafficmanager.net", ".blob.core.windows.net"], signatures: &["404 Web Site not found", "The resource you are looking for has been removed"], dead_host_vulnerable: true },
    TakeoverProvider { name: "Netlify", cname_patterns: &[".netlify.app", ".netlify.com"], signatures: &["Not Found - Request ID"], dead_host_vulnerable: false },
    TakeoverProvider { name: "Vercel", cname_patterns: &[".vercel.app", ".now.sh"], signatures: &["The deployment could not be found", "DEPLOYMENT_NOT_FOUND"], dead_host_vulnerable: false },
    TakeoverProvider { name: "Shopify", cname_patterns: &[".myshopify.com"], signatures: &["Sorry, this shop is currently unavailable", "Only one step left!"], dead_host_vulnerable: false },
    TakeoverProvider { name: "Fastly", cname_patterns: &[".fastly.net"], signatures: &["Fastly error: unknown domain"], dead_host_vulnerable: false },
    TakeoverProvider { name: "Pantheon", cname_patterns: &[".pantheonsite.io"], signatures: &["The gods are wise, but do not know of the site which you seek"], dead_host_vulnerable: false },
    TakeoverProvider { name: "Surge.sh", cname_patterns: &[".surge.sh"], signatures: &["project not found"], dead_host_vulnerable: false },
    TakeoverProvider { name: "Bitbucket", cname_patterns: &[".bitbucket.io"], signatures: &["Repository not found"], dead_host_vulnerable: false },
    TakeoverProvider { name: "Ghost", cname_patterns: &[".ghost.io"], signatures: &["The thing you were looking for is no longer here"], dead_host_vulnerable: false },
    TakeoverProvider { name: "Zendesk", cname_patterns: &[".zendesk.com"], signatures: &["Help Center Closed"], dead_host_vulnerable: false },
    TakeoverProvider { name: "Tumblr", cname_patterns: &[".tumblr.com"], signatures: &["Whatever you were looking for doesn't currently exist at this address"], dead_host_vulnerable: false },
    TakeoverProvider { name: "WordPress.com", cname_patterns: &[".wordpress.com"], signatures: &["Do you want to register"], dead_host_vulnerable: false },
];

pub fn match_provider(cname: &str) -> Option<&'static TakeoverProvider> {
    let cname = cname.trim_end_matches('.').to_ascii_lowercase();
    PROVIDERS.iter().find(|p| {
        p.cname_patterns
            .iter()
            .any(|pattern| {
                // Patterns ending in a separator are infixes (regional S3 endpoints).
                if pattern.ends_with('-') || pattern.ends_with('.') {
                    cname.contains(pattern)
                } else {
                    cname.ends_with(pattern)
                }
            })
    })
}

/// Verdict for a host whose CNAME points at `provider`. `body` is `None` when
/// the host could not be fetched at all.
pub fn assess(hostname: &str, cname: &str, provider: &TakeoverProvider, body: Option<&str>) -> Option<Finding> {
    let (severity, signature, description) = match body {
        Some(body) => {
            let hit = provider.signatures.iter().find(|s| body.contains(*s))?;
            (
                Severity::Critical,
                Some(hit.to_string()),
                format!("{} points to {} ({}), which answers with an unclaimed-resource page.", hostname, provider.name, cname),
            )
        }
        None if provider.dead_host_vulnerable => (
            Severity::High,
            None,
            format!("{} points to {} ({}), which no longer answers; the name may be claimable.", hostname, provider.name, cname),
        ),
        None => return None,
    };

    Some(
        Finding::new(Category::Dns, severity, format!("Subdomain takeover: {}", hostname), description)
            .with_url(format!("https://{}/", hostname))
            .with_recommendation(format!("Remove the CNAME to {} or reclaim the resource on {}.", cname, provider.name))
            .with_details(FindingDetails::Takeover {
                hostname: hostname.to_string(),
                cname: cname.to_string(),
                provider: provider.name.to_string(),
                signature,
            }),
    )
}

pub struct TakeoverProbe;

#[async_trait]
impl Probe for TakeoverProbe {
    fn name(&self) -> &'static str {
        "takeover"
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<Vec<Finding>> {
        let resolver = SystemResolver::new(&ctx.config);
        let mut hosts = vec![ctx.target.domain.clone()];
        hosts.extend(ctx.subdomains.iter().filter(|s| **s != ctx.target.domain).cloned());
        hosts.truncate(ctx.config.max_subdomains + 1);
        Ok(check_hosts(ctx, &resolver, hosts).await)
    }
}

/// Follow each host's CNAMEs into known providers and fetch the host to see
/// whether the provider serves its unclaimed-resource page.
pub async fn check_hosts(ctx: &ProbeContext, lookup: &dyn DnsLookup, hosts: Vec<String>) -> Vec<Finding> {
    let max = ctx.config.max_body_bytes;
    let findings = stream::iter(hosts)
        .map(|host| async move {
            let mut out = Vec::new();
            for cname in lookup.cname(&host).await {
                let Some(provider) = match_provider(&cname) else { continue };
                tracing::debug!(host = %host, cname = %cname, provider = provider.name, "third-party CNAME");
                let url = ctx.target.url_for_host(&host, "/");
                let body = match crate::http_client::fetch(&ctx.client, &url, max).await {
                    Ok(page) => Some(page.body),
                    Err(_) => None,
                };
                if let Some(f) = assess(&host, &cname, provider, body.as_deref()) {
                    out.push(f);
                }
            }
            out
        })
        .buffer_unordered(ctx.config.dns_concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

    findings.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::dns::StaticLookup;
    use crate::probe::Target;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn provider_matching() {
        assert_eq!(match_provider("assets.s3.amazonaws.com").unwrap().name, "AWS S3");
        assert_eq!(match_provider("bucket.s3-website-eu-west-1.amazonaws.com.").unwrap().name, "AWS S3");
        assert_eq!(match_provider("acme.github.io").unwrap().name, "GitHub Pages");
        assert!(match_provider("lb.example.net").is_none());
    }

    #[test]
    fn signature_match_is_critical() {
        let s3 = match_provider("x.s3.amazonaws.com").unwrap();
        let f = assess("files.example.com", "x.s3.amazonaws.com", s3, Some("<Code>NoSuchBucket</Code>")).unwrap();
        assert_eq!(f.severity, Severity::Critical);
        assert!(assess("files.example.com", "x.s3.amazonaws.com", s3, Some("<html>ok</html>")).is_none());
        assert!(assess("files.example.com", "x.s3.amazonaws.com", s3, None).is_none());
    }

    #[test]
    fn dead_azure_host_is_high() {
        let azure = match_provider("app.azurewebsites.net").unwrap();
        assert_eq!(assess("app.example.com", "app.azurewebsites.net", azure, None).unwrap().severity, Severity::High);
    }

    fn local_context(server: &MockServer, hosts: &[(&str, &str)]) -> ProbeContext {
        let target = Target::with_base_url("shop.test", &format!("{}/", server.uri())).unwrap();
        let config = ScanConfig { request_delay_ms: 0, ..ScanConfig::default() };
        let mut ctx = ProbeContext::new(target, Arc::new(config)).unwrap();
        let mut builder = reqwest::Client::builder().no_proxy();
        for (host, ip) in hosts {
            let addr: SocketAddr = format!("{}:0", ip).parse().unwrap();
            builder = builder.resolve(host, addr);
        }
        ctx.client = builder.build().unwrap();
        ctx
    }

    #[tokio::test]
    async fn unclaimed_bucket_page_is_critical() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_raw(
                "<Error><Code>NoSuchBucket</Code><Message>The specified bucket does not exist</Message></Error>",
                "application/xml",
            ))
            .mount(&server)
            .await;
        let ctx = local_context(&server, &[("files.shop.test", "127.0.0.1"), ("app.shop.test", "127.0.0.2")]);
        let lookup = StaticLookup::default()
            .with("CNAME", "files.shop.test", &["shop-assets.s3.amazonaws.com"])
            .with("CNAME", "app.shop.test", &["shop-app.azurewebsites.net"])
            .with("CNAME", "www.shop.test", &["lb.hosting.test"]);
        let hosts = vec!["files.shop.test".to_string(), "app.shop.test".to_string(), "www.shop.test".to_string()];

        let mut findings = check_hosts(&ctx, &lookup, hosts).await;
        findings.sort_by(|a, b| a.title.cmp(&b.title));
        let summary: Vec<(&str, Severity)> = findings.iter().map(|f| (f.title.as_str(), f.severity)).collect();
        assert_eq!(
            summary,
            vec![
                ("Subdomain takeover: app.shop.test", Severity::High),
                ("Subdomain takeover: files.shop.test", Severity::Critical),
            ]
        );
    }

    #[tokio::test]
    async fn claimed_resource_is_not_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html>our storefront</html>", "text/html"))
            .mount(&server)
            .await;
        let ctx = local_context(&server, &[("files.shop.test", "127.0.0.1")]);
        let lookup = StaticLookup::default().with("CNAME", "files.shop.test", &["shop-assets.s3.amazonaws.com"]);

        let findings = check_hosts(&ctx, &lookup, vec!["files.shop.test".to_string()]).await;
        assert!(findings.is_empty());
    }
}
