use ahash::AHashSet;
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::{BTreeSet, VecDeque};
use url::Url;

use crate::findings::{Category, Finding, FindingDetails, Severity};
use crate::probe::ProbeContext;
use crate::utils::url_in_scope;

const ASSET_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".webp", ".bmp", ".css", ".js", ".mjs", ".map", ".woff", ".woff2",
    ".ttf", ".eot", ".otf", ".pdf", ".zip", ".gz", ".tar", ".rar", ".7z", ".mp4", ".mp3", ".webm", ".avi", ".mov",
    ".xml", ".json", ".txt", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx",
];

const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "msclkid", "mc_cid", "mc_eid", "_ga", "_gl", "yclid"];

const SENSITIVE_ROBOTS_KEYWORDS: &[&str] = &[
    "admin", "backup", "config", "private", "internal", "secret", ".git", ".env", "phpmyadmin", "wp-admin", "cgi-bin",
    "database", "sql", "logs", "staging", "debug",
];

static LOC: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<loc>\s*([^<\s]+)\s*</loc>").unwrap());
static SCRIPT_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r#"["'`](/[A-Za-z0-9_\-./]+(?:\?[A-Za-z0-9_\-=&%.]*)?)["'`]"#).unwrap());

#[derive(Debug, Default)]
pub struct CrawlResult {
    pub urls: BTreeSet<String>,
    pub findings: Vec<Finding>,
}

/// Canonical form of a link found on `base`: absolute, no fragment, no
/// tracking parameters, no trailing slash except on the root path.
pub fn normalize_url(raw: &str, base: &Url) -> Option<String> {
    let raw = raw.trim();
    let lower = raw.to_ascii_lowercase();
    if raw.is_empty()
        || raw.starts_with('#')
        || ["mailto:", "javascript:", "tel:", "data:", "sms:"].iter().any(|p| lower.starts_with(p))
    {
        return None;
    }

    let mut url = base.join(raw).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_ascii_lowercase();
            !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
        if url.path().is_empty() {
            url.set_path("/");
        }
    }
    Some(url.to_string())
}

pub fn is_asset(url: &str) -> bool {
    let path = Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    ASSET_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Link candidates on an HTML page: anchors, alternates, form actions and
/// path literals inside inline scripts. Raw values, not yet normalized.
pub fn extract_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let anchor = Selector::parse("a[href]").unwrap();
    let alternate = Selector::parse(r#"link[rel="alternate"][href]"#).unwrap();
    let form = Selector::parse("form[action]").unwrap();
    let script_sel = Selector::parse("script").unwrap();
    let mut out = Vec::new();

    for el in document.select(&anchor).chain(document.select(&alternate)) {
        if let Some(href) = el.value().attr("href") {
            out.push(href.to_string());
        }
    }
    for el in document.select(&form) {
        if let Some(action) = el.value().attr("action") {
            out.push(action.to_string());
        }
    }
    for script in document.select(&script_sel) {
        if script.value().attr("src").is_some() {
            continue;
        }
        let text: String = script.text().collect();
        for cap in SCRIPT_PATH.captures_iter(&text) {
            let path = &cap[1];
            if !path.starts_with("//") {
                out.push(path.to_string());
            }
        }
    }
    out
}

/// Absolute URLs of external scripts referenced by a page.
pub fn extract_script_sources(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let script = Selector::parse("script[src]").unwrap();
    document
        .select(&script)
        .filter_map(|s| s.value().attr("src"))
        .filter_map(|src| base.join(src).ok())
        .filter(|u| u.scheme() == "http" || u.scheme() == "https")
        .map(|u| u.to_string())
        .collect()
}

#[derive(Debug, Default, PartialEq)]
pub struct Robots {
    pub disallow: Vec<String>,
    pub sitemaps: Vec<String>,
}

pub fn parse_robots(body: &str) -> Robots {
    let mut robots = Robots::default();
    for line in body.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        let Some((key, value)) = line.split_once(':') else { continue };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "disallow" if !value.is_empty() && value != "/" => {
                let path = value.trim_end_matches('$').split('*').next().unwrap_or("");
                if path.starts_with('/') && path.len() > 1 && !robots.disallow.iter().any(|p| p == path) {
                    robots.disallow.push(path.to_string());
                }
            }
            "sitemap" if !value.is_empty() => robots.sitemaps.push(value.to_string()),
            _ => {}
        }
    }
    robots
}

/// `<loc>` entries of a sitemap, and whether the document is a sitemap index.
pub fn parse_sitemap(body: &str) -> (Vec<String>, bool) {
    let locs = LOC.captures_iter(body).map(|c| c[1].to_string()).collect();
    (locs, body.contains("<sitemapindex"))
}

pub fn sensitive_disallows(disallow: &[String]) -> Vec<String> {
    disallow
        .iter()
        .filter(|p| {
            let lower = p.to_ascii_lowercase();
            SENSITIVE_ROBOTS_KEYWORDS.iter().any(|k| lower.contains(k))
        })
        .cloned()
        .collect()
}

struct Frontier<'a> {
    domain: &'a str,
    ceiling: usize,
    discovered: BTreeSet<String>,
    queued: AHashSet<String>,
    queue: VecDeque<String>,
}

impl<'a> Frontier<'a> {
    /// Admit a normalized URL if it is in scope, not an asset and the ceiling
    /// has not been reached.
    fn admit(&mut self, url: String) -> bool {
        if self.discovered.len() >= self.ceiling || self.queued.contains(&url) || is_asset(&url) {
            return false;
        }
        if !url_in_scope(&url, self.domain) {
            return false;
        }
        self.queued.insert(url.clone());
        self.discovered.insert(url.clone());
        self.queue.push_back(url);
        true
    }
}

/// Page URLs listed by the given sitemaps. Sitemaps hosted outside the
/// target's scope are never fetched.
async fn sitemap_seeds(ctx: &ProbeContext, roots: Vec<String>) -> Vec<String> {
    let pacer = ctx.pacer();
    let domain = ctx.target.domain.as_str();
    let mut pages = Vec::new();
    let mut nested = Vec::new();

    for sitemap in roots.into_iter().filter(|s| url_in_scope(s, domain)) {
        pacer.wait_url(&sitemap).await;
        let Ok(page) = ctx.fetch(&sitemap).await else { continue };
        if page.status != 200 {
            continue;
        }
        let (locs, is_index) = parse_sitemap(&page.body);
        for loc in locs {
            if is_index || loc.to_ascii_lowercase().ends_with(".xml") {
                nested.push(loc);
            } else {
                pages.push(loc);
            }
        }
    }

    // one level of nesting only
    for sitemap in nested.into_iter().filter(|s| url_in_scope(s, domain)).take(10) {
        pacer.wait_url(&sitemap).await;
        let Ok(page) = ctx.fetch(&sitemap).await else { continue };
        if page.status == 200 {
            let (locs, _) = parse_sitemap(&page.body);
            pages.extend(locs.into_iter().filter(|l| !l.to_ascii_lowercase().ends_with(".xml")));
        }
    }
    pages
}

/// Bounded breadth-first crawl of the target and its subdomains.
pub async fn crawl(ctx: &ProbeContext) -> Result<CrawlResult> {
    let base = ctx.target.base_url.clone();
    let pacer = ctx.pacer();
    let mut frontier = Frontier {
        domain: &ctx.target.domain,
        ceiling: ctx.config.max_pages.max(1),
        discovered: BTreeSet::new(),
        queued: AHashSet::new(),
        queue: VecDeque::new(),
    };
    let mut findings = Vec::new();

    if let Some(root) = normalize_url("/", &base) {
        frontier.admit(root);
    }

    let robots_url = ctx.target.url("/robots.txt");
    let robots = match ctx.fetch(&robots_url).await {
        Ok(page) if page.status == 200 && !page.is_html() => parse_robots(&page.body),
        _ => Robots::default(),
    };

    let sensitive = sensitive_disallows(&robots.disallow);
    if !sensitive.is_empty() {
        findings.push(
            Finding::new(
                Category::Informational,
                Severity::Low,
                "robots.txt reveals sensitive paths",
                format!("robots.txt lists paths that hint at sensitive areas: {}", sensitive.join(", ")),
            )
            .with_url(robots_url.clone())
            .with_recommendation("Protect sensitive areas with authentication instead of hiding them in robots.txt.")
            .with_details(FindingDetails::Crawl { pages: 0, paths: sensitive }),
        );
    }

    let mut sitemaps = vec![ctx.target.url("/sitemap.xml")];
    sitemaps.extend(robots.sitemaps.iter().cloned());
    sitemaps.dedup();
    for loc in sitemap_seeds(ctx, sitemaps).await {
        if let Some(url) = normalize_url(&loc, &base) {
            frontier.admit(url);
        }
    }
    for path in &robots.disallow {
        if let Some(url) = normalize_url(path, &base) {
            frontier.admit(url);
        }
    }

    let mut fetched = 0usize;
    while let Some(url) = frontier.queue.pop_front() {
        if fetched >= frontier.ceiling {
            break;
        }
        pacer.wait_url(&url).await;
        fetched += 1;

        let page = match ctx.fetch(&url).await {
            Ok(page) => page,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "crawl fetch failed");
                continue;
            }
        };
        if page.status == 404 || page.status == 410 {
            frontier.discovered.remove(&url);
            continue;
        }
        if !page.is_html() {
            continue;
        }

        let page_base = Url::parse(&page.url).unwrap_or_else(|_| base.clone());
        for link in extract_links(&page.body) {
            if let Some(normalized) = normalize_url(&link, &page_base) {
                frontier.admit(normalized);
            }
        }
    }

    let urls = frontier.discovered;
    tracing::info!(domain = %ctx.target.domain, pages = fetched, urls = urls.len(), "crawl finished");

    let paths: Vec<String> = urls
        .iter()
        .filter_map(|u| Url::parse(u).ok().map(|u| u.path().to_string()))
        .take(25)
        .collect();
    findings.push(
        Finding::new(
            Category::Informational,
            Severity::Info,
            format!("Crawled {} pages", fetched),
            format!("Discovered {} in-scope URLs.", urls.len()),
        )
        .with_url(base.to_string())
        .with_details(FindingDetails::Crawl { pages: fetched, paths }),
    );

    Ok(CrawlResult { urls, findings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::probe::Target;
    use std::sync::Arc;
    use wiremock::matchers::{any, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn base() -> Url {
        Url::parse("https://example.com/blog/").unwrap()
    }

    #[test]
    fn normalization() {
        let b = base();
        assert_eq!(normalize_url("/about/#team", &b).unwrap(), "https://example.com/about");
        assert_eq!(normalize_url("post?utm_source=x&id=4&fbclid=z", &b).unwrap(), "https://example.com/blog/post?id=4");
        assert_eq!(normalize_url("https://example.com/", &b).unwrap(), "https://example.com/");
        assert_eq!(normalize_url("https://Example.com", &b).unwrap(), "https://example.com/");
        assert!(normalize_url("mailto:a@example.com", &b).is_none());
        assert!(normalize_url("javascript:void(0)", &b).is_none());
        assert!(normalize_url("#top", &b).is_none());
        assert!(normalize_url("ftp://example.com/file", &b).is_none());
    }

    #[test]
    fn link_extraction() {
        let html = r#"<html><head><link rel="alternate" href="/fr/"></head><body>
            <a href="/a">a</a><a href="https://other.test/x">x</a>
            <form action="/search"></form>
            <script>fetch("/api/items?page=2"); var u = "//cdn.test/x";</script>
            <script src="/app.js"></script></body></html>"#;
        let links = extract_links(html);
        assert!(links.contains(&"/a".to_string()));
        assert!(links.contains(&"/fr/".to_string()));
        assert!(links.contains(&"/search".to_string()));
        assert!(links.contains(&"/api/items?page=2".to_string()));
        assert!(!links.iter().any(|l| l.starts_with("//")));

        let scripts = extract_script_sources(html, &Url::parse("https://example.com/").unwrap());
        assert_eq!(scripts, vec!["https://example.com/app.js".to_string()]);
    }

    #[test]
    fn robots_and_sitemaps() {
        let robots = parse_robots("User-agent: *\nDisallow: /admin/\nDisallow: /\nDisallow: /tmp*\nSitemap: https://example.com/s.xml\n");
        assert_eq!(robots.disallow, vec!["/admin/".to_string(), "/tmp".to_string()]);
        assert_eq!(robots.sitemaps, vec!["https://example.com/s.xml".to_string()]);
        assert_eq!(sensitive_disallows(&robots.disallow), vec!["/admin/".to_string()]);

        let (locs, index) = parse_sitemap("<sitemapindex><sitemap><loc>https://example.com/a.xml</loc></sitemap></sitemapindex>");
        assert!(index);
        assert_eq!(locs, vec!["https://example.com/a.xml".to_string()]);
    }

    #[test]
    fn assets_are_skipped() {
        assert!(is_asset("https://example.com/logo.PNG"));
        assert!(is_asset("https://example.com/app.js?v=3"));
        assert!(!is_asset("https://example.com/products"));
    }

    #[tokio::test]
    async fn off_scope_sitemaps_are_never_fetched() {
        let site = MockServer::start().await;
        let outside = MockServer::start().await;
        let outside_base = outside.uri().replace("127.0.0.1", "localhost");
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string("<urlset></urlset>"))
            .expect(0)
            .mount(&outside)
            .await;

        let robots = format!("User-agent: *\nSitemap: {}/s.xml\nSitemap: {}/index.xml\n", outside_base, site.uri());
        let index = format!(
            "<sitemapindex><sitemap><loc>{}/nested.xml</loc></sitemap><sitemap><loc>{}/pages.xml</loc></sitemap></sitemapindex>",
            outside_base,
            site.uri()
        );
        let pages = format!("<urlset><url><loc>{}/from-sitemap</loc></url></urlset>", site.uri());
        for (route, body, mime) in [
            ("/robots.txt", robots, "text/plain"),
            ("/index.xml", index, "application/xml"),
            ("/pages.xml", pages, "application/xml"),
            ("/", "<html><body>home</body></html>".to_string(), "text/html"),
            ("/from-sitemap", "<html><body>listed</body></html>".to_string(), "text/html"),
        ] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_raw(body, mime))
                .mount(&site)
                .await;
        }

        let config = ScanConfig { request_delay_ms: 0, ..ScanConfig::default() };
        let target = Target::with_base_url("127.0.0.1", &format!("{}/", site.uri())).unwrap();
        let ctx = ProbeContext::new(target, Arc::new(config)).unwrap();

        let result = crawl(&ctx).await.unwrap();
        assert!(result.urls.contains(&format!("{}/from-sitemap", site.uri())));
        assert!(result.urls.iter().all(|u| url_in_scope(u, "127.0.0.1")));
        outside.verify().await;
    }
}
