use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;

use crate::findings::{Category, Finding, FindingDetails, Severity};
use crate::http_client::fetch;
use crate::probe::{Probe, ProbeContext};

/// Only the head of a file is needed to recognise it.
const SNIFF_BYTES: usize = 64 * 1024;

#[derive(Debug)]
pub struct SensitivePath {
    pub path: &'static str,
    pub severity: Severity,
    pub what: &'static str,
    /// At least one must appear in the body; protects against catch-all 200s.
    pub signatures: &'static [&'static str],
}

pub const SENSITIVE_PATHS: &[SensitivePath] = &[
    SensitivePath { path: "/.env", severity: Severity::Critical, what: "environment file", signatures: &["DB_PASSWORD", "APP_KEY", "DATABASE_URL", "SECRET_KEY", "AWS_SECRET"] },
    SensitivePath { path: "/.env.bak", severity: Severity::Critical, what: "environment file backup", signatures: &["DB_PASSWORD", "APP_KEY", "DATABASE_URL", "SECRET_KEY"] },
    SensitivePath { path: "/.git/config", severity: Severity::Critical, what: "Git repository configuration", signatures: &["[core]", "repositoryformatversion"] },
    SensitivePath { path: "/.git/HEAD", severity: Severity::High, what: "Git repository metadata", signatures: &["ref: refs/"] },
    SensitivePath { path: "/.aws/credentials", severity: Severity::Critical, what: "AWS credentials file", signatures: &["aws_access_key_id"] },
    SensitivePath { path: "/id_rsa", severity: Severity::Critical, what: "SSH private key", signatures: &["BEGIN RSA PRIVATE KEY", "BEGIN OPENSSH PRIVATE KEY"] },
    SensitivePath { path: "/wp-config.php.bak", severity: Severity::Critical, what: "WordPress configuration backup", signatures: &["DB_PASSWORD", "define("] },
    SensitivePath { path: "/config.php.bak", severity: Severity::Critical, what: "PHP configuration backup", signatures: &["<?php"] },
    SensitivePath { path: "/actuator/heapdump", severity: Severity::Critical, what: "Spring Boot heap dump", signatures: &["JAVA PROFILE"] },
    SensitivePath { path: "/actuator/env", severity: Severity::High, what: "Spring Boot environment endpoint", signatures: &["propertySources", "activeProfiles"] },
    SensitivePath { path: "/backup.sql", severity: Severity::High, what: "database dump", signatures: &["CREATE TABLE", "INSERT INTO", "-- MySQL dump"] },
    SensitivePath { path: "/dump.sql", severity: Severity::High, what: "database dump", signatures: &["CREATE TABLE", "INSERT INTO", "-- MySQL dump"] },
    SensitivePath { path: "/database.sql", severity: Severity::High, what: "database dump", signatures: &["CREATE TABLE", "INSERT INTO", "-- MySQL dump"] },
    SensitivePath { path: "/backup.zip", severity: Severity::High, what: "backup archive", signatures: &["PK\u{3}\u{4}"] },
    SensitivePath { path: "/.htpasswd", severity: Severity::High, what: "htpasswd credential file", signatures: &[":$apr1$", ":{SHA}", ":$2y$"] },
    SensitivePath { path: "/.npmrc", severity: Severity::High, what: "npm configuration with registry token", signatures: &["_authToken"] },
    SensitivePath { path: "/config.json", severity: Severity::Medium, what: "application configuration", signatures: &["\"password\"", "\"secret\"", "\"apiKey\"", "\"api_key\""] },
    SensitivePath { path: "/docker-compose.yml", severity: Severity::Medium, what: "Docker Compose file", signatures: &["services:"] },
    SensitivePath { path: "/web.config", severity: Severity::Medium, what: "IIS configuration", signatures: &["<configuration"] },
    SensitivePath { path: "/phpinfo.php", severity: Severity::Medium, what: "phpinfo() output", signatures: &["PHP Version", "phpinfo()"] },
    SensitivePath { path: "/info.php", severity: Severity::Medium, what: "phpinfo() output", signatures: &["PHP Version", "phpinfo()"] },
    SensitivePath { path: "/server-status", severity: Severity::Medium, what: "Apache server status page", signatures: &["Apache Server Status"] },
    SensitivePath { path: "/debug/pprof/", severity: Severity::Medium, what: "Go pprof debug endpoint", signatures: &["Types of profiles available"] },
    SensitivePath { path: "/.DS_Store", severity: Severity::Low, what: "macOS directory metadata", signatures: &["Bud1"] },
    SensitivePath { path: "/backup/", severity: Severity::Medium, what: "backup directory listing", signatures: &["Index of /backup"] },
    SensitivePath { path: "/uploads/", severity: Severity::Low, what: "upload directory listing", signatures: &["Index of /uploads"] },
];

/// Random path that should not exist. What the server answers here is the
/// soft-404 baseline.
pub fn soft_404_path() -> String {
    let tag: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("/wr-{}.txt", tag)
}

/// Whether a response to `entry.path` really is the sensitive file.
/// Signatures that the soft-404 page also contains prove nothing.
pub fn is_exposed(entry: &SensitivePath, status: u16, body: &str, soft_404_body: Option<&str>) -> bool {
    if !(200..300).contains(&status) {
        return false;
    }
    entry
        .signatures
        .iter()
        .filter(|sig| soft_404_body.map_or(true, |b| !b.contains(*sig)))
        .any(|sig| body.contains(sig))
}

pub struct SensitiveFileProbe;

#[async_trait]
impl Probe for SensitiveFileProbe {
    fn name(&self) -> &'static str {
        "sensitive_files"
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<Vec<Finding>> {
        let pacer = ctx.pacer();
        let cap = ctx.config.max_body_bytes.min(SNIFF_BYTES);

        let soft_url = ctx.target.url(&soft_404_path());
        let soft_404 = match fetch(&ctx.client, &soft_url, cap).await {
            Ok(page) if page.status < 300 => {
                tracing::debug!(url = %soft_url, "server answers unknown paths with success");
                Some(page.body)
            }
            _ => None,
        };

        let mut findings = Vec::new();
        for entry in SENSITIVE_PATHS {
            let url = ctx.target.url(entry.path);
            pacer.wait_url(&url).await;
            let page = match fetch(&ctx.client, &url, cap).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "sensitive path request failed");
                    continue;
                }
            };
            if !is_exposed(entry, page.status, &page.body, soft_404.as_deref()) {
                continue;
            }
            tracing::info!(path = entry.path, "sensitive file exposed");
            findings.push(
                Finding::new(
                    Category::SensitiveFiles,
                    entry.severity,
                    format!("Sensitive file exposed: {}", entry.path),
                    format!("{} is publicly downloadable ({}).", entry.path, entry.what),
                )
                .with_url(url)
                .with_recommendation("Remove the file from the web root or deny access to it in the server configuration, and rotate any credentials it contained.")
                .with_details(FindingDetails::SensitiveFile {
                    path: entry.path.to_string(),
                    status: page.status,
                    size: page.body.len(),
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
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entry(p: &str) -> &'static SensitivePath {
        SENSITIVE_PATHS.iter().find(|e| e.path == p).unwrap()
    }

    #[test]
    fn signature_is_required() {
        let env = entry("/.env");
        assert!(is_exposed(env, 200, "APP_KEY=base64:abc\nDB_PASSWORD=x", None));
        assert!(!is_exposed(env, 200, "<html>Not here</html>", None));
        assert!(!is_exposed(env, 403, "DB_PASSWORD=x", None));
    }

    #[test]
    fn soft_404_signatures_are_ignored() {
        let git = entry("/.git/HEAD");
        let catch_all = "<pre>ref: refs/heads/main</pre>";
        assert!(!is_exposed(git, 200, catch_all, Some(catch_all)));
    }

    async fn ctx_for(server: &MockServer) -> ProbeContext {
        let config = ScanConfig { request_delay_ms: 0, ..ScanConfig::default() };
        let target = Target::with_base_url("127.0.0.1", &format!("{}/", server.uri())).unwrap();
        ProbeContext::new(target, Arc::new(config)).unwrap()
    }

    #[tokio::test]
    async fn exposed_env_file_is_critical() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.env"))
            .respond_with(ResponseTemplate::new(200).set_body_string("APP_ENV=production\nDB_PASSWORD=hunter2\n"))
            .mount(&server)
            .await;

        let findings = SensitiveFileProbe.run(&ctx_for(&server).await).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].title, "Sensitive file exposed: /.env");
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn catch_all_site_yields_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>Welcome to our shop</body></html>"))
            .mount(&server)
            .await;

        let findings = SensitiveFileProbe.run(&ctx_for(&server).await).await.unwrap();
        assert!(findings.is_empty());
    }
}
