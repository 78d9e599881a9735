use anyhow::Result;
use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder, RequestBuilder, Response};

use crate::config::ScanConfig;

/// A response read under the configured size cap.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
    pub truncated: bool,
}

impl FetchedPage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn is_html(&self) -> bool {
        match self.header("content-type") {
            Some(ct) => {
                let ct = ct.to_ascii_lowercase();
                ct.contains("text/html") || ct.contains("application/xhtml")
            }
            None => self.body.trim_start().starts_with('<'),
        }
    }
}

fn base_builder(config: &ScanConfig) -> ClientBuilder {
    ClientBuilder::new()
        .pool_max_idle_per_host(8)
        .timeout(config.request_timeout())
        .connect_timeout(config.connect_timeout())
        .gzip(true)
        .brotli(true)
        .use_rustls_tls()
        .tls_sni(true)
        .user_agent(config.user_agent.clone())
}

/// Client used by most probes. Certificate problems are reported by the TLS
/// probe, so the others still look at sites with broken certificates.
pub fn build_client(config: &ScanConfig) -> Result<Client> {
    Ok(base_builder(config)
        .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
        .danger_accept_invalid_certs(true)
        .build()?)
}

/// Validating client for the TLS/reachability probe.
pub fn build_strict_client(config: &ScanConfig) -> Result<Client> {
    Ok(base_builder(config)
        .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
        .build()?)
}

/// Client that surfaces redirects instead of following them.
pub fn build_no_redirect_client(config: &ScanConfig) -> Result<Client> {
    Ok(base_builder(config)
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(true)
        .build()?)
}

/// Read at most `max_bytes` of the body. Larger bodies are truncated rather
/// than buffered, so a hostile target cannot exhaust memory.
pub async fn read_body_limited(mut response: Response, max_bytes: usize) -> Result<(String, bool)> {
    let mut buf: Vec<u8> = Vec::new();
    let mut truncated = false;
    while let Some(chunk) = response.chunk().await? {
        let room = max_bytes.saturating_sub(buf.len());
        if chunk.len() > room {
            buf.extend_from_slice(&chunk[..room]);
            truncated = true;
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    Ok((String::from_utf8_lossy(&buf).into_owned(), truncated))
}

/// Send a prepared request and read the capped response.
pub async fn send_capped(request: RequestBuilder, max_bytes: usize) -> Result<FetchedPage> {
    let response = request.send().await?;
    let url = response.url().to_string();
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let (body, truncated) = read_body_limited(response, max_bytes).await?;
    Ok(FetchedPage { url, status, headers, body, truncated })
}

pub async fn fetch(client: &Client, url: &str, max_bytes: usize) -> Result<FetchedPage> {
    send_capped(client.get(url), max_bytes).await
}
