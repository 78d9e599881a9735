use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use crate::findings::{Category, Finding, FindingDetails, Severity};
use crate::http_client::FetchedPage;
use crate::probe::throttle::Pacer;
use crate::probe::{Probe, ProbeContext};

/// Query-string shapes tried on every target regardless of the crawl.
pub const COMMON_SHAPES: &[&str] = &[
    "/?id=1",
    "/search?q=test",
    "/product?id=1",
    "/index.php?id=1",
    "/item?id=1",
    "/news?id=1",
];

/// Appended to the parameter's original value.
pub const ERROR_PAYLOADS: &[&str] = &["'", "\"", "')", "' OR '1'='1"];

/// (always-true, always-false) suffix pairs.
pub const BOOLEAN_PAIRS: &[(&str, &str)] = &[
    ("' AND '1'='1", "' AND '1'='2"),
    (" AND 1=1", " AND 1=2"),
];

pub const ENGINE_SIGNATURES: &[(&str, &[&str])] = &[
    ("MySQL", &["you have an error in your sql syntax", "warning: mysql", "mysql_fetch_", "mysqli_", "mariadb server version for the right syntax"]),
    ("PostgreSQL", &["pg_query()", "psqlexception", "unterminated quoted string at or near", "syntax error at or near", "postgresql query failed"]),
    ("Microsoft SQL Server", &["unclosed quotation mark after the character string", "microsoft ole db provider for sql server", "incorrect syntax near", "sqlserver jdbc driver"]),
    ("Oracle", &["ora-00933", "ora-01756", "ora-00921", "quoted string not properly terminated"]),
    ("SQLite", &["sqlite3.operationalerror", "sqlite_error", "sqlite.exception", "unrecognized token:"]),
    ("Generic SQL", &["sqlstate[", "odbc driver", "jdbc.sqlexception"]),
];

/// Allowed deviation of the always-true response from the baseline.
const TRUE_TOLERANCE: f64 = 0.05;
/// Minimum deviation of the always-false response from the baseline.
const FALSE_DEVIATION: f64 = 0.30;

/// First engine whose error text appears in `body`.
pub fn detect_sql_error(body: &str) -> Option<(&'static str, &'static str)> {
    let lower = body.to_ascii_lowercase();
    ENGINE_SIGNATURES.iter().find_map(|(engine, sigs)| {
        sigs.iter().find(|s| lower.contains(*s)).map(|s| (*engine, *s))
    })
}

fn relative_delta(len: usize, baseline: usize) -> f64 {
    (len as f64 - baseline as f64).abs() / (baseline.max(1) as f64)
}

/// Length-only boolean heuristic: the true variant looks like the baseline
/// and the false variant does not.
pub fn boolean_signal(baseline_len: usize, true_len: usize, false_len: usize) -> bool {
    relative_delta(true_len, baseline_len) <= TRUE_TOLERANCE && relative_delta(false_len, baseline_len) >= FALSE_DEVIATION
}

/// `url` with `param` set to `value`, other parameters untouched.
pub fn with_param(url: &Url, param: &str, value: &str) -> String {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == param { value.to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    let mut out = url.clone();
    out.query_pairs_mut().clear().extend_pairs(pairs);
    out.to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct InjectionTarget {
    pub url: Url,
    pub param: String,
    pub original: String,
}

/// Parameterized URLs from the crawl followed by the fixed shapes, bounded
/// per URL and overall.
pub fn collect_targets(discovered: &[String], base: &Url, per_url: usize, max_targets: usize) -> Vec<InjectionTarget> {
    let mut targets = Vec::new();
    let common = COMMON_SHAPES.iter().filter_map(|s| base.join(s).ok());
    let crawled = discovered.iter().filter_map(|u| Url::parse(u).ok());

    for url in crawled.chain(common) {
        let mut url = url;
        url.set_fragment(None);
        let params: Vec<(String, String)> = url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
        for (param, original) in params.into_iter().take(per_url) {
            let duplicate = targets
                .iter()
                .any(|t: &InjectionTarget| t.param == param && t.url.path() == url.path() && t.url.host_str() == url.host_str());
            if !duplicate {
                targets.push(InjectionTarget { url: url.clone(), param, original });
            }
        }
        if targets.len() >= max_targets {
            break;
        }
    }
    targets.truncate(max_targets);
    targets
}

async fn get(ctx: &ProbeContext, pacer: &Pacer, url: &str) -> Option<FetchedPage> {
    pacer.wait_url(url).await;
    match ctx.fetch(url).await {
        Ok(page) => Some(page),
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "sqli request failed");
            None
        }
    }
}

fn injection_finding(target: &InjectionTarget, severity: Severity, technique: &str, payload: &str, evidence: String, url: String) -> Finding {
    Finding::new(
        Category::Vulnerability,
        severity,
        format!("SQL injection ({}) in parameter '{}'", technique, target.param),
        format!(
            "Parameter '{}' on {} appears to reach a SQL query unsanitised ({}).",
            target.param,
            target.url.path(),
            evidence
        ),
    )
    .with_url(url)
    .with_recommendation("Use parameterised queries or prepared statements and never concatenate request input into SQL.")
    .with_details(FindingDetails::Injection {
        parameter: target.param.clone(),
        payload: payload.to_string(),
        technique: technique.to_string(),
        evidence,
    })
}

async fn test_target(ctx: &ProbeContext, pacer: &Pacer, target: &InjectionTarget) -> Option<Finding> {
    let baseline_url = target.url.to_string();
    let baseline = get(ctx, pacer, &baseline_url).await?;
    if baseline.status >= 400 {
        return None;
    }
    let baseline_error = detect_sql_error(&baseline.body).is_some();

    if !baseline_error {
        for payload in ERROR_PAYLOADS {
            let url = with_param(&target.url, &target.param, &format!("{}{}", target.original, payload));
            let Some(page) = get(ctx, pacer, &url).await else { continue };
            if let Some((engine, signature)) = detect_sql_error(&page.body) {
                return Some(injection_finding(
                    target,
                    Severity::Critical,
                    "error-based",
                    payload,
                    format!("{} error message '{}' after injecting a quote", engine, signature),
                    url,
                ));
            }
        }
    }

    for (when_true, when_false) in BOOLEAN_PAIRS {
        let true_url = with_param(&target.url, &target.param, &format!("{}{}", target.original, when_true));
        let false_url = with_param(&target.url, &target.param, &format!("{}{}", target.original, when_false));
        let Some(t) = get(ctx, pacer, &true_url).await else { continue };
        let Some(f) = get(ctx, pacer, &false_url).await else { continue };
        if boolean_signal(baseline.body.len(), t.body.len(), f.body.len()) {
            return Some(injection_finding(
                target,
                Severity::High,
                "boolean-based blind",
                when_false,
                format!(
                    "response length {} for the true condition and {} for the false one against a baseline of {}",
                    t.body.len(),
                    f.body.len(),
                    baseline.body.len()
                ),
                false_url,
            ));
        }
    }
    None
}

pub struct SqlInjectionProbe;

#[async_trait]
impl Probe for SqlInjectionProbe {
    fn name(&self) -> &'static str {
        "sqli"
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<Vec<Finding>> {
        let targets = collect_targets(
            &ctx.discovered_urls,
            &ctx.target.base_url,
            ctx.config.max_params_per_url,
            ctx.config.max_sqli_targets,
        );
        tracing::info!(targets = targets.len(), "testing parameters for SQL injection");

        let pacer = ctx.pacer();
        let mut findings = Vec::new();
        for target in &targets {
            if let Some(f) = test_target(ctx, &pacer, target).await {
                findings.push(f);
            }
        }
        Ok(findings)
    }
}
