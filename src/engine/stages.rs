use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::stage::Stage;
use super::state::{ScanEvent, ScanState};
use crate::analyze::{CorsProbe, DependencyProbe, HeaderProbe, InfoLeakProbe, SensitiveFileProbe};
use crate::config::ScanConfig;
use crate::discover::subdomain::{analyze_subdomains, enumerate_subdomains};
use crate::discover::{crawl, TakeoverProbe};
use crate::dns::email_auth::EmailAuthProbe;
use crate::findings::{aggregate, Finding};
use crate::fuzz::{HostHeaderProbe, RateLimitProbe, SqlInjectionProbe};
use crate::gather::SecretScanner;
use crate::probe::tls::TlsProbe;
use crate::probe::{run_probes, Probe, ProbeContext, ProbeReport, Target};
use crate::utils::apex_domain;
use crate::waf::WafProbe;

/// What one stage produced. Discovery outputs are `None` for stages that do
/// not touch them.
#[derive(Debug, Default)]
pub struct StageOutput {
    pub findings: Vec<Finding>,
    pub discovered_urls: Option<BTreeSet<String>>,
    pub subdomains: Option<Vec<String>>,
    pub events: Vec<ScanEvent>,
}

impl StageOutput {
    pub fn with_findings(findings: Vec<Finding>) -> Self {
        Self { findings, ..Self::default() }
    }
}

/// Executes the network work of one stage. The scoring stage never reaches a
/// runner; the orchestrator computes it from persisted findings.
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run_stage(&self, stage: Stage, state: &ScanState) -> Result<StageOutput>;
}

/// Runs the real probe suite.
pub struct ProbeStageRunner {
    config: Arc<ScanConfig>,
    base_url: Option<String>,
}

impl ProbeStageRunner {
    pub fn new(config: Arc<ScanConfig>) -> Self {
        Self { config, base_url: None }
    }

    /// Address the target through `base_url` instead of `https://<domain>/`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn context(&self, state: &ScanState) -> Result<ProbeContext> {
        let target = match &self.base_url {
            Some(base) => Target::with_base_url(&state.domain, base)?,
            None => Target::new(&state.domain)?,
        };
        Ok(ProbeContext::new(target, self.config.clone())?
            .with_discovery(state.discovered_urls.iter().cloned().collect(), state.subdomains.clone()))
    }

    pub fn probes_for(stage: Stage) -> Vec<Arc<dyn Probe>> {
        match stage {
            Stage::Recon => vec![Arc::new(TlsProbe), Arc::new(HeaderProbe), Arc::new(CorsProbe), Arc::new(WafProbe)],
            Stage::Email => vec![Arc::new(EmailAuthProbe)],
            Stage::Analysis => vec![Arc::new(SecretScanner), Arc::new(SqlInjectionProbe), Arc::new(DependencyProbe)],
            Stage::Infrastructure => vec![
                Arc::new(SensitiveFileProbe),
                Arc::new(InfoLeakProbe),
                Arc::new(HostHeaderProbe),
                Arc::new(RateLimitProbe),
            ],
            _ => Vec::new(),
        }
    }

    async fn discovery(&self, ctx: ProbeContext) -> StageOutput {
        let mut events = Vec::new();
        let (subdomains, crawled) = tokio::join!(
            guarded("subdomains", enumerate_subdomains(&ctx)),
            guarded("crawler", crawl(&ctx)),
        );

        let mut batches = Vec::new();
        let names: Vec<String> = match subdomains {
            Ok(statuses) => {
                batches.push(analyze_subdomains(apex_domain(&ctx.target.domain), &statuses));
                statuses.into_iter().map(|s| s.name).collect()
            }
            Err(e) => {
                events.push(ScanEvent::warn(Stage::Discovery, format!("subdomain enumeration failed: {}", e)));
                Vec::new()
            }
        };
        let urls = match crawled {
            Ok(result) => {
                batches.push(result.findings);
                result.urls
            }
            Err(e) => {
                events.push(ScanEvent::warn(Stage::Discovery, format!("crawl failed: {}", e)));
                BTreeSet::new()
            }
        };

        let ctx = Arc::new(ctx.with_discovery(urls.iter().cloned().collect(), names.clone()));
        let reports = run_probes(vec![Arc::new(TakeoverProbe)], ctx).await;
        events.extend(report_events(Stage::Discovery, &reports));
        batches.extend(reports.into_iter().map(|r| r.findings));

        StageOutput {
            findings: aggregate(batches),
            discovered_urls: Some(urls),
            subdomains: Some(names),
            events,
        }
    }
}

/// Await `fut`, turning a panic into an error.
async fn guarded<T>(what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(task = what, "task panicked");
            Err(anyhow::anyhow!("{} panicked", what))
        }
    }
}

fn report_events(stage: Stage, reports: &[ProbeReport]) -> Vec<ScanEvent> {
    reports
        .iter()
        .filter_map(|r| {
            r.error
                .as_ref()
                .map(|e| ScanEvent::warn(stage, format!("probe {} failed: {}", r.probe, e)))
        })
        .collect()
}

#[async_trait]
impl StageRunner for ProbeStageRunner {
    async fn run_stage(&self, stage: Stage, state: &ScanState) -> Result<StageOutput> {
        let ctx = self.context(state)?;
        tracing::info!(domain = %state.domain, stage = %stage, "running stage");

        if stage == Stage::Discovery {
            return Ok(self.discovery(ctx).await);
        }

        let probes = Self::probes_for(stage);
        if probes.is_empty() {
            return Ok(StageOutput::default());
        }
        let reports = run_probes(probes, Arc::new(ctx)).await;
        let events = report_events(stage, &reports);
        Ok(StageOutput {
            findings: aggregate(reports.into_iter().map(|r| r.findings)),
            events,
            ..StageOutput::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_probe_assignment() {
        let names = |s| ProbeStageRunner::probes_for(s).iter().map(|p| p.name()).collect::<Vec<_>>();
        assert_eq!(names(Stage::Recon), vec!["tls", "headers", "cors", "waf"]);
        assert_eq!(names(Stage::Email), vec!["email"]);
        assert_eq!(names(Stage::Analysis), vec!["secrets", "sqli", "dependencies"]);
        assert_eq!(names(Stage::Infrastructure), vec!["sensitive_files", "info_leak", "host_header", "rate_limit"]);
        assert!(names(Stage::Scoring).is_empty());
    }

    #[tokio::test]
    async fn guarded_converts_panics() {
        let ok = guarded("ok", async { Ok::<_, anyhow::Error>(3) }).await;
        assert_eq!(ok.unwrap(), 3);
        let boom = guarded("boom", async {
            if true {
                panic!("bad response");
            }
            Ok::<u8, anyhow::Error>(0)
        })
        .await;
        assert!(boom.unwrap_err().to_string().contains("boom panicked"));
    }
}
