//! Resumable scan driver. Each `advance_scan` call loads the persisted state,
//! runs exactly one stage and persists the result, so a host with short call
//! budgets can drive a whole scan one invocation at a time.

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::stage::Stage;
use super::stages::{StageOutput, StageRunner};
use super::state::{EventLevel, ScanEvent, ScanState, ScanStatus};
use super::store::ScanStore;
use crate::findings::{map_compliance, Finding};
use crate::scoring::{calculate_score, generate_summary};
use crate::utils::normalize_domain;

/// What the host learns from one `advance_scan` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdvanceOutcome {
    /// True once the scan is in any terminal status.
    pub completed: bool,
    pub stage: Stage,
    pub status: ScanStatus,
    pub progress: u8,
}

impl AdvanceOutcome {
    fn of(state: &ScanState) -> Self {
        Self {
            completed: state.status.is_terminal(),
            stage: state.stage,
            status: state.status,
            progress: state.progress,
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn ScanStore>,
    runner: Arc<dyn StageRunner>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn ScanStore>, runner: Arc<dyn StageRunner>) -> Self {
        Self { store, runner }
    }

    /// Write a fresh `pending` record for `domain` under `id`.
    pub async fn create_scan(&self, id: &str, domain: &str) -> Result<ScanState> {
        if self.store.load_scan_state(id).await?.is_some() {
            bail!("scan {} already exists", id);
        }
        let state = ScanState::new(id, domain);
        self.store.save_scan_state(id, &state).await?;
        tracing::info!(scan = id, domain, "scan created");
        Ok(state)
    }

    pub async fn load_state(&self, id: &str) -> Result<Option<ScanState>> {
        self.store.load_scan_state(id).await
    }

    pub async fn get_findings(&self, id: &str) -> Result<Vec<Finding>> {
        self.store.get_findings(id).await
    }

    /// Move a non-terminal scan to `cancelled`. Returns false when the scan had
    /// already finished.
    pub async fn cancel_scan(&self, id: &str) -> Result<bool> {
        let mut state = self.load(id).await?;
        if state.status.is_terminal() {
            return Ok(false);
        }
        state.status = ScanStatus::Cancelled;
        state.completed_at = Some(Utc::now());
        self.store
            .append_log(id, &ScanEvent::new(EventLevel::Warn, Some(state.stage), "scan cancelled"))
            .await?;
        self.store.save_scan_state(id, &state).await?;
        tracing::info!(scan = id, stage = %state.stage, "scan cancelled");
        Ok(true)
    }

    /// Run the next stage of scan `id`. Terminal scans are returned as-is.
    pub async fn advance_scan(&self, id: &str) -> Result<AdvanceOutcome> {
        let mut state = self.load(id).await?;
        if state.status.is_terminal() {
            return Ok(AdvanceOutcome::of(&state));
        }

        // every write below is conditional on the status nobody else changed
        let expected = state.status;
        let Some(stage) = state.stage.next() else {
            return self.finish(id, state, expected).await;
        };

        if state.status == ScanStatus::Pending {
            if normalize_domain(&state.domain).as_deref() != Some(state.domain.as_str()) {
                let reason = format!("invalid domain '{}'", state.domain);
                return self.fail(id, state, expected, reason).await;
            }
            state.status = ScanStatus::Running;
            state.started_at = Some(Utc::now());
        }

        tracing::info!(scan = id, domain = %state.domain, stage = %stage, "advancing scan");
        let output = if stage == Stage::Scoring {
            self.score(id, &mut state).await?
        } else {
            self.run_guarded(stage, &state).await
        };

        // cancellation may have landed while the stage was running
        if let Some(current) = self.store.load_scan_state(id).await? {
            if current.status == ScanStatus::Cancelled {
                tracing::info!(scan = id, stage = %stage, "scan cancelled mid-stage, discarding output");
                return Ok(AdvanceOutcome::of(&current));
            }
        }

        if !output.findings.is_empty() {
            self.store.append_findings(id, &output.findings).await?;
        }
        for event in &output.events {
            self.store.append_log(id, event).await?;
        }
        self.store
            .append_log(id, &ScanEvent::info(stage, format!("stage finished with {} findings", output.findings.len())))
            .await?;

        if let Some(urls) = output.discovered_urls {
            state.discovered_urls = urls;
        }
        if let Some(subdomains) = output.subdomains {
            state.subdomains = subdomains;
        }
        state.stage = stage;
        state.progress = state.progress.max(stage.progress());

        if stage == Stage::Scoring {
            return self.finish(id, state, expected).await;
        }
        self.commit(id, &state, expected).await
    }

    /// Conditional save. When a cancel won the race the stored record is
    /// reported instead.
    async fn commit(&self, id: &str, state: &ScanState, expected: ScanStatus) -> Result<AdvanceOutcome> {
        if self.store.save_scan_state_if(id, state, expected).await? {
            return Ok(AdvanceOutcome::of(state));
        }
        let current = self.load(id).await?;
        tracing::info!(scan = id, status = current.status.as_str(), "scan changed concurrently, keeping stored state");
        Ok(AdvanceOutcome::of(&current))
    }

    async fn load(&self, id: &str) -> Result<ScanState> {
        self.store
            .load_scan_state(id)
            .await?
            .ok_or_else(|| anyhow!("unknown scan {}", id))
    }

    /// Stage errors and panics degrade to an empty output; the scan moves on.
    async fn run_guarded(&self, stage: Stage, state: &ScanState) -> StageOutput {
        match AssertUnwindSafe(self.runner.run_stage(stage, state)).catch_unwind().await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(scan = %state.id, stage = %stage, error = %e, "stage failed, advancing with no findings");
                StageOutput {
                    events: vec![ScanEvent::new(EventLevel::Error, Some(stage), format!("stage failed: {:#}", e))],
                    ..StageOutput::default()
                }
            }
            Err(_) => {
                tracing::warn!(scan = %state.id, stage = %stage, "stage panicked, advancing with no findings");
                StageOutput {
                    events: vec![ScanEvent::new(EventLevel::Error, Some(stage), "stage panicked")],
                    ..StageOutput::default()
                }
            }
        }
    }

    /// Compliance summaries and the score, computed from everything persisted
    /// so far. Earlier summaries from a retried call are ignored.
    async fn score(&self, id: &str, state: &mut ScanState) -> Result<StageOutput> {
        let findings: Vec<Finding> = self
            .store
            .get_findings(id)
            .await?
            .into_iter()
            .filter(|f| !f.is_compliance_summary())
            .collect();
        let score = calculate_score(&findings);
        state.score = Some(score);
        state.summary = Some(generate_summary(score, &findings));
        tracing::info!(scan = id, score, findings = findings.len(), "scan scored");
        Ok(StageOutput::with_findings(map_compliance(&findings)))
    }

    async fn finish(&self, id: &str, mut state: ScanState, expected: ScanStatus) -> Result<AdvanceOutcome> {
        state.stage = Stage::Done;
        state.progress = 100;
        state.status = ScanStatus::Completed;
        state.completed_at = Some(Utc::now());
        let outcome = self.commit(id, &state, expected).await?;
        tracing::info!(scan = id, status = outcome.status.as_str(), score = ?state.score, "scan finished");
        Ok(outcome)
    }

    async fn fail(&self, id: &str, mut state: ScanState, expected: ScanStatus, reason: String) -> Result<AdvanceOutcome> {
        tracing::warn!(scan = id, reason = %reason, "scan failed");
        self.store
            .append_log(id, &ScanEvent::new(EventLevel::Error, None, reason.clone()))
            .await?;
        state.status = ScanStatus::Failed;
        state.error = Some(reason);
        state.completed_at = Some(Utc::now());
        self.commit(id, &state, expected).await
    }
}
