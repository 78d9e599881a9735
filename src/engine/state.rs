use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::stage::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
        }
    }
}

/// The persisted scan record. Only the orchestrator writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanState {
    pub id: String,
    pub domain: String,
    pub status: ScanStatus,
    pub stage: Stage,
    pub progress: u8,
    pub score: Option<u8>,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Crawl output, read by the analysis and infrastructure stages.
    #[serde(default)]
    pub discovered_urls: BTreeSet<String>,
    #[serde(default)]
    pub subdomains: Vec<String>,
}

impl ScanState {
    pub fn new(id: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            domain: domain.into(),
            status: ScanStatus::Pending,
            stage: Stage::Init,
            progress: 0,
            score: None,
            summary: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            discovered_urls: BTreeSet::new(),
            subdomains: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// Audit-trail entry appended through the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub stage: Option<Stage>,
    pub message: String,
}

impl ScanEvent {
    pub fn new(level: EventLevel, stage: Option<Stage>, message: impl Into<String>) -> Self {
        Self { timestamp: Utc::now(), level, stage, message: message.into() }
    }

    pub fn info(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(EventLevel::Info, Some(stage), message)
    }

    pub fn warn(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(EventLevel::Warn, Some(stage), message)
    }
}
