pub mod analyze;
pub mod concurrent;
pub mod config;
pub mod discover;
pub mod dns;
pub mod engine;
pub mod findings;
pub mod fuzz;
pub mod gather;
pub mod http_client;
pub mod output;
pub mod probe;
pub mod scoring;
pub mod utils;
pub mod waf;

pub use config::ScanConfig;
pub use engine::{AdvanceOutcome, Orchestrator, ProbeStageRunner, ScanState, ScanStatus, Stage};
pub use findings::{Category, Finding, FindingDetails, Severity};
