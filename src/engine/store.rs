use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use super::state::{ScanEvent, ScanState, ScanStatus};
use crate::findings::Finding;

/// Persistence the orchestrator depends on. The store is the only source of
/// truth for a scan's stage and progress; appends may be repeated on retry.
#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn load_scan_state(&self, id: &str) -> Result<Option<ScanState>>;
    async fn save_scan_state(&self, id: &str, state: &ScanState) -> Result<()>;

    /// Write `state` only while the stored status is still `expected`.
    /// Returns false, writing nothing, when another writer changed it first.
    async fn save_scan_state_if(&self, id: &str, state: &ScanState, expected: ScanStatus) -> Result<bool> {
        match self.load_scan_state(id).await? {
            Some(current) if current.status != expected => Ok(false),
            _ => {
                self.save_scan_state(id, state).await?;
                Ok(true)
            }
        }
    }

    async fn append_findings(&self, id: &str, findings: &[Finding]) -> Result<()>;
    async fn append_log(&self, id: &str, event: &ScanEvent) -> Result<()>;
    async fn get_findings(&self, id: &str) -> Result<Vec<Finding>>;
}

/// Process-local store for tests and one-shot runs.
#[derive(Default)]
pub struct MemoryStore {
    states: RwLock<HashMap<String, ScanState>>,
    findings: RwLock<HashMap<String, Vec<Finding>>>,
    events: RwLock<HashMap<String, Vec<ScanEvent>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self, id: &str) -> Vec<ScanEvent> {
        self.events.read().get(id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ScanStore for MemoryStore {
    async fn load_scan_state(&self, id: &str) -> Result<Option<ScanState>> {
        Ok(self.states.read().get(id).cloned())
    }

    async fn save_scan_state(&self, id: &str, state: &ScanState) -> Result<()> {
        self.states.write().insert(id.to_string(), state.clone());
        Ok(())
    }

    async fn save_scan_state_if(&self, id: &str, state: &ScanState, expected: ScanStatus) -> Result<bool> {
        let mut states = self.states.write();
        if states.get(id).is_some_and(|current| current.status != expected) {
            return Ok(false);
        }
        states.insert(id.to_string(), state.clone());
        Ok(true)
    }

    async fn append_findings(&self, id: &str, findings: &[Finding]) -> Result<()> {
        self.findings.write().entry(id.to_string()).or_default().extend_from_slice(findings);
        Ok(())
    }

    async fn append_log(&self, id: &str, event: &ScanEvent) -> Result<()> {
        self.events.write().entry(id.to_string()).or_default().push(event.clone());
        Ok(())
    }

    async fn get_findings(&self, id: &str) -> Result<Vec<Finding>> {
        Ok(self.findings.read().get(id).cloned().unwrap_or_default())
    }
}

/// One directory per scan: `state.json`, `findings.jsonl`, `events.jsonl`.
/// State writes from one process are serialized, which makes the
/// conditional save atomic against a cancel issued through the same store.
pub struct FileStore {
    root: PathBuf,
    state_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), state_lock: tokio::sync::Mutex::new(()) }
    }

    /// Directory of scan `id`. Ids are limited to `[A-Za-z0-9_-]` so they
    /// always name a direct child of the store root.
    pub fn scan_dir(&self, id: &str) -> Result<PathBuf> {
        if !is_valid_scan_id(id) {
            bail!("invalid scan id '{}'", id);
        }
        Ok(self.root.join(id))
    }

    async fn write_state(&self, id: &str, state: &ScanState) -> Result<()> {
        let dir = self.scan_dir(id)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        // write-then-rename so a crash never leaves a torn state file
        let tmp = dir.join("state.json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(state)?)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, dir.join("state.json")).await?;
        Ok(())
    }

    async fn append_jsonl<T: Serialize>(&self, id: &str, file: &str, items: &[T]) -> Result<()> {
        let dir = self.scan_dir(id)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(file);

        let mut buf = Vec::new();
        for item in items {
            serde_json::to_writer(&mut buf, item)?;
            buf.push(b'\n');
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        f.write_all(&buf).await.with_context(|| format!("writing {}", path.display()))?;
        f.flush().await?;
        Ok(())
    }
}

pub fn is_valid_scan_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 128 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

#[async_trait]
impl ScanStore for FileStore {
    async fn load_scan_state(&self, id: &str) -> Result<Option<ScanState>> {
        let path = self.scan_dir(id)?.join("state.json");
        match read_optional(&path).await? {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?,
            )),
            None => Ok(None),
        }
    }

    async fn save_scan_state(&self, id: &str, state: &ScanState) -> Result<()> {
        let _guard = self.state_lock.lock().await;
        self.write_state(id, state).await
    }

    async fn save_scan_state_if(&self, id: &str, state: &ScanState, expected: ScanStatus) -> Result<bool> {
        let _guard = self.state_lock.lock().await;
        if let Some(current) = self.load_scan_state(id).await? {
            if current.status != expected {
                return Ok(false);
            }
        }
        self.write_state(id, state).await?;
        Ok(true)
    }

    async fn append_findings(&self, id: &str, findings: &[Finding]) -> Result<()> {
        self.append_jsonl(id, "findings.jsonl", findings).await
    }

    async fn append_log(&self, id: &str, event: &ScanEvent) -> Result<()> {
        self.append_jsonl(id, "events.jsonl", std::slice::from_ref(event)).await
    }

    async fn get_findings(&self, id: &str) -> Result<Vec<Finding>> {
        let path = self.scan_dir(id)?.join("findings.jsonl");
        let Some(raw) = read_optional(&path).await? else {
            return Ok(Vec::new());
        };
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).with_context(|| format!("parsing {}", path.display())))
            .collect()
    }
}
