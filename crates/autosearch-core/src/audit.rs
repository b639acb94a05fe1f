//! Audit trail of dispatched searches
//!
//! Every trigger that reaches a terminal state leaves one record. The JSONL
//! log appends one JSON object per line so it can be tailed or grepped.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::search::{Priority, SearchResult, SearchTrigger, TriggerSource};

/// Terminal outcome recorded for a trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    Completed {
        success: bool,
        confidence: f64,
        latency_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
    },
    Failed {
        error: String,
    },
}

/// One audit line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub trigger_id: Uuid,
    pub query: String,
    pub context: String,
    pub priority: Priority,
    pub source: TriggerSource,
    #[serde(flatten)]
    pub outcome: AuditOutcome,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn completed(trigger: &SearchTrigger, result: &SearchResult) -> Self {
        Self::new(
            trigger,
            AuditOutcome::Completed {
                success: !result.is_empty(),
                confidence: result.confidence,
                latency_ms: result.latency_ms,
                provider: result.provider.clone(),
            },
        )
    }

    pub fn failed(trigger: &SearchTrigger, error: impl Into<String>) -> Self {
        Self::new(
            trigger,
            AuditOutcome::Failed {
                error: error.into(),
            },
        )
    }

    fn new(trigger: &SearchTrigger, outcome: AuditOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_id: trigger.id,
            query: trigger.query.clone(),
            context: trigger.context.clone(),
            priority: trigger.priority,
            source: trigger.source,
            outcome,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, AuditOutcome::Failed { .. })
    }
}

/// Destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> Result<()>;
}

/// Append-only JSONL audit log
pub struct JsonlAuditLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonlAuditLog {
    /// Open (creating if needed) the log file for appending
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back, skipping lines that do not parse
    pub fn read_all(path: &Path) -> Result<Vec<AuditRecord>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}

#[async_trait]
impl AuditSink for JsonlAuditLog {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut guard = self
            .file
            .lock()
            .map_err(|_| Error::Persistence("audit log lock poisoned".into()))?;
        let file = guard
            .as_mut()
            .ok_or_else(|| Error::Persistence("audit log is closed".into()))?;
        writeln!(file, "{}", json)?;
        file.flush()?;
        Ok(())
    }
}

/// In-memory audit trail
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| Error::Persistence("audit log lock poisoned".into()))?
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{NormalizedResult, SearchRequest};
    use tempfile::TempDir;

    fn trigger() -> SearchTrigger {
        SearchTrigger::admit(
            SearchRequest::new("Tokyo", "report_building")
                .with_priority(Priority::High)
                .with_source(TriggerSource::ReportBuilding),
        )
    }

    fn result(payload: Option<NormalizedResult>) -> SearchResult {
        SearchResult {
            query: "Tokyo".into(),
            payload,
            confidence: 0.6,
            latency_ms: 1500,
            sources: Vec::new(),
            provider: Some("deep".into()),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_completed_record_fields() {
        let trigger = trigger();
        let record = AuditRecord::completed(
            &trigger,
            &result(Some(NormalizedResult {
                summary: Some("x".into()),
                ..Default::default()
            })),
        );
        assert_eq!(record.trigger_id, trigger.id);
        assert_eq!(record.priority, Priority::High);
        assert!(!record.is_failure());
        match record.outcome {
            AuditOutcome::Completed {
                success, provider, ..
            } => {
                assert!(success);
                assert_eq!(provider.as_deref(), Some("deep"));
            }
            _ => panic!("expected completed"),
        }
    }

    #[test]
    fn test_record_json_shape() {
        let record = AuditRecord::failed(&trigger(), "timed out");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "timed out");
        assert_eq!(json["source"], "report_building");
    }

    #[tokio::test]
    async fn test_jsonl_log_appends_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("audit.jsonl");
        let log = JsonlAuditLog::open(&path).unwrap();

        let trigger = trigger();
        log.record(&AuditRecord::completed(&trigger, &result(None))).await.unwrap();
        log.record(&AuditRecord::failed(&trigger, "boom")).await.unwrap();

        let records = JsonlAuditLog::read_all(log.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(!records[0].is_failure());
        assert!(records[1].is_failure());

        // Reopening appends rather than truncating
        drop(log);
        let reopened = JsonlAuditLog::open(&path).unwrap();
        reopened.record(&AuditRecord::failed(&trigger, "again")).await.unwrap();
        assert_eq!(JsonlAuditLog::read_all(&path).unwrap().len(), 3);
    }

    #[test]
    fn test_read_all_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(JsonlAuditLog::read_all(&dir.path().join("none.jsonl")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_log() {
        let log = MemoryAuditLog::new();
        log.record(&AuditRecord::failed(&trigger(), "x")).await.unwrap();
        assert_eq!(log.records().len(), 1);
    }
}
