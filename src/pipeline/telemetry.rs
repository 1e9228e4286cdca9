//! Usage telemetry: a JSON-lines usage log with size-based rollover, and a
//! persistent usage counter.
//!
//! Both are best-effort from the pipeline's point of view: the orchestrator
//! logs and swallows every [`TelemetryError`]. Neither is an audit trail; the
//! counter in particular only approximates the number of successful runs.

use crate::config::TelemetryConfig;
use crate::error::TelemetryError;
use crate::step::ProcessingStep;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Offset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

// ── Records ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Error,
}

/// One line of the usage log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub ip: String,
    pub input_length: usize,
    pub template_id: String,
    pub result: RunOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<ProcessingStep>,
    /// Milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub was_converted: Option<bool>,
}

/// Sink for usage records.
#[async_trait]
pub trait UsageLog: Send + Sync {
    async fn append(&self, record: &UsageRecord) -> Result<(), TelemetryError>;
}

/// Discards everything. Useful when telemetry is disabled.
#[derive(Debug, Default)]
pub struct NullUsageLog;

#[async_trait]
impl UsageLog for NullUsageLog {
    async fn append(&self, _record: &UsageRecord) -> Result<(), TelemetryError> {
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedRecord<'a> {
    timestamp_local: String,
    timestamp_utc: String,
    #[serde(flatten)]
    record: &'a UsageRecord,
}

// ── Rolling file log ─────────────────────────────────────────────────────

/// Appends records to `usage-YYYY-MM-DD.log`; once that file reaches
/// `max_file_size`, new records go to `usage-<timestamp>.log`.
#[derive(Debug)]
pub struct RollingFileLog {
    dir: PathBuf,
    max_file_size: u64,
    offset: FixedOffset,
    // Serialises appends within the process.
    write_lock: Mutex<()>,
}

impl RollingFileLog {
    pub fn new(config: &TelemetryConfig) -> Self {
        let offset = FixedOffset::east_opt(config.utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix());
        Self {
            dir: config.log_dir.clone(),
            max_file_size: config.max_file_size,
            offset,
            write_lock: Mutex::new(()),
        }
    }

    /// The file the next record written at `now` goes to.
    pub async fn file_for(&self, now: DateTime<Utc>) -> PathBuf {
        let daily = self
            .dir
            .join(format!("usage-{}.log", now.format("%Y-%m-%d")));
        match tokio::fs::metadata(&daily).await {
            Ok(meta) if meta.len() >= self.max_file_size => {
                let stamp = now
                    .to_rfc3339_opts(SecondsFormat::Millis, true)
                    .replace([':', '.'], "-");
                self.dir.join(format!("usage-{stamp}.log"))
            }
            _ => daily,
        }
    }

    fn io_err(path: &Path, source: std::io::Error) -> TelemetryError {
        TelemetryError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
impl UsageLog for RollingFileLog {
    async fn append(&self, record: &UsageRecord) -> Result<(), TelemetryError> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Self::io_err(&self.dir, e))?;
        let path = self.file_for(now).await;

        let persisted = PersistedRecord {
            timestamp_local: now
                .with_timezone(&self.offset)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            timestamp_utc: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            record,
        };
        let mut line = serde_json::to_string(&persisted)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Self::io_err(&path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Self::io_err(&path, e))?;
        file.flush().await.map_err(|e| Self::io_err(&path, e))?;
        debug!("Usage record appended to {}", path.display());
        Ok(())
    }
}

// ── Usage counter ────────────────────────────────────────────────────────

/// Monotonic display counter of successful conversions.
#[async_trait]
pub trait UsageCounter: Send + Sync {
    async fn count(&self) -> u64;
    async fn increment(&self) -> Result<u64, TelemetryError>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CounterFile {
    user_count: u64,
}

/// Counter persisted as `{"userCount": n}` in a small JSON file.
///
/// Reads never fail: a missing, corrupt or below-seed file reads as the seed.
#[derive(Debug)]
pub struct JsonFileCounter {
    path: PathBuf,
    seed: u64,
    lock: Mutex<()>,
}

impl JsonFileCounter {
    pub fn new(path: impl Into<PathBuf>, seed: u64) -> Self {
        Self {
            path: path.into(),
            seed,
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(config.counter_path.clone(), config.counter_seed)
    }

    async fn write(&self, value: u64) -> Result<(), TelemetryError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RollingFileLog::io_err(parent, e))?;
        }
        let body = serde_json::to_string_pretty(&CounterFile { user_count: value })?;
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|e| RollingFileLog::io_err(&self.path, e))
    }

    async fn read(&self) -> u64 {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => match serde_json::from_str::<CounterFile>(&raw) {
                Ok(f) if f.user_count >= self.seed => f.user_count,
                Ok(_) => self.seed,
                Err(e) => {
                    warn!("Usage counter {} is unreadable: {}", self.path.display(), e);
                    self.seed
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Err(e) = self.write(self.seed).await {
                    warn!("Failed to create usage counter: {}", e);
                }
                self.seed
            }
            Err(e) => {
                warn!("Failed to read usage counter {}: {}", self.path.display(), e);
                self.seed
            }
        }
    }
}

#[async_trait]
impl UsageCounter for JsonFileCounter {
    async fn count(&self) -> u64 {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    async fn increment(&self) -> Result<u64, TelemetryError> {
        let _guard = self.lock.lock().await;
        let next = self.read().await + 1;
        self.write(next).await?;
        Ok(next)
    }
}
