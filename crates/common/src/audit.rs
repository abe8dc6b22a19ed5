//! Append-only JSON-lines audit log of security-relevant operations.
//!
//! Writing is best effort: a failure is logged with `warn!` and never
//! returned to the caller.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    tracing::warn,
};

use crate::types::ContentType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    /// `install`, `download`, `auth.login`, `auth.logout`, `auth.refresh`.
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_type: Option<ContentType>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(operation: impl Into<String>, success: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            operation: operation.into(),
            package_id: None,
            package_type: None,
            success,
            error: None,
            metadata: None,
        }
    }

    /// An `auth.<operation>` entry.
    pub fn auth(operation: &str, error: Option<String>) -> Self {
        Self {
            error,
            ..Self::new(format!("auth.{operation}"), true)
        }
        .settle()
    }

    pub fn package(
        operation: impl Into<String>,
        package_id: impl Into<String>,
        package_type: ContentType,
        error: Option<String>,
    ) -> Self {
        Self {
            package_id: Some(package_id.into()),
            package_type: Some(package_type),
            error,
            ..Self::new(operation, true)
        }
        .settle()
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    fn settle(mut self) -> Self {
        self.success = self.error.is_none();
        self
    }
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. Never fails.
    pub fn record(&self, entry: &AuditEntry) {
        if let Err(e) = self.append(entry) {
            warn!(path = %self.path.display(), error = %e, "failed to write audit log");
        }
    }

    fn append(&self, entry: &AuditEntry) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(line.as_bytes())
    }

    /// The last `limit` entries, most recent first. Unparsable lines are skipped.
    pub fn read_recent(&self, limit: usize) -> Vec<AuditEntry> {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        let entries: Vec<AuditEntry> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        entries.into_iter().rev().take(limit).collect()
    }
}
