//! Append-only log of reconciliation reports
//!
//! Each batch of resolutions is written once to its own file under
//! `.ddd/reconciliations/`, named after the write time. Files are created
//! exclusively, so a report is never overwritten or merged into another.

use crate::data::{ReconciliationEntry, ReconciliationReport};
use crate::mapping_store::STATE_DIR;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

const REPORT_DIR: &str = "reconciliations";
const REPORT_EXTENSION: &str = "yaml";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to serialize reconciliation report: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("failed to write reconciliation report {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to list reconciliation reports in {}: {source}", .path.display())]
    List {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Writer and reader for the report directory of one project
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(project_root: &Path) -> Self {
        Self {
            dir: project_root.join(STATE_DIR).join(REPORT_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Build a report for a batch of entries with a fresh id and timestamp
    pub fn report(
        entries: Vec<ReconciliationEntry>,
        sync_score_before: u32,
        sync_score_after: u32,
    ) -> ReconciliationReport {
        ReconciliationReport {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            entries,
            sync_score_before,
            sync_score_after,
        }
    }

    /// Write a report to a new file and return its path
    pub fn write(&self, report: &ReconciliationReport) -> Result<PathBuf, AuditError> {
        let content = serde_yaml::to_string(report)?;
        fs::create_dir_all(&self.dir).map_err(|source| AuditError::Write {
            path: self.dir.clone(),
            source,
        })?;

        let stem = file_stem(&report.timestamp);
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{}.{}", stem, REPORT_EXTENSION)
            } else {
                format!("{}-{}.{}", stem, attempt, REPORT_EXTENSION)
            };
            let path = self.dir.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(content.as_bytes())
                        .map_err(|source| AuditError::Write {
                            path: path.clone(),
                            source,
                        })?;
                    info!(
                        report = %report.id,
                        entries = report.entries.len(),
                        path = %path.display(),
                        "Reconciliation report written"
                    );
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(source) => return Err(AuditError::Write { path, source }),
            }
        }
    }

    /// Report files in chronological order. An absent directory means no
    /// reports yet.
    pub fn list(&self) -> Result<Vec<PathBuf>, AuditError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(AuditError::List {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut reports: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == REPORT_EXTENSION))
            .collect();
        reports.sort();
        Ok(reports)
    }
}

/// RFC 3339 timestamp made safe for file names
fn file_stem(timestamp: &str) -> String {
    timestamp.replace([':', '.'], "-")
}
