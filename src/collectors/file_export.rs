//! Collector for billing exports dropped on disk
//!
//! Reads `*.json` (array of export records) and `*.jsonl` (one record per
//! line) files under a directory, recursively.

use async_trait::async_trait;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

use super::{records_to_entries, Collector, CollectorOutput, Credentials, ExportRecord};
use crate::types::{CostLedgerError, Result};

const FILE_PATTERNS: [&str; 2] = ["**/*.json", "**/*.jsonl"];

/// Collector reading normalized export files for one service
#[derive(Debug, Clone)]
pub struct FileExportCollector {
    service_id: String,
    export_dir: PathBuf,
}

/// Per-file parse result
#[derive(Debug, Default)]
struct ParsedFile {
    records: Vec<ExportRecord>,
    bad_lines: usize,
}

impl FileExportCollector {
    pub fn new(service_id: &str, export_dir: PathBuf) -> Self {
        Self {
            service_id: service_id.to_string(),
            export_dir,
        }
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    /// Collect all files matching the export patterns, sorted for stable batch order
    fn collect_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = FILE_PATTERNS
            .iter()
            .flat_map(|pattern| {
                let pattern = self.export_dir.join(pattern);
                glob::glob(&pattern.to_string_lossy())
                    .map(|paths| paths.filter_map(|e| e.ok()).collect::<Vec<_>>())
                    .unwrap_or_default()
            })
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        files
    }

    /// Parse a single export file
    fn parse_file(path: &Path) -> Result<ParsedFile> {
        let mut bytes = fs::read(path)?;
        let is_jsonl = path.extension().and_then(|e| e.to_str()) == Some("jsonl");

        if !is_jsonl {
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(ParsedFile::default());
            }
            let records: Vec<ExportRecord> = simd_json::from_slice(&mut bytes)
                .map_err(|e| CostLedgerError::Parse(format!("{}: {}", path.display(), e)))?;
            return Ok(ParsedFile {
                records,
                bad_lines: 0,
            });
        }

        let mut parsed = ParsedFile::default();
        for line in bytes.split_mut(|b| *b == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match simd_json::from_slice::<ExportRecord>(line) {
                Ok(record) => parsed.records.push(record),
                Err(_) => parsed.bad_lines += 1,
            }
        }
        Ok(parsed)
    }

    /// Parse files in parallel, keeping file order in the output
    fn parse_all(&self) -> Result<CollectorOutput> {
        if !self.export_dir.is_dir() {
            return Err(CostLedgerError::Adapter {
                service: self.service_id.clone(),
                message: format!(
                    "export directory {} does not exist",
                    self.export_dir.display()
                ),
            });
        }

        let files = self.collect_files();
        let results: Vec<(PathBuf, Result<ParsedFile>)> = files
            .into_par_iter()
            .map(|f| {
                let parsed = Self::parse_file(&f);
                (f, parsed)
            })
            .collect();

        let mut records = Vec::new();
        let mut bad_lines = 0;
        let mut bad_files = 0;
        for (path, result) in results {
            match result {
                Ok(parsed) => {
                    bad_lines += parsed.bad_lines;
                    records.extend(parsed.records);
                }
                Err(e) => {
                    tracing::warn!(service = %self.service_id, file = %path.display(), error = %e, "failed to parse export file");
                    bad_files += 1;
                }
            }
        }

        let (entries, bad_dates) = records_to_entries(&self.service_id, records);

        let mut problems = Vec::new();
        if bad_files > 0 {
            problems.push(format!("{} unreadable export files", bad_files));
        }
        if bad_lines > 0 {
            problems.push(format!("{} malformed lines", bad_lines));
        }
        if bad_dates > 0 {
            problems.push(format!("{} records with unparseable dates", bad_dates));
        }

        Ok(CollectorOutput {
            entries,
            warning: (!problems.is_empty()).then(|| format!("skipped {}", problems.join(", "))),
        })
    }
}

#[async_trait]
impl Collector for FileExportCollector {
    fn service_id(&self) -> &str {
        &self.service_id
    }

    async fn collect(&self, _credentials: &Credentials) -> Result<CollectorOutput> {
        let collector = self.clone();
        tokio::task::spawn_blocking(move || collector.parse_all())
            .await
            .map_err(|e| CostLedgerError::Adapter {
                service: self.service_id.clone(),
                message: format!("export parsing task failed: {}", e),
            })?
    }
}
