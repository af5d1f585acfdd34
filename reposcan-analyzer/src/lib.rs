//! Opaque static-analysis façade.
//!
//! The real analysis engine (rule catalog, AST walking, ...) is an external
//! collaborator and out of scope here; this crate defines the seam the
//! worker drives it through, plus a deterministic stub good enough to
//! exercise the job pipeline end to end.

use std::path::Path;

use reposcan_common::{AnalysisReport, Issue, Severity};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A static-analysis driver that accumulates issues as files are handed to it.
///
/// Mirrors the original `Process(path)` collaborator: callers feed it one
/// file at a time and it mutates internal state; the accumulated report is
/// read back once the job's file walk is complete.
pub trait Analyzer: Send {
    /// Process a single file already materialized on disk at `path`.
    fn process(&mut self, path: &Path) -> Result<(), AnalyzerError>;

    /// Consume the analyzer, returning its accumulated report.
    fn into_report(self: Box<Self>) -> AnalysisReport;
}

/// Deterministic stand-in for the real rule engine.
///
/// Flags every line containing the literal string `TODO` with a single
/// low-severity issue. This is intentionally trivial: the job pipeline's
/// correctness does not depend on what the analyzer finds, only on how
/// faithfully it is driven and how its output is plumbed through.
#[derive(Debug, Default)]
pub struct StubAnalyzer {
    report: AnalysisReport,
}

impl StubAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Analyzer for StubAnalyzer {
    fn process(&mut self, path: &Path) -> Result<(), AnalyzerError> {
        let contents = std::fs::read_to_string(path).map_err(|source| AnalyzerError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let file_label = path.display().to_string();
        for (idx, line) in contents.lines().enumerate() {
            if line.contains("TODO") {
                self.report.issues.push(Issue {
                    file: file_label.clone(),
                    line: (idx + 1) as u32,
                    rule_id: "stub-todo".to_string(),
                    severity: Severity::Low,
                    message: "found TODO marker".to_string(),
                });
            }
        }
        self.report.files_scanned += 1;
        Ok(())
    }

    fn into_report(self: Box<Self>) -> AnalysisReport {
        self.report
    }
}

/// Construct the analyzer used by production workers.
///
/// A thin indirection point: swapping in a real engine means changing only
/// this function, not the worker that drives it.
pub fn build_analyzer() -> Box<dyn Analyzer> {
    Box::new(StubAnalyzer::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn stub_analyzer_flags_todo_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "package main").unwrap();
        writeln!(file, "// TODO: fix this").unwrap();
        writeln!(file, "func main() {{}}").unwrap();

        let mut analyzer: Box<dyn Analyzer> = Box::new(StubAnalyzer::new());
        analyzer.process(file.path()).unwrap();
        let report = analyzer.into_report();

        assert_eq!(report.files_scanned, 1);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].line, 2);
        assert_eq!(report.issues[0].rule_id, "stub-todo");
    }

    #[test]
    fn stub_analyzer_accumulates_across_files() {
        let mut a = tempfile::NamedTempFile::new().unwrap();
        writeln!(a, "TODO one").unwrap();
        let mut b = tempfile::NamedTempFile::new().unwrap();
        writeln!(b, "no markers here").unwrap();
        writeln!(b, "TODO two").unwrap();
        writeln!(b, "TODO three").unwrap();

        let mut analyzer = StubAnalyzer::new();
        analyzer.process(a.path()).unwrap();
        analyzer.process(b.path()).unwrap();

        assert_eq!(analyzer.report.files_scanned, 2);
        assert_eq!(analyzer.report.issues.len(), 3);
    }

    #[test]
    fn process_reports_read_errors() {
        let mut analyzer = StubAnalyzer::new();
        let missing = Path::new("/nonexistent/path/does-not-exist.go");
        let err = analyzer.process(missing).unwrap_err();
        assert!(matches!(err, AnalyzerError::Read { .. }));
    }

    #[test]
    fn into_report_on_empty_analyzer_is_empty() {
        let analyzer: Box<dyn Analyzer> = Box::new(StubAnalyzer::new());
        let report = analyzer.into_report();
        assert_eq!(report.files_scanned, 0);
        assert!(report.issues.is_empty());
    }
}
