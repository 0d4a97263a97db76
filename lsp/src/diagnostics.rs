//! Diagnostics store: the live diagnostics of every tracked file.
//!
//! A file's set only shrinks by being cleared as a whole. The compiler never
//! says which earlier diagnostic stopped applying; a fresh compile's silence
//! about a location is the only retraction signal.

use std::collections::BTreeMap;

use crate::classify::SpanDiagnostic;
use crate::types::{Diagnostic, DiagnosticKey, FileUri, Range, Severity};

type FileDiagnosticSet = BTreeMap<DiagnosticKey, Diagnostic>;

/// Identity of a span diagnostic within its file.
pub(crate) fn derive_key(record: &SpanDiagnostic) -> DiagnosticKey {
    DiagnosticKey {
        start_line: record.start_line,
        start_col: record.start_col,
        end_line: record.end_line,
        end_col: record.end_col,
        reason: record.reason.clone(),
    }
}

pub(crate) fn to_diagnostic(record: &SpanDiagnostic) -> Diagnostic {
    Diagnostic::new(
        derive_key(record),
        Range::from_span(
            record.start_line,
            record.start_col,
            record.end_line,
            record.end_col,
        ),
        Severity::from_tag(&record.severity_tag),
        record.reason.clone(),
        record.doc.clone(),
    )
}

#[derive(Debug, Default)]
pub(crate) struct DiagnosticIndex {
    files: BTreeMap<FileUri, FileDiagnosticSet>,
}

impl DiagnosticIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, or replace the diagnostic with the same key.
    pub fn upsert(&mut self, file: FileUri, diagnostic: Diagnostic) {
        self.files
            .entry(file)
            .or_default()
            .insert(diagnostic.key().clone(), diagnostic);
    }

    /// Empty the file's set, tracking the file if it was unknown so the
    /// next sweep tells the client.
    pub fn clear(&mut self, file: FileUri) {
        self.files.insert(file, FileDiagnosticSet::new());
    }

    pub fn clear_all(&mut self) {
        for set in self.files.values_mut() {
            set.clear();
        }
    }

    pub fn is_empty(&self, file: &FileUri) -> bool {
        self.files.get(file).is_none_or(BTreeMap::is_empty)
    }

    pub fn is_tracked(&self, file: &FileUri) -> bool {
        self.files.contains_key(file)
    }

    /// Current diagnostics of `file`; empty for files never seen.
    pub fn snapshot(&self, file: &FileUri) -> Vec<Diagnostic> {
        self.files
            .get(file)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Hand every tracked file's full snapshot to `publish`, then forget the
    /// files whose snapshot was empty.
    pub fn sweep(&mut self, mut publish: impl FnMut(&FileUri, Vec<Diagnostic>)) {
        for (file, set) in &self.files {
            publish(file, set.values().cloned().collect());
        }
        self.files.retain(|_, set| !set.is_empty());
    }

    pub fn tracked_count(&self) -> usize {
        self.files.len()
    }
}
