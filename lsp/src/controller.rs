//! Aggregation controller: consumes GHCi output and keeps the editor in sync.
//!
//! [`Aggregator`] owns the only mutable diagnostic state in the process. It
//! is fed one line at a time, in arrival order, by the server loop and talks
//! to the editor exclusively through a [`ClientSink`].

use std::path::{Path, PathBuf};

use crate::classify::{ClassifiedRecord, PromptSentinel, classify};
use crate::diagnostics::{DiagnosticIndex, to_diagnostic};
use crate::types::{Diagnostic, FileUri};

/// The editor-facing side of the controller.
pub trait ClientSink {
    /// Send `diagnostics` as the complete current set for `uri`.
    fn publish(&mut self, uri: &FileUri, diagnostics: Vec<Diagnostic>);
    /// Show a user-visible status string.
    fn set_status(&mut self, status: &str);
    /// Record free text that is not a diagnostic.
    fn log(&mut self, message: &str);
}

/// Whether GHCi is working on a command. Drives status reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Busy,
}

pub struct Aggregator {
    index: DiagnosticIndex,
    state: SessionState,
    sentinel: PromptSentinel,
    /// Directory GHCi runs in; relative compiler paths resolve against it.
    root: PathBuf,
}

impl Aggregator {
    #[must_use]
    pub fn new(root: PathBuf, sentinel: PromptSentinel) -> Self {
        Self {
            index: DiagnosticIndex::new(),
            state: SessionState::Idle,
            sentinel,
            root,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn sentinel(&self) -> &PromptSentinel {
        &self.sentinel
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn set_root(&mut self, root: PathBuf) {
        self.root = root;
    }

    /// Switch to a new GHCi session recognised by `sentinel`.
    pub fn begin_session(&mut self, sentinel: PromptSentinel) {
        self.sentinel = sentinel;
        self.state = SessionState::Idle;
    }

    /// Record that `command` was written to GHCi.
    pub fn command_sent(&mut self, command: &str, sink: &mut dyn ClientSink) {
        sink.log(&format!("[stdin] {command}"));
        sink.set_status(&format!("Running {command}"));
        self.state = SessionState::Busy;
    }

    pub fn on_stdout(&mut self, line: &str, sink: &mut dyn ClientSink) {
        match classify(line, &self.sentinel) {
            ClassifiedRecord::SpanDiagnostic(record) => {
                match FileUri::from_compiler_path(&record.file, &self.root) {
                    Ok(uri) => {
                        let diagnostic = to_diagnostic(&record);
                        let severity = diagnostic.severity().label();
                        tracing::debug!(%uri, severity, "Diagnostic");
                        self.index.upsert(uri, diagnostic);
                        self.republish(sink);
                    }
                    Err(e) => {
                        tracing::warn!(file = %record.file, "Dropping diagnostic: {e}");
                        sink.log(&format!("[stdout] {line}"));
                    }
                }
            }
            ClassifiedRecord::CompilationStarting { source_path } => {
                match FileUri::from_compiler_path(&source_path, &self.root) {
                    Ok(uri) => {
                        tracing::debug!(%uri, "Recompiling");
                        self.index.clear(uri);
                        self.republish(sink);
                    }
                    Err(e) => {
                        tracing::warn!(path = %source_path, "Cannot retract diagnostics: {e}");
                        sink.log(&format!("[stdout] {line}"));
                    }
                }
            }
            ClassifiedRecord::InteractiveOutput | ClassifiedRecord::PlainText => {
                sink.log(&format!("[stdout] {line}"));
            }
            ClassifiedRecord::PromptSentinel => {
                self.state = SessionState::Idle;
                sink.set_status("Idle");
            }
        }
    }

    pub fn on_stderr(&mut self, line: &str, sink: &mut dyn ClientSink) {
        sink.log(&format!("[stderr] {line}"));
    }

    /// Tell the client every tracked file is clean and forget them all.
    pub fn retract_all(&mut self, sink: &mut dyn ClientSink) {
        self.index.clear_all();
        self.republish(sink);
    }

    /// Current diagnostics for `uri`; empty when the file is not tracked.
    #[must_use]
    pub fn snapshot(&self, uri: &FileUri) -> Vec<Diagnostic> {
        self.index.snapshot(uri)
    }

    /// True when `uri` has no live diagnostics, tracked or not.
    #[must_use]
    pub fn is_clean(&self, uri: &FileUri) -> bool {
        self.index.is_empty(uri)
    }

    #[must_use]
    pub fn is_tracked(&self, uri: &FileUri) -> bool {
        self.index.is_tracked(uri)
    }

    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.index.tracked_count()
    }

    fn republish(&mut self, sink: &mut dyn ClientSink) {
        self.index.sweep(|uri, items| sink.publish(uri, items));
    }
}
