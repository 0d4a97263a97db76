//! Line classifier: turns one line of GHCi stdout into a typed record.
//!
//! GHCi started with `-ddump-json` writes one JSON object per message. Every
//! other line (banners, echoed commands, the prompt) is plain text. Nothing in
//! here fails: anything that does not fit a known shape is `PlainText`.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::types::SERVER_NAME;

/// File name GHC uses for spans that point at REPL input.
pub const INTERACTIVE_FILE: &str = "<interactive>";

/// Severity tag of plain status output (progress messages, banners).
const OUTPUT_SEVERITY: &str = "SevOutput";

static COMPILING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[ *(\d+) of (\d+)\] Compiling (\S+) *\( ([^,]+), ")
        .expect("compiling pattern is valid")
});

/// Classified form of one stdout line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedRecord {
    SpanDiagnostic(SpanDiagnostic),
    /// Structured output about REPL input rather than a source file.
    InteractiveOutput,
    /// GHC is about to recompile the module at `source_path`.
    CompilationStarting { source_path: String },
    PlainText,
    /// The session prompt: GHCi finished the last command.
    PromptSentinel,
}

/// A diagnostic located in a real source file, as GHC reported it.
///
/// Coordinates are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanDiagnostic {
    pub file: String,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
    pub reason: Option<String>,
    pub severity_tag: String,
    pub doc: String,
}

/// Marker configured as the GHCi prompt, unique to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSentinel(String);

impl PromptSentinel {
    #[must_use]
    pub fn new(name: &str, version: &str, epoch_millis: i64) -> Self {
        Self(format!("{{- {name} {version} {epoch_millis} -}}"))
    }

    /// Sentinel for a session starting now.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(
            SERVER_NAME,
            env!("CARGO_PKG_VERSION"),
            chrono::Utc::now().timestamp_millis(),
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn matches(&self, line: &str) -> bool {
        line.contains(&self.0)
    }

    /// GHCi command that installs the sentinel as the prompt.
    #[must_use]
    pub fn prompt_command(&self) -> String {
        format!(":set prompt \"{}\\n\"", self.0)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSpan {
    file: String,
    start_line: u32,
    start_col: u32,
    end_line: u32,
    end_col: u32,
}

#[derive(Deserialize)]
struct RawRecord {
    #[serde(default)]
    span: Option<RawSpan>,
    #[serde(default)]
    reason: Option<serde_json::Value>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    doc: Option<String>,
}

/// Classify one line of GHCi stdout.
#[must_use]
pub fn classify(line: &str, sentinel: &PromptSentinel) -> ClassifiedRecord {
    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(value @ serde_json::Value::Object(_)) => classify_structured(value),
        _ => classify_text(line, sentinel),
    }
}

fn classify_structured(value: serde_json::Value) -> ClassifiedRecord {
    let Ok(record) = serde_json::from_value::<RawRecord>(value) else {
        return ClassifiedRecord::PlainText;
    };
    let reason = record.reason.and_then(reason_text);

    match record.span {
        Some(span) if span.file == INTERACTIVE_FILE => ClassifiedRecord::InteractiveOutput,
        Some(span) => match (record.severity, record.doc) {
            (Some(severity_tag), Some(doc)) => ClassifiedRecord::SpanDiagnostic(SpanDiagnostic {
                file: span.file,
                start_line: span.start_line,
                start_col: span.start_col,
                end_line: span.end_line,
                end_col: span.end_col,
                reason,
                severity_tag,
                doc,
            }),
            _ => ClassifiedRecord::PlainText,
        },
        None if reason.is_none() && record.severity.as_deref() == Some(OUTPUT_SEVERITY) => record
            .doc
            .as_deref()
            .and_then(compiling_source)
            .map_or(ClassifiedRecord::PlainText, |source_path| {
                ClassifiedRecord::CompilationStarting { source_path }
            }),
        None => ClassifiedRecord::PlainText,
    }
}

fn classify_text(line: &str, sentinel: &PromptSentinel) -> ClassifiedRecord {
    if sentinel.matches(line) {
        return ClassifiedRecord::PromptSentinel;
    }
    // GHCi without -ddump-json still prints progress lines as text.
    match compiling_source(line) {
        Some(source_path) => ClassifiedRecord::CompilationStarting { source_path },
        None => ClassifiedRecord::PlainText,
    }
}

/// `reason` is a string in older GHCs and a structured value in newer ones.
fn reason_text(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn compiling_source(text: &str) -> Option<String> {
    COMPILING
        .captures(text)
        .and_then(|caps| caps.get(4))
        .map(|m| m.as_str().to_string())
}
