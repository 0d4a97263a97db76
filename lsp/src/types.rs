//! Public types shared by the classifier, the store and the server.
//!
//! [`Diagnostic`] serializes directly into the LSP `Diagnostic` shape, so the
//! server never converts between an internal and a wire representation.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize, Serializer};

/// Server name used in the prompt sentinel, custom methods and the status bar.
pub const SERVER_NAME: &str = "yolk";

/// Value of the `source` field on every published diagnostic.
pub const DIAGNOSTIC_SOURCE: &str = SERVER_NAME;

/// Command used when neither the client nor the config file names one.
pub const DEFAULT_GHCI_COMMAND: &str = "cabal repl --repl-options=-ddump-json";

fn default_command() -> String {
    DEFAULT_GHCI_COMMAND.to_string()
}

/// How to launch the GHCi session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GhciConfig {
    /// Shell command line that starts GHCi with JSON diagnostics enabled.
    #[serde(default = "default_command")]
    pub command: String,
}

impl Default for GhciConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
        }
    }
}

/// Protocol severity. GHC output only ever produces these two levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Error = 1,
    Warning = 2,
}

impl Severity {
    /// Map a compiler severity tag.
    ///
    /// Only the warning tags map to `Warning`. Every other tag, including
    /// ones added by future compilers, is reported as an `Error`.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "SevWarning" | "Warning" => Self::Warning,
            _ => Self::Error,
        }
    }

    /// LSP numeric severity (1=Error, 2=Warning).
    #[must_use]
    pub fn as_lsp(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

impl Serialize for Severity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_lsp())
    }
}

/// Zero-based position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// Zero-based span as the editor expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    /// Convert a compiler span (1-based lines and columns) by subtracting one
    /// from every coordinate. A zero coordinate stays at zero.
    #[must_use]
    pub fn from_span(start_line: u32, start_col: u32, end_line: u32, end_col: u32) -> Self {
        Self {
            start: Position {
                line: start_line.saturating_sub(1),
                character: start_col.saturating_sub(1),
            },
            end: Position {
                line: end_line.saturating_sub(1),
                character: end_col.saturating_sub(1),
            },
        }
    }
}

/// Identity of a diagnostic within one file.
///
/// A later diagnostic with an equal key replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiagnosticKey {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
    pub reason: Option<String>,
}

/// A located compiler diagnostic, serialized as an LSP `Diagnostic`.
///
/// Fields are private; construction goes through the store's conversion
/// from a classified record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    #[serde(skip)]
    key: DiagnosticKey,
    range: Range,
    severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    source: &'static str,
    message: String,
}

impl Diagnostic {
    pub(crate) fn new(
        key: DiagnosticKey,
        range: Range,
        severity: Severity,
        code: Option<String>,
        message: String,
    ) -> Self {
        Self {
            key,
            range,
            severity,
            code,
            source: DIAGNOSTIC_SOURCE,
            message,
        }
    }

    #[must_use]
    pub fn key(&self) -> &DiagnosticKey {
        &self.key
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Machine-readable reason, when the compiler gave one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct UriError {
    path: PathBuf,
}

/// `file://` URI of a source file. Key of every per-file structure.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileUri(url::Url);

impl FileUri {
    /// Build the URI for a path reported by the compiler.
    ///
    /// Relative paths are resolved against `root`, the directory GHCi runs in.
    pub fn from_compiler_path(path: &str, root: &Path) -> Result<Self, UriError> {
        let path = Path::new(path);
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        };
        let normalized = normalize_path(&joined);
        url::Url::from_file_path(&normalized)
            .map(Self)
            .map_err(|()| UriError { path: normalized })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for FileUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl Serialize for FileUri {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.as_str())
    }
}

/// Fold `.` and `..` lexically. `..` never climbs above the root.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                if matches!(out.last(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}
