//! Language server that turns GHCi's JSON diagnostics into editor diagnostics.

pub mod classify;
pub mod codec;
pub mod controller;
pub mod types;

pub(crate) mod diagnostics;
pub(crate) mod protocol;

mod ghci;
mod server;

pub use classify::{ClassifiedRecord, PromptSentinel, SpanDiagnostic, classify};
pub use controller::{Aggregator, ClientSink, SessionState};
pub use ghci::{ExitReport, SessionError};
pub use protocol::RESTART_METHOD;
pub use server::serve;
pub use types::{
    DEFAULT_GHCI_COMMAND, Diagnostic, DiagnosticKey, FileUri, GhciConfig, Range, SERVER_NAME,
    Severity, UriError,
};
