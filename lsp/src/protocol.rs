//! JSON-RPC message shapes exchanged with the editor.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{Diagnostic, FileUri, SERVER_NAME};

pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

/// `window/logMessage` / `window/showMessage` type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageType {
    Error = 1,
    Info = 3,
}

/// A frame received from the client.
#[derive(Debug, PartialEq)]
pub(crate) enum Incoming {
    Request {
        id: serde_json::Value,
        method: String,
        params: Option<serde_json::Value>,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
    /// Reply to a request we sent.
    Response {
        id: u64,
        result: Option<serde_json::Value>,
        error: Option<serde_json::Value>,
    },
}

impl Incoming {
    pub fn parse(frame: &serde_json::Value) -> Option<Self> {
        let id = frame.get("id");
        let method = frame
            .get("method")
            .and_then(serde_json::Value::as_str)
            .map(String::from);
        let params = frame.get("params").cloned();

        match (id, method) {
            (Some(id), Some(method)) => Some(Self::Request {
                id: id.clone(),
                method,
                params,
            }),
            (None, Some(method)) => Some(Self::Notification { method, params }),
            (Some(id), None) if frame.get("result").is_some() || frame.get("error").is_some() => {
                Some(Self::Response {
                    id: id.as_u64()?,
                    result: frame.get("result").cloned(),
                    error: frame.get("error").cloned(),
                })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: serde_json::Value,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: serde_json::Value,
}

impl Notification {
    pub fn new(method: &'static str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

pub(crate) fn response(id: &serde_json::Value, result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

pub(crate) fn error_response(
    id: &serde_json::Value,
    code: i64,
    message: &str,
) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

/// Custom notification carrying the status bar text.
pub(crate) const STATUS_METHOD: &str = "yolk/updateStatusBarItem";

/// Custom notification asking for a fresh GHCi session.
pub const RESTART_METHOD: &str = "yolk/restartGhci";

pub(crate) fn initialize_result() -> serde_json::Value {
    serde_json::json!({
        "capabilities": {
            "textDocumentSync": { "save": {} }
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InitializeParams {
    #[serde(default)]
    pub root_uri: Option<String>,
    #[serde(default)]
    pub root_path: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
}

impl InitializeParams {
    /// Workspace root: `rootUri`, then the deprecated `rootPath`.
    pub fn root(&self) -> Option<PathBuf> {
        self.root_uri
            .as_deref()
            .and_then(file_uri_to_path)
            .or_else(|| self.root_path.as_ref().map(PathBuf::from))
    }

    pub fn supports_configuration(&self) -> bool {
        self.capabilities
            .pointer("/workspace/configuration")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DidSaveParams {
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TextDocumentIdentifier {
    pub uri: String,
}

pub(crate) fn configuration_params() -> serde_json::Value {
    serde_json::json!({ "items": [{ "section": SERVER_NAME }] })
}

/// `ghci.command` from a `workspace/configuration` result, if set.
pub(crate) fn configured_command(result: &serde_json::Value) -> Option<String> {
    result
        .get(0)
        .and_then(|section| section.pointer("/ghci/command"))
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|command| !command.is_empty())
        .map(String::from)
}

pub(crate) fn publish_diagnostics_params(
    uri: &FileUri,
    diagnostics: &[Diagnostic],
) -> serde_json::Value {
    serde_json::json!({ "uri": uri, "diagnostics": diagnostics })
}

pub(crate) fn message_params(kind: MessageType, message: &str) -> serde_json::Value {
    serde_json::json!({ "type": kind as u8, "message": message })
}

pub(crate) fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}
