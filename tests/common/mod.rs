//! Shared test utilities and fixtures
//!
//! An in-memory LSP client wired to [`yolk_lsp::serve`], plus shell commands
//! that stand in for GHCi.

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use yolk_lsp::GhciConfig;
use yolk_lsp::codec::{FrameReader, FrameWriter};

pub const STATUS_METHOD: &str = "yolk/updateStatusBarItem";

const FRAME_TIMEOUT: Duration = Duration::from_secs(15);

/// `[1 of 1] Compiling Main ...` followed by one error on `src/Main.hs`
/// line 5, columns 3..10.
pub const COMPILING_LINE: &str = "[1 of 1] Compiling Main             ( src/Main.hs, interpreted )";
pub const ERROR_RECORD: &str = r#"{"span":{"file":"src/Main.hs","startLine":5,"startCol":3,"endLine":5,"endCol":10},"doc":"Variable not in scope: foo :: IO ()","severity":"SevError","reason":null}"#;

/// A GHCi stand-in: prints one compile cycle, then echoes every command.
/// Echoing the prompt-setup command prints the sentinel, which is how the
/// server learns the session is idle.
pub fn fake_ghci_command() -> String {
    format!("printf '%s\\n' '{COMPILING_LINE}' '{ERROR_RECORD}'; exec cat")
}

/// Like [`fake_ghci_command`], with a line of invalid UTF-8 between the
/// `Compiling` line and the error record.
pub fn fake_ghci_command_with_invalid_bytes() -> String {
    format!(
        "printf '%s\\n' '{COMPILING_LINE}'; printf '\\377\\376 garbled\\n'; \
         printf '%s\\n' '{ERROR_RECORD}'; exec cat"
    )
}

pub struct TestClient {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
    next_id: u64,
    /// Every frame received so far, in order.
    pub received: Vec<serde_json::Value>,
}

/// Run the server on an in-memory connection.
pub fn start_server(command: &str) -> (TestClient, JoinHandle<anyhow::Result<()>>) {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let (server_read, server_write) = tokio::io::split(server_io);
    let config = GhciConfig {
        command: command.to_string(),
    };
    let handle = tokio::spawn(yolk_lsp::serve(server_read, server_write, config));

    let (client_read, client_write) = tokio::io::split(client_io);
    let client = TestClient {
        reader: FrameReader::new(client_read),
        writer: FrameWriter::new(client_write),
        next_id: 1,
        received: Vec::new(),
    };
    (client, handle)
}

pub fn root_uri(root: &Path) -> String {
    url::Url::from_directory_path(root)
        .expect("absolute root")
        .to_string()
}

pub fn file_uri(path: &Path) -> String {
    url::Url::from_file_path(path)
        .expect("absolute path")
        .to_string()
}

impl TestClient {
    pub async fn request(&mut self, method: &str, params: serde_json::Value) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        }))
        .await;
        id
    }

    pub async fn notify(&mut self, method: &str, params: serde_json::Value) {
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        }))
        .await;
    }

    pub async fn respond(&mut self, id: &serde_json::Value, result: serde_json::Value) {
        self.send(serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result }))
            .await;
    }

    pub async fn send(&mut self, frame: serde_json::Value) {
        self.writer
            .write_frame(&frame)
            .await
            .expect("server connection open");
    }

    /// Next frame from the server, or `None` once it has hung up.
    pub async fn next_frame(&mut self) -> Option<serde_json::Value> {
        let frame = tokio::time::timeout(FRAME_TIMEOUT, self.reader.read_frame())
            .await
            .expect("timed out waiting for a server frame")
            .ok()
            .flatten()?;
        self.received.push(frame.clone());
        Some(frame)
    }

    /// Read frames until one satisfies `pred`.
    pub async fn wait_for(
        &mut self,
        what: &str,
        pred: impl Fn(&serde_json::Value) -> bool,
    ) -> serde_json::Value {
        loop {
            match self.next_frame().await {
                Some(frame) if pred(&frame) => return frame,
                Some(_) => {}
                None => panic!("server closed before {what}; got {:#?}", self.received),
            }
        }
    }

    pub async fn wait_for_response(&mut self, id: u64) -> serde_json::Value {
        self.wait_for("response", |f| f["id"] == id && f.get("method").is_none())
            .await
    }

    pub async fn wait_for_status(&mut self, status: &str) {
        let expected = format!("Yolk: {status}");
        self.wait_for(&expected.clone(), move |f| {
            f["method"] == STATUS_METHOD && f["params"] == expected.as_str()
        })
        .await;
    }

    pub async fn wait_for_log(&mut self, suffix: &str) -> String {
        let frame = self
            .wait_for(suffix, |f| {
                f["method"] == "window/logMessage"
                    && f["params"]["message"]
                        .as_str()
                        .is_some_and(|m| m.ends_with(suffix))
            })
            .await;
        frame["params"]["message"]
            .as_str()
            .unwrap_or_default()
            .to_string()
    }

    /// Next `publishDiagnostics` for `uri`.
    pub async fn wait_for_publish(&mut self, uri: &str) -> Vec<serde_json::Value> {
        let frame = self
            .wait_for("publishDiagnostics", |f| {
                f["method"] == "textDocument/publishDiagnostics" && f["params"]["uri"] == uri
            })
            .await;
        frame["params"]["diagnostics"]
            .as_array()
            .cloned()
            .unwrap_or_default()
    }

    /// `initialize` + `initialized` against `root`.
    pub async fn handshake(&mut self, root: &Path, capabilities: serde_json::Value) {
        let id = self
            .request(
                "initialize",
                serde_json::json!({
                    "processId": null,
                    "rootUri": root_uri(root),
                    "capabilities": capabilities
                }),
            )
            .await;
        let reply = self.wait_for_response(id).await;
        assert!(reply["result"]["capabilities"]["textDocumentSync"]["save"].is_object());
        self.notify("initialized", serde_json::json!({})).await;
    }

    /// `shutdown` + `exit`.
    pub async fn shut_down(&mut self) {
        let id = self.request("shutdown", serde_json::Value::Null).await;
        let reply = self.wait_for_response(id).await;
        assert!(reply["result"].is_null());
        self.notify("exit", serde_json::Value::Null).await;
    }
}

pub async fn join(handle: JoinHandle<anyhow::Result<()>>) -> anyhow::Result<()> {
    tokio::time::timeout(FRAME_TIMEOUT, handle)
        .await
        .expect("server did not stop")
        .expect("server task panicked")
}
