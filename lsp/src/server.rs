//! Language-server main loop.
//!
//! One task owns all state. Client frames and GHCi events arrive on channels
//! and are handled strictly one at a time; outgoing frames go through a
//! writer task so handlers never block on the client.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::classify::PromptSentinel;
use crate::codec::{CodecError, FrameReader, FrameWriter};
use crate::controller::{Aggregator, ClientSink};
use crate::ghci::{GhciEvent, GhciSession, SessionError, SessionEvent};
use crate::protocol::{
    self, DidSaveParams, Incoming, InitializeParams, MessageType, Notification, RESTART_METHOD,
    Request, STATUS_METHOD,
};
use crate::types::{Diagnostic, FileUri, GhciConfig};

/// Serve one client over `reader`/`writer` until `exit`.
///
/// Returns an error when the client breaks protocol (EOF or `exit` without
/// `shutdown`) or GHCi dies on its own.
pub async fn serve<R, W>(reader: R, writer: W, config: GhciConfig) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<serde_json::Value>();
    let writer_handle = tokio::spawn(async move {
        let mut writer = FrameWriter::new(writer);
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = writer.write_frame(&frame).await {
                tracing::warn!("Client write error: {e}");
                break;
            }
        }
    });

    // `read_frame` is not cancel-safe, so it never sits inside `select!`.
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
    let reader_handle = tokio::spawn(async move {
        let mut reader = FrameReader::new(reader);
        loop {
            let frame = reader.read_frame().await;
            let done = match &frame {
                Ok(Some(_)) | Err(CodecError::Json(_)) => false,
                Ok(None) | Err(_) => true,
            };
            if frame_tx.send(frame).is_err() || done {
                break;
            }
        }
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut server = Server::new(config, Outbox::new(out_tx), event_tx);

    let result = loop {
        let step = tokio::select! {
            frame = frame_rx.recv() => match frame {
                Some(Ok(Some(frame))) => server.handle_frame(&frame),
                Some(Err(CodecError::Json(e))) => {
                    tracing::warn!("Ignoring unparsable client message: {e}");
                    Ok(Flow::Continue)
                }
                Some(Err(e)) => Err(anyhow::Error::new(e).context("reading client message")),
                Some(Ok(None)) | None => server.client_closed(),
            },
            Some(event) = event_rx.recv() => server.handle_event(event),
        };
        match step {
            Ok(Flow::Continue) => {}
            Ok(Flow::Exit) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    server.stop_session();
    drop(server);
    reader_handle.abort();
    // Every sender is gone now; the writer drains what is queued and stops.
    if let Err(e) = writer_handle.await {
        tracing::warn!("Client writer task failed: {e}");
    }

    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    /// Waiting for `initialized`.
    Uninitialized,
    Running,
    /// GHCi was killed on request; its exit starts a new session.
    Restarting,
    ShuttingDown,
}

/// Requests we sent to the client and still expect an answer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingRequest {
    Configuration,
}

/// Production [`ClientSink`]: turns controller output into LSP notifications.
struct Outbox {
    tx: mpsc::UnboundedSender<serde_json::Value>,
    started: Instant,
}

impl Outbox {
    fn new(tx: mpsc::UnboundedSender<serde_json::Value>) -> Self {
        Self {
            tx,
            started: Instant::now(),
        }
    }

    fn send(&self, frame: serde_json::Value) {
        if self.tx.send(frame).is_err() {
            tracing::debug!("Client writer closed; dropping frame");
        }
    }

    fn notify(&self, method: &'static str, params: serde_json::Value) {
        match serde_json::to_value(Notification::new(method, params)) {
            Ok(frame) => self.send(frame),
            Err(e) => tracing::warn!("Serializing {method} failed: {e}"),
        }
    }

    fn request(&self, id: u64, method: &'static str, params: serde_json::Value) {
        match serde_json::to_value(Request::new(id, method, params)) {
            Ok(frame) => self.send(frame),
            Err(e) => tracing::warn!("Serializing {method} request failed: {e}"),
        }
    }

    fn show_error(&self, message: &str) {
        tracing::error!("{message}");
        self.notify(
            "window/showMessage",
            protocol::message_params(MessageType::Error, message),
        );
    }
}

impl ClientSink for Outbox {
    fn publish(&mut self, uri: &FileUri, diagnostics: Vec<Diagnostic>) {
        tracing::debug!(%uri, count = diagnostics.len(), "Publishing diagnostics");
        self.notify(
            "textDocument/publishDiagnostics",
            protocol::publish_diagnostics_params(uri, &diagnostics),
        );
    }

    fn set_status(&mut self, status: &str) {
        self.notify(STATUS_METHOD, serde_json::json!(format!("Yolk: {status}")));
    }

    fn log(&mut self, message: &str) {
        tracing::debug!("{message}");
        let secs = self.started.elapsed().as_secs_f64();
        self.notify(
            "window/logMessage",
            protocol::message_params(MessageType::Info, &format!("{secs:.3} {message}")),
        );
    }
}

struct Server {
    aggregator: Aggregator,
    outbox: Outbox,
    config: GhciConfig,
    session: Option<GhciSession>,
    /// Generation of the newest session; events from older ones are stale.
    generation: u64,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    next_request_id: u64,
    pending: HashMap<u64, PendingRequest>,
    supports_configuration: bool,
    lifecycle: Lifecycle,
    shutdown_requested: bool,
}

impl Server {
    fn new(
        config: GhciConfig,
        outbox: Outbox,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            aggregator: Aggregator::new(root, PromptSentinel::generate()),
            outbox,
            config,
            session: None,
            generation: 0,
            event_tx,
            next_request_id: 1,
            pending: HashMap::new(),
            supports_configuration: false,
            lifecycle: Lifecycle::Uninitialized,
            shutdown_requested: false,
        }
    }

    fn handle_frame(&mut self, frame: &serde_json::Value) -> Result<Flow> {
        let Some(incoming) = Incoming::parse(frame) else {
            tracing::trace!("Ignoring malformed JSON-RPC frame");
            return Ok(Flow::Continue);
        };

        match incoming {
            Incoming::Request { id, method, params } => {
                self.handle_request(&id, &method, params);
                Ok(Flow::Continue)
            }
            Incoming::Notification { method, params } => self.handle_notification(&method, params),
            Incoming::Response { id, result, error } => self.handle_response(id, result, error),
        }
    }

    fn handle_request(
        &mut self,
        id: &serde_json::Value,
        method: &str,
        params: Option<serde_json::Value>,
    ) {
        let reply = match method {
            "initialize" => {
                let params: InitializeParams = params
                    .map(serde_json::from_value::<InitializeParams>)
                    .transpose()
                    .unwrap_or_else(|e| {
                        tracing::warn!("Unreadable initialize params: {e}");
                        None
                    })
                    .unwrap_or_default();
                if let Some(root) = params.root() {
                    tracing::info!(root = %root.display(), "Workspace root");
                    self.aggregator.set_root(root);
                }
                self.supports_configuration = params.supports_configuration();
                protocol::response(id, protocol::initialize_result())
            }
            "shutdown" => {
                self.shutdown_requested = true;
                self.stop_session();
                protocol::response(id, serde_json::Value::Null)
            }
            _ => {
                tracing::debug!("Client sent unsupported request: {method}");
                protocol::error_response(
                    id,
                    protocol::METHOD_NOT_FOUND,
                    &format!("Method not found: {method}"),
                )
            }
        };
        self.outbox.send(reply);
    }

    fn handle_notification(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<Flow> {
        match method {
            "initialized" => {
                self.outbox.log("Initialized.");
                if self.lifecycle == Lifecycle::Uninitialized && !self.configuration_pending() {
                    return self.start_ghci();
                }
            }
            "textDocument/didSave" => {
                match params.map(serde_json::from_value::<DidSaveParams>) {
                    Some(Ok(params)) => {
                        self.outbox
                            .log(&format!("Saved {}.", params.text_document.uri));
                    }
                    Some(Err(e)) => tracing::debug!("Unreadable didSave params: {e}"),
                    None => {}
                }
                self.send_command(":reload");
            }
            RESTART_METHOD => return self.restart(),
            "exit" => {
                if self.shutdown_requested {
                    return Ok(Flow::Exit);
                }
                bail!("exit received before shutdown");
            }
            _ => tracing::trace!("Ignoring notification: {method}"),
        }
        Ok(Flow::Continue)
    }

    fn handle_response(
        &mut self,
        id: u64,
        result: Option<serde_json::Value>,
        error: Option<serde_json::Value>,
    ) -> Result<Flow> {
        match self.pending.remove(&id) {
            Some(PendingRequest::Configuration) => {
                let command = match error {
                    Some(error) => {
                        tracing::warn!("workspace/configuration failed: {error}");
                        None
                    }
                    None => result.as_ref().and_then(protocol::configured_command),
                };
                self.spawn_ghci(command)
            }
            None => {
                tracing::trace!("Ignoring response to unknown request {id}");
                Ok(Flow::Continue)
            }
        }
    }

    fn handle_event(&mut self, event: SessionEvent) -> Result<Flow> {
        if event.generation != self.generation {
            tracing::trace!(generation = event.generation, "Ignoring stale GHCi event");
            return Ok(Flow::Continue);
        }

        match event.event {
            GhciEvent::Stdout(line) => self.aggregator.on_stdout(&line, &mut self.outbox),
            GhciEvent::Stderr(line) => self.aggregator.on_stderr(&line, &mut self.outbox),
            GhciEvent::Exited(report) => {
                self.session = None;
                match self.lifecycle {
                    Lifecycle::Restarting => {
                        tracing::info!("GHCi stopped for restart ({report})");
                        self.aggregator.retract_all(&mut self.outbox);
                        return self.start_ghci();
                    }
                    Lifecycle::ShuttingDown => {
                        tracing::info!("GHCi stopped ({report})");
                    }
                    Lifecycle::Running | Lifecycle::Uninitialized => {
                        if report.is_success() {
                            self.outbox.log("GHCi exited successfully.");
                        } else {
                            let err = SessionError::Exited(report);
                            self.outbox.show_error(&err.to_string());
                            return Err(err.into());
                        }
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// The client hung up without `exit`.
    fn client_closed(&self) -> Result<Flow> {
        if self.shutdown_requested {
            tracing::info!("Client closed the connection after shutdown");
            return Ok(Flow::Exit);
        }
        bail!("client closed the connection without shutdown");
    }

    fn restart(&mut self) -> Result<Flow> {
        if self.configuration_pending() {
            tracing::debug!("GHCi is still starting; ignoring restart");
            return Ok(Flow::Continue);
        }
        match self.lifecycle {
            Lifecycle::Uninitialized | Lifecycle::ShuttingDown | Lifecycle::Restarting => {
                tracing::debug!(lifecycle = ?self.lifecycle, "Ignoring restart");
                Ok(Flow::Continue)
            }
            Lifecycle::Running => {
                let Some(session) = self.session.as_mut() else {
                    // Previous session already ended cleanly.
                    self.aggregator.retract_all(&mut self.outbox);
                    return self.start_ghci();
                };
                self.outbox.set_status("Stopping GHCi");
                self.lifecycle = Lifecycle::Restarting;
                session.kill();
                Ok(Flow::Continue)
            }
        }
    }

    fn configuration_pending(&self) -> bool {
        self.pending
            .values()
            .any(|p| *p == PendingRequest::Configuration)
    }

    fn start_ghci(&mut self) -> Result<Flow> {
        self.outbox.set_status("Starting GHCi");
        self.outbox.log("Starting GHCi ...");

        if self.supports_configuration {
            let id = self.next_request_id;
            self.next_request_id += 1;
            self.pending.insert(id, PendingRequest::Configuration);
            self.outbox.request(
                id,
                "workspace/configuration",
                protocol::configuration_params(),
            );
            return Ok(Flow::Continue);
        }
        self.spawn_ghci(None)
    }

    fn spawn_ghci(&mut self, client_command: Option<String>) -> Result<Flow> {
        if self.shutdown_requested {
            return Ok(Flow::Continue);
        }
        let command = client_command.unwrap_or_else(|| self.config.command.clone());
        tracing::info!(%command, "Starting GHCi");

        self.generation += 1;
        let session = match GhciSession::spawn(
            &command,
            self.aggregator.root(),
            self.generation,
            self.event_tx.clone(),
        ) {
            Ok(session) => session,
            Err(e) => {
                self.outbox.show_error(&e.to_string());
                return Err(e).context("starting GHCi");
            }
        };

        self.aggregator.begin_session(PromptSentinel::generate());
        self.session = Some(session);
        self.lifecycle = Lifecycle::Running;
        let setup = self.aggregator.sentinel().prompt_command();
        self.send_command(&setup);
        Ok(Flow::Continue)
    }

    fn send_command(&mut self, command: &str) {
        let Some(session) = self.session.as_ref() else {
            tracing::debug!("No GHCi session; dropping command {command}");
            return;
        };
        match session.send(command) {
            Ok(()) => self.aggregator.command_sent(command, &mut self.outbox),
            Err(e) => tracing::warn!(generation = session.generation(), "{e}"),
        }
    }

    fn stop_session(&mut self) {
        self.lifecycle = Lifecycle::ShuttingDown;
        if let Some(session) = self.session.as_mut() {
            session.kill();
        }
    }
}
