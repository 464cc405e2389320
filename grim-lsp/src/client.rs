//! A JSON-RPC client for one language server: outbound request
//! construction, id correlation, the initialize handshake, and a reader
//! loop that runs on its own OS thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::jsonrpc;
use crate::transport::{ReadHalf, TransportError, WriteHalf};
use crate::Error;

/// What kind of request an in-flight id belongs to. Exactly one entry per
/// id lives in the pending table until the response arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Hover,
    Definition,
    Completion,
}

/// A resolved response, already reduced to the fields the editor consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum LspResponse {
    Hover {
        request_id: u32,
        contents: String,
    },
    Definition {
        request_id: u32,
        uri: String,
        line: u64,
        character: u64,
    },
    Completion {
        request_id: u32,
        result: Value,
    },
}

/// `textDocument/publishDiagnostics` payload handed to the diagnostics sink.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishDiagnostics {
    pub uri: String,
    pub diagnostics: Vec<Value>,
}

pub type DiagnosticsSink = Box<dyn Fn(PublishDiagnostics) + Send + Sync>;
pub type ResponseSink = Box<dyn Fn(LspResponse) + Send + Sync>;

pub struct Client {
    name: String,
    reader: Arc<Mutex<Box<dyn ReadHalf>>>,
    writer: Mutex<Box<dyn WriteHalf>>,
    request_counter: AtomicU32,
    pending: Mutex<HashMap<u32, RequestKind>>,
    pending_initialize: Mutex<Option<u32>>,
    initialized: AtomicBool,
    running: Arc<AtomicBool>,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
    diagnostics_sink: Mutex<Option<Arc<DiagnosticsSink>>>,
    response_sink: Mutex<Option<Arc<ResponseSink>>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(name: impl Into<String>, reader: Box<dyn ReadHalf>, writer: Box<dyn WriteHalf>) -> Self {
        Self {
            name: name.into(),
            reader: Arc::new(Mutex::new(reader)),
            writer: Mutex::new(writer),
            request_counter: AtomicU32::new(1),
            pending: Mutex::new(HashMap::new()),
            pending_initialize: Mutex::new(None),
            initialized: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
            reader_thread: Mutex::new(None),
            diagnostics_sink: Mutex::new(None),
            response_sink: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_diagnostics_sink(&self, sink: DiagnosticsSink) {
        *self.diagnostics_sink.lock() = Some(Arc::new(sink));
    }

    pub fn set_response_sink(&self, sink: ResponseSink) {
        *self.response_sink.lock() = Some(Arc::new(sink));
    }

    fn next_request_id(&self) -> u32 {
        self.request_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn write(&self, body: &[u8]) -> Result<(), Error> {
        self.writer.lock().write_message(body)?;
        Ok(())
    }

    fn request(&self, method: &str, params: Value, kind: Option<RequestKind>) -> Result<u32, Error> {
        let id = self.next_request_id();
        let call = jsonrpc::MethodCall {
            jsonrpc: Some(jsonrpc::Version::V2),
            method: method.to_string(),
            params,
            id: jsonrpc::Id::Num(id as u64),
        };
        if let Some(kind) = kind {
            self.pending.lock().insert(id, kind);
        }
        let body = serde_json::to_vec(&call)?;
        if let Err(err) = self.write(&body) {
            // the request never left, drop the pending entry again
            self.pending.lock().remove(&id);
            return Err(err);
        }
        Ok(id)
    }

    fn notify(&self, method: &str, params: Value) -> Result<(), Error> {
        let notification = jsonrpc::Notification {
            jsonrpc: Some(jsonrpc::Version::V2),
            method: method.to_string(),
            params,
        };
        let body = serde_json::to_vec(&notification)?;
        self.write(&body)
    }

    /// Send `initialize` and remember its id; the matching response flips
    /// the initialized flag.
    pub fn send_initialize(&self, root_uri: &str) -> Result<u32, Error> {
        let params = json!({
            "processId": Value::Null,
            "rootUri": root_uri,
            "capabilities": {},
        });
        let id = self.request("initialize", params, None)?;
        *self.pending_initialize.lock() = Some(id);
        Ok(id)
    }

    /// The `initialized` notification, sent after the handshake completes.
    pub fn send_initialized(&self) -> Result<(), Error> {
        self.notify("initialized", json!({}))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Block until the handshake completes or `timeout` passes.
    pub fn wait_initialized(&self, timeout: Duration) -> Result<(), Error> {
        let start = Instant::now();
        while !self.is_initialized() {
            if start.elapsed() > timeout {
                return Err(Error::InitializationFailed);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }

    pub fn did_open(&self, uri: &str, language_id: &str, text: &str) -> Result<(), Error> {
        self.notify(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": uri,
                    "languageId": language_id,
                    "version": 0,
                    "text": text,
                }
            }),
        )
    }

    /// Whole-document sync: `contentChanges` is a singleton with the full
    /// buffer text.
    pub fn did_change(&self, uri: &str, version: i32, text: &str) -> Result<(), Error> {
        self.notify(
            "textDocument/didChange",
            json!({
                "textDocument": { "uri": uri, "version": version },
                "contentChanges": [ { "text": text } ],
            }),
        )
    }

    pub fn did_save(&self, uri: &str) -> Result<(), Error> {
        self.notify(
            "textDocument/didSave",
            json!({ "textDocument": { "uri": uri } }),
        )
    }

    pub fn did_close(&self, uri: &str) -> Result<(), Error> {
        self.notify(
            "textDocument/didClose",
            json!({ "textDocument": { "uri": uri } }),
        )
    }

    pub fn hover(&self, uri: &str, line: u32, character: u32) -> Result<u32, Error> {
        self.request(
            "textDocument/hover",
            position_params(uri, line, character),
            Some(RequestKind::Hover),
        )
    }

    pub fn goto_definition(&self, uri: &str, line: u32, character: u32) -> Result<u32, Error> {
        self.request(
            "textDocument/definition",
            position_params(uri, line, character),
            Some(RequestKind::Definition),
        )
    }

    pub fn completion(&self, uri: &str, line: u32, character: u32) -> Result<u32, Error> {
        self.request(
            "textDocument/completion",
            position_params(uri, line, character),
            Some(RequestKind::Completion),
        )
    }

    pub fn shutdown(&self) -> Result<u32, Error> {
        self.request("shutdown", Value::Null, None)
    }

    pub fn exit(&self) -> Result<(), Error> {
        self.notify("exit", Value::Null)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Read and dispatch one message from the server.
    pub fn poll(&self) -> Result<(), Error> {
        let body = self.reader.lock().read_message()?;
        self.handle_payload(&body)
    }

    /// Dispatch one raw message body.
    ///
    /// Responses are matched against the pending-initialize slot first, then
    /// the pending-request table; ids nobody is waiting for are ignored.
    /// The only server notification the core understands is
    /// `textDocument/publishDiagnostics`; all other methods are ignored.
    pub fn handle_payload(&self, body: &[u8]) -> Result<(), Error> {
        let value: Value = serde_json::from_slice(body).map_err(|_| Error::InvalidMessage)?;
        let message = value.as_object().ok_or(Error::InvalidMessage)?;

        if let Some(id) = message.get("id").and_then(Value::as_u64) {
            let id = id as u32;
            if self.try_complete_initialize(id) {
                return Ok(());
            }
            let Some(kind) = self.pending.lock().remove(&id) else {
                return Ok(());
            };
            let null = Value::Null;
            let result = message.get("result").unwrap_or(&null);
            if let Some(response) = reduce_response(id, kind, result) {
                if let Some(sink) = self.response_sink.lock().clone() {
                    sink(response);
                }
            }
            return Ok(());
        }

        if message.get("method").and_then(Value::as_str)
            == Some("textDocument/publishDiagnostics")
        {
            let null = Value::Null;
            let params = message.get("params").unwrap_or(&null);
            let publish = PublishDiagnostics {
                uri: params
                    .get("uri")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                diagnostics: params
                    .get("diagnostics")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            };
            if let Some(sink) = self.diagnostics_sink.lock().clone() {
                sink(publish);
            }
        }

        Ok(())
    }

    fn try_complete_initialize(&self, id: u32) -> bool {
        let mut slot = self.pending_initialize.lock();
        if *slot == Some(id) {
            *slot = None;
            self.initialized.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Spawn the reader thread. It polls until the stream ends or
    /// [`Client::stop_reader_loop`] clears the running flag; errors other
    /// than end-of-stream are logged and the loop keeps going.
    pub fn start_reader_loop(self: &Arc<Self>) {
        self.running.store(true, Ordering::Release);
        let client = Arc::clone(self);
        let handle = std::thread::spawn(move || {
            while client.running.load(Ordering::Acquire) {
                match client.poll() {
                    Ok(()) => {}
                    Err(Error::Transport(TransportError::EndOfStream)) => {
                        log::info!("{}: server closed its stream", client.name);
                        break;
                    }
                    Err(err) => {
                        log::error!("{}: {}", client.name, err);
                    }
                }
            }
            client.running.store(false, Ordering::Release);
        });
        *self.reader_thread.lock() = Some(handle);
    }

    pub fn reader_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clear the running flag and join the reader thread. The caller is
    /// responsible for closing the transport if the reader is parked in a
    /// blocking read.
    pub fn stop_reader_loop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.reader_thread.lock().take() {
            if handle.join().is_err() {
                log::error!("{}: reader thread panicked", self.name);
            }
        }
    }
}

fn position_params(uri: &str, line: u32, character: u32) -> Value {
    json!({
        "textDocument": { "uri": uri },
        "position": { "line": line, "character": character },
    })
}

/// Pull the editor-facing fields out of a response per request kind:
/// hover keeps the contents string (plain or MarkupContent value),
/// definition keeps the start position of the first location, completion
/// passes the raw result through.
fn reduce_response(id: u32, kind: RequestKind, result: &Value) -> Option<LspResponse> {
    match kind {
        RequestKind::Hover => {
            let contents = result.get("contents")?;
            let text = match contents {
                Value::String(s) => s.clone(),
                Value::Object(markup) => markup.get("value")?.as_str()?.to_string(),
                _ => return None,
            };
            Some(LspResponse::Hover {
                request_id: id,
                contents: text,
            })
        }
        RequestKind::Definition => {
            let location = match result {
                Value::Array(locations) => locations.first()?,
                Value::Object(_) => result,
                _ => return None,
            };
            let start = location.get("range")?.get("start")?;
            Some(LspResponse::Definition {
                request_id: id,
                uri: location.get("uri")?.as_str()?.to_string(),
                line: start.get("line")?.as_u64()?,
                character: start.get("character")?.as_u64()?,
            })
        }
        RequestKind::Completion => Some(LspResponse::Completion {
            request_id: id,
            result: result.clone(),
        }),
    }
}
