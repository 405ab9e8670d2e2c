//! Chrome DevTools Protocol connection.
//!
//! One WebSocket per page target. Requests carry a numeric id; the reader task
//! hands each response to the caller waiting on that id. JavaScript dialogs
//! are accepted as soon as they open, since a pending `alert()` blocks every
//! other command on the page. Other events are logged and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::errors::AutomationError;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

type CdpResult = Result<Value, String>;
type PendingMap = HashMap<u64, oneshot::Sender<CdpResult>>;
type Pending = Arc<Mutex<PendingMap>>;

#[derive(Debug, Serialize)]
struct CdpRequest<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct CdpErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CdpIncoming {
    Response {
        id: u64,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<CdpErrorBody>,
    },
    Event {
        method: String,
        #[serde(default)]
        params: Value,
    },
}

const DIALOG_OPENING: &str = "Page.javascriptDialogOpening";

/// `Page.handleJavaScriptDialog` accepting the dialog described by `params`.
fn accept_dialog(id: u64, params: &Value) -> String {
    tracing::info!(
        kind = params.get("type").and_then(serde_json::Value::as_str).unwrap_or("dialog"),
        message = params.get("message").and_then(serde_json::Value::as_str).unwrap_or_default(),
        "Accepting page dialog"
    );
    serde_json::json!({
        "id": id,
        "method": "Page.handleJavaScriptDialog",
        "params": { "accept": true },
    })
    .to_string()
}

pub struct CdpConnection {
    _io_task: JoinHandle<()>,
    sender: mpsc::UnboundedSender<Message>,
    pending: Pending,
    next_id: Arc<AtomicU64>,
    call_timeout: Duration,
}

impl CdpConnection {
    pub async fn connect(ws_url: &str) -> Result<CdpConnection, AutomationError> {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        tracing::debug!("Connecting to DevTools endpoint {}", ws_url);
        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| AutomationError::Protocol(format!("connect {ws_url}: {e}")))?;

        let (mut sink, mut stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let next_id = Arc::new(AtomicU64::new(1));
        // Weak so the writer still ends once the connection is dropped.
        let reply_tx = tx.downgrade();
        let reply_ids = next_id.clone();

        // Writer task - serializes outgoing commands onto the socket
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    tracing::warn!("DevTools send error: {}", e);
                    break;
                }
            }
        });

        // Reader task - routes responses back to their callers
        let reader_task = tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                if !msg.is_text() {
                    continue;
                }
                let txt = msg.into_text().unwrap_or_default();

                match serde_json::from_str::<CdpIncoming>(&txt) {
                    Ok(CdpIncoming::Response { id, result, error }) => {
                        if let Some(tx) = pending_clone.lock().await.remove(&id) {
                            let _ = tx.send(match error {
                                Some(err) => Err(match err.data {
                                    Some(data) => {
                                        format!("{} ({}): {}", err.message, err.code, data)
                                    }
                                    None => format!("{} ({})", err.message, err.code),
                                }),
                                None => Ok(result.unwrap_or(Value::Null)),
                            });
                        } else {
                            tracing::debug!(id, "Response for an abandoned request");
                        }
                    }
                    Ok(CdpIncoming::Event { method, params }) => {
                        if method == DIALOG_OPENING {
                            let id = reply_ids.fetch_add(1, Ordering::Relaxed);
                            let reply = accept_dialog(id, &params);
                            let sent = reply_tx
                                .upgrade()
                                .is_some_and(|tx| tx.send(Message::Text(reply)).is_ok());
                            if !sent {
                                tracing::warn!("Could not answer {}: writer closed", method);
                            }
                        } else if method == "Runtime.exceptionThrown" {
                            tracing::debug!(details = %params, "Page exception");
                        } else {
                            tracing::trace!(%method, "DevTools event");
                        }
                    }
                    Err(e) => tracing::warn!("Invalid DevTools JSON: {}", e),
                }
            }

            // Dropping the senders wakes every waiter with a cancellation.
            let mut pending = pending_clone.lock().await;
            if !pending.is_empty() {
                tracing::warn!(
                    "DevTools connection closed with {} pending requests",
                    pending.len()
                );
            }
            pending.clear();
        });

        // Combine both tasks into one
        let io_task = tokio::spawn(async move {
            tokio::select! {
                _ = writer_task => {
                    tracing::debug!("DevTools writer finished first");
                }
                _ = reader_task => {
                    tracing::debug!("DevTools reader finished first");
                }
            }
        });

        Ok(CdpConnection {
            _io_task: io_task,
            sender: tx,
            pending,
            next_id,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        })
    }

    /// Send one command and wait for its response.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, AutomationError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel::<CdpResult>();
        self.pending.lock().await.insert(id, tx);

        let payload = serde_json::to_string(&CdpRequest { id, method, params })
            .map_err(|e| AutomationError::Protocol(format!("serialize {method}: {e}")))?;
        tracing::trace!(id, %method, "Sending DevTools command");

        if self.sender.send(Message::Text(payload)).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(AutomationError::Protocol(format!(
                "{method}: DevTools connection is closed"
            )));
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(AutomationError::Protocol(format!("{method}: {err}"))),
            Ok(Err(_canceled)) => Err(AutomationError::Protocol(format!(
                "{method}: connection closed before a response arrived"
            ))),
            Err(_elapsed) => {
                let _ = self.pending.lock().await.remove(&id);
                Err(AutomationError::Timeout(format!(
                    "{method}: no response within {:?}",
                    self.call_timeout
                )))
            }
        }
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self._io_task.abort();
    }
}

/// A scripted DevTools endpoint for exercising the connection and page layers.
#[cfg(test)]
pub(crate) mod fake {
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    use super::DIALOG_OPENING;

    /// Serves one connection and reports every command it receives.
    ///
    /// Commands named in `unanswered` never get a reply. When a
    /// `Runtime.evaluate` expression contains `dialog_after`, an alert opens
    /// and further evaluations stall until the dialog is handled, as in Chrome.
    pub(crate) async fn devtools(
        unanswered: &'static [&'static str],
        dialog_after: Option<&'static str>,
    ) -> (String, mpsc::UnboundedReceiver<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            let mut dialog_open = false;
            let mut stalled: Vec<Value> = Vec::new();

            while let Some(Ok(msg)) = ws.next().await {
                let Ok(text) = msg.into_text() else { continue };
                let Ok(command) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let method = command["method"].as_str().unwrap_or_default().to_string();
                let _ = seen_tx.send(command.clone());
                if unanswered.contains(&method.as_str()) {
                    continue;
                }

                let mut outgoing = Vec::new();
                match method.as_str() {
                    "Runtime.evaluate" if dialog_open => {
                        stalled.push(command);
                    }
                    "Runtime.evaluate" => {
                        outgoing.push(json!({
                            "id": command["id"],
                            "result": { "result": { "type": "string", "value": "ok" } }
                        }));
                        let expression = command["params"]["expression"].as_str();
                        if let (Some(trigger), Some(expression)) = (dialog_after, expression) {
                            if expression.contains(trigger) {
                                dialog_open = true;
                                outgoing.push(json!({
                                    "method": DIALOG_OPENING,
                                    "params": { "type": "alert", "message": "등록되었습니다" }
                                }));
                            }
                        }
                    }
                    "Page.handleJavaScriptDialog" => {
                        dialog_open = false;
                        outgoing.push(json!({ "id": command["id"], "result": {} }));
                        for waiting in stalled.drain(..) {
                            outgoing.push(json!({
                                "id": waiting["id"],
                                "result": { "result": { "type": "string", "value": "ok" } }
                            }));
                        }
                    }
                    _ => outgoing.push(json!({ "id": command["id"], "result": {} })),
                }

                for message in outgoing {
                    if ws.send(Message::Text(message.to_string())).await.is_err() {
                        return;
                    }
                }
            }
        });

        (url, seen_rx)
    }
}
