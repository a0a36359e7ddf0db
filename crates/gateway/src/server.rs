//! Stdio request loop.
//!
//! Newline-delimited JSON requests on stdin, responses on stdout. This is
//! intentionally minimal framing: the MCP wire protocol proper is owned by
//! the host; the dispatcher API is the real contract. Requests run
//! concurrently, responses are serialized through one writer task, and
//! stdin EOF is a clean shutdown.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::dispatcher::{Dispatcher, error_payload};

/// One inbound request frame
#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

/// One outbound response frame
#[derive(Debug, Serialize)]
struct Response {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

impl Response {
    fn result(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(json!({"code": code, "message": message.into()})),
        }
    }
}

/// Runs the request loop until stdin closes.
pub async fn serve(dispatcher: Arc<Dispatcher>) -> std::io::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    let (tx, mut rx) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
            {
                error!("stdout closed; dropping responses");
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    info!("serving tool requests on stdio");
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let dispatcher = Arc::clone(&dispatcher);
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = handle_line(&dispatcher, &line).await;
            match serde_json::to_string(&response) {
                Ok(encoded) => {
                    let _ = tx.send(encoded).await;
                }
                Err(err) => error!(error = %err, "response serialization failed"),
            }
        });
    }

    info!("stdin closed; shutting down");
    drop(tx);
    let _ = writer.await;
    Ok(())
}

async fn handle_line(dispatcher: &Dispatcher, line: &str) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            debug!(error = %err, "unparseable request frame");
            return Response::error(Value::Null, -32700, format!("parse error: {err}"));
        }
    };
    handle_request(dispatcher, request).await
}

async fn handle_request(dispatcher: &Dispatcher, request: Request) -> Response {
    match request.method.as_str() {
        "list_tools" => {
            let tools = dispatcher.list_tools();
            Response::result(request.id, json!({"tools": tools}))
        }
        "call_tool" => {
            let Some(name) = request.params.get("name").and_then(Value::as_str) else {
                return Response::error(request.id, -32602, "params.name is required");
            };
            let arguments = request
                .params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));
            match dispatcher.call_tool(name, arguments).await {
                Ok(output) => Response::result(request.id, json!(output)),
                // Tool failures are structured results, not transport errors.
                Err(err) => Response::result(
                    request.id,
                    json!({"status": "error", "error": error_payload(&err)}),
                ),
            }
        }
        other => Response::error(request.id, -32601, format!("unknown method: {other}")),
    }
}
