use crate::error::{Result, SearchError};
use crate::mcp::protocol::*;
use crate::mcp::tools::{get_tools, HEALTH_CHECK, IMAGE_SEARCH};
use crate::search::{ErrorBody, SearchOrchestrator, SearchRequest};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// In-flight tool calls by JSON-RPC id
type InFlight = Arc<Mutex<HashMap<String, AbortHandle>>>;

/// MCP server over newline-delimited JSON-RPC.
///
/// Tool calls run as independent tasks, so a slow search does not hold up
/// other requests; responses are written by a single writer task in
/// completion order.
pub struct McpServer {
    search: Arc<SearchOrchestrator>,
    in_flight: InFlight,
}

impl McpServer {
    pub fn new(search: Arc<SearchOrchestrator>) -> Self {
        Self {
            search,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run the MCP server (stdio mode)
    pub async fn run(&self) -> Result<()> {
        info!("MCP server started (stdio mode)");
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve requests from `input` until it closes, then finish pending calls
    pub async fn serve<R, W>(&self, input: R, output: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_responses(rx, output));
        let mut tasks = JoinSet::new();
        let mut input = BufReader::new(input);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if input.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line.trim(),
                Err(e) => {
                    warn!(error = %e, "Received input that is not UTF-8");
                    let _ = tx.send(JsonRpcResponse::error(
                        None,
                        PARSE_ERROR,
                        format!("Parse error: {}", e),
                    ));
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            debug!("Received: {}", line);

            if let Some(response) = self.dispatch(line, &tx, &mut tasks) {
                let _ = tx.send(response);
            }
            while tasks.try_join_next().is_some() {}
        }

        debug!(pending = tasks.len(), "Input closed, waiting for in-flight requests");
        while tasks.join_next().await.is_some() {}
        drop(tx);

        writer
            .await
            .map_err(|e| SearchError::Internal(format!("Response writer failed: {}", e)))?
    }

    /// Handle one input line; returns the response to send right away, if any
    fn dispatch(
        &self,
        line: &str,
        tx: &UnboundedSender<JsonRpcResponse>,
        tasks: &mut JoinSet<()>,
    ) -> Option<JsonRpcResponse> {
        let raw: Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Received invalid JSON");
                return Some(JsonRpcResponse::error(
                    None,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                ));
            }
        };

        if !raw.is_object() {
            return Some(JsonRpcResponse::error(
                None,
                INVALID_REQUEST,
                "Invalid request: expected a JSON object".to_string(),
            ));
        }

        // JSON-RPC 2.0: Notifications MUST NOT be responded to
        if raw.get("id").is_none_or(|v| v.is_null()) {
            self.handle_notification(&raw);
            return None;
        }

        let id = raw.get("id").cloned();
        let request: JsonRpcRequest = match serde_json::from_value(raw) {
            Ok(request) => request,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    id,
                    INVALID_REQUEST,
                    format!("Invalid JSON-RPC request: {}", e),
                ))
            }
        };
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                request.id,
                INVALID_REQUEST,
                format!("Unsupported JSON-RPC version: {}", request.jsonrpc),
            ));
        }

        let response = match request.method.as_str() {
            "initialize" => {
                let params: InitializeParams = request
                    .params
                    .and_then(|p| serde_json::from_value(p).ok())
                    .unwrap_or_default();
                if let Some(client) = params.client_info {
                    info!(
                        client = %client.name,
                        version = %client.version,
                        protocol = %params.protocol_version,
                        "Client connected"
                    );
                }
                to_response(request.id, &InitializeResult::new())
            }
            // ping returns an empty object
            "ping" => JsonRpcResponse::success(request.id, json!({})),
            "tools/list" => to_response(request.id, &ToolsListResult { tools: get_tools() }),
            "tools/call" => return self.spawn_tool_call(request.id, request.params, tx, tasks),
            "resources/list" => JsonRpcResponse::success(request.id, json!({ "resources": [] })),
            "resources/templates/list" => {
                JsonRpcResponse::success(request.id, json!({ "resourceTemplates": [] }))
            }
            "prompts/list" => JsonRpcResponse::success(request.id, json!({ "prompts": [] })),
            _ => JsonRpcResponse::error(
                request.id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        };
        Some(response)
    }

    /// Handle JSON-RPC notifications (no response expected)
    fn handle_notification(&self, raw: &Value) {
        let method = raw
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown");

        match method {
            "notifications/initialized" => {
                info!("Client initialized successfully");
            }
            "notifications/cancelled" => {
                let request_id = raw
                    .pointer("/params/requestId")
                    .cloned()
                    .unwrap_or(Value::Null);
                let key = request_key(&request_id);
                match self.in_flight.lock().remove(&key) {
                    Some(handle) => {
                        handle.abort();
                        info!(request_id = %key, "Cancelled in-flight request");
                    }
                    None => debug!(request_id = %key, "Cancellation for unknown or finished request"),
                }
            }
            _ => {
                debug!("Unhandled notification: {}", method);
            }
        }
    }

    fn spawn_tool_call(
        &self,
        id: Option<Value>,
        params: Option<Value>,
        tx: &UnboundedSender<JsonRpcResponse>,
        tasks: &mut JoinSet<()>,
    ) -> Option<JsonRpcResponse> {
        let params: ToolCallParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return Some(JsonRpcResponse::error(
                    id,
                    INVALID_PARAMS,
                    format!("Invalid tool call params: {}", e),
                ))
            }
            None => {
                return Some(JsonRpcResponse::error(
                    id,
                    INVALID_PARAMS,
                    "Missing tool call parameters".to_string(),
                ))
            }
        };

        let key = request_key(id.as_ref().unwrap_or(&Value::Null));

        // Held until the handle is registered so the task cannot finish unregistered
        let mut in_flight = self.in_flight.lock();
        if in_flight.contains_key(&key) {
            return Some(JsonRpcResponse::error(
                id,
                INVALID_REQUEST,
                format!("Request id {} is already in flight", key),
            ));
        }

        let search = self.search.clone();
        let registry = self.in_flight.clone();
        let tx = tx.clone();
        let task_key = key.clone();

        let handle = tasks.spawn(async move {
            let result = call_tool(search, params).await;

            // Missing from the registry: the client cancelled, drop the result
            if registry.lock().remove(&task_key).is_none() {
                debug!(request_id = %task_key, "Discarding result of cancelled request");
                return;
            }
            let _ = tx.send(to_response(id, &result));
        });
        in_flight.insert(key, handle);
        None
    }
}

fn request_key(id: &Value) -> String {
    id.to_string()
}

fn to_response<T: Serialize>(id: Option<Value>, value: &T) -> JsonRpcResponse {
    match serde_json::to_value(value) {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Serialization error: {}", e)),
    }
}

async fn write_responses<W>(mut rx: UnboundedReceiver<JsonRpcResponse>, mut output: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let response_json = match serde_json::to_string(&response) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to serialize response");
                continue;
            }
        };

        debug!("Sending: {}", response_json);
        output.write_all(response_json.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    Ok(())
}

async fn call_tool(search: Arc<SearchOrchestrator>, params: ToolCallParams) -> ToolResult {
    match params.name.as_str() {
        IMAGE_SEARCH => image_search(search, params.arguments).await,
        HEALTH_CHECK => ToolResult::success(json!({ "status": "healthy" }).to_string()),
        other => ToolResult::error(format!("Unknown tool: {}", other)),
    }
}

async fn image_search(search: Arc<SearchOrchestrator>, arguments: Value) -> ToolResult {
    let request: SearchRequest = match serde_json::from_value(arguments) {
        Ok(request) => request,
        Err(e) => {
            return error_result(&SearchError::InvalidArgument(format!(
                "Invalid search arguments: {}",
                e
            )))
        }
    };

    info!(
        image = %request.image_url,
        brand = ?request.brand,
        min_price = ?request.min_price,
        max_price = ?request.max_price,
        top_k = ?request.top_k,
        "Image search requested"
    );

    // Fetching and inference block; keep them off the async workers
    let outcome = tokio::task::spawn_blocking(move || search.search(&request)).await;

    let result = match outcome {
        Ok(result) => result,
        Err(e) => Err(SearchError::Internal(format!("Search task failed: {}", e))),
    };

    match result.and_then(|response| {
        serde_json::to_string(&response)
            .map_err(|e| SearchError::Internal(format!("Serialization error: {}", e)))
    }) {
        Ok(text) => ToolResult::success(text),
        Err(e) => error_result(&e),
    }
}

fn error_result(err: &SearchError) -> ToolResult {
    let status = err.status_code();
    if status >= 500 {
        error!(status, error = %err, "Search failed");
    } else {
        warn!(status, error = %err, "Search rejected");
    }

    let body = ErrorBody::from(err);
    let text = serde_json::to_string(&body)
        .unwrap_or_else(|_| json!({ "error": body.error }).to_string());
    ToolResult::error(text)
}
