use super::registry::Registry;
use crate::common::{COMPONENT, VERSION};
use crate::error::{ToolError, INVALID_PARAMS, METHOD_NOT_FOUND};
use crate::params::Arguments;
use crate::session::Session;
use axum::extract::State;
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use ringlog::*;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// JSON-RPC error code for unparseable messages.
const PARSE_ERROR: i64 = -32700;

/// What the transport knows about the caller of one message.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub credential: Option<String>,
    pub traceparent: Option<String>,
    pub cancel: CancellationToken,
}

/// MCP server state
pub struct Server {
    registry: Arc<Registry>,
    /// Cancellation tokens of in-flight stdio requests, keyed by JSON id.
    in_flight: Mutex<HashMap<String, CancellationToken>>,
}

fn response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

fn error_response(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message.into(),
        }
    })
}

impl Server {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Handle a JSON-RPC message. Notifications produce no response.
    pub async fn handle_message(&self, message: Value, ctx: RequestContext) -> Option<Value> {
        let method = message.get("method").and_then(|m| m.as_str()).unwrap_or_default();
        let id = message.get("id").cloned();
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let Some(id) = id else {
            self.handle_notification(method, &params);
            return None;
        };

        Some(match method {
            "initialize" => {
                info!("initialize from {}", params.pointer("/clientInfo/name").and_then(Value::as_str).unwrap_or("unknown client"));
                response(
                    id,
                    json!({
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": {
                            "tools": {"listChanged": false},
                            "resources": {},
                            "prompts": {},
                        },
                        "serverInfo": {
                            "name": COMPONENT,
                            "version": VERSION,
                        }
                    }),
                )
            }
            "ping" => response(id, json!({})),
            "tools/list" => response(id, json!({ "tools": self.registry.list() })),
            "resources/list" => response(id, json!({ "resources": [] })),
            "prompts/list" => response(id, json!({ "prompts": [] })),
            "tools/call" => match self.call_tool(&params, ctx).await {
                Ok(result) => response(id, result),
                Err(e) => error_response(id, e.code(), e.to_string()),
            },
            other => {
                debug!("unknown method {other:?}");
                error_response(id, METHOD_NOT_FOUND, format!("method not found: {other}"))
            }
        })
    }

    fn handle_notification(&self, method: &str, params: &Value) {
        match method {
            "notifications/initialized" => debug!("client initialized"),
            "notifications/cancelled" => {
                let Some(request_id) = params.get("requestId") else {
                    warn!("cancellation without a requestId");
                    return;
                };
                let key = request_id.to_string();
                match self.in_flight.lock().get(&key) {
                    Some(token) => {
                        debug!("cancelling request {key}");
                        token.cancel();
                    }
                    None => debug!("cancellation for unknown or finished request {key}"),
                }
            }
            other => debug!("ignoring notification {other:?}"),
        }
    }

    async fn call_tool(&self, params: &Value, ctx: RequestContext) -> Result<Value, ToolError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::invalid("tools/call requires a tool name"))?;
        let args: Arguments = match params.get("arguments") {
            None | Some(Value::Null) => Arguments::new(),
            Some(Value::Object(args)) => args.clone(),
            Some(_) => return Err(ToolError::invalid("tool arguments must be an object")),
        };
        let traceparent = ctx.traceparent.clone().or_else(|| {
            params
                .pointer("/_meta/traceparent")
                .and_then(Value::as_str)
                .map(str::to_string)
        });

        let session = Session::from_request(ctx.credential.as_deref(), traceparent.as_deref(), ctx.cancel.clone());
        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
            result = self.registry.call(name, session, args) => result,
        }?;
        Ok(result.to_mcp())
    }

    /// Run the MCP server using stdio
    pub async fn run_stdio(self: Arc<Self>) -> io::Result<()> {
        self.serve_lines(BufReader::new(io::stdin()), io::stdout()).await
    }

    /// Newline-delimited JSON-RPC over any reader and writer.
    ///
    /// Each `tools/call` runs on its own task and responses are written in
    /// completion order.
    pub async fn serve_lines<R, W>(self: Arc<Self>, reader: R, writer: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(message) = rx.recv().await {
                let line = message.to_string();
                trace!("sending response: {line}");
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok::<(), io::Error>(())
        });

        info!("MCP server ready, waiting for messages...");
        let mut lines = reader.lines();
        let mut tasks = tokio::task::JoinSet::new();
        while let Some(line) = lines.next_line().await? {
            while tasks.try_join_next().is_some() {}
            if line.trim().is_empty() {
                continue;
            }
            let message: Value = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(e) => {
                    warn!("failed to parse JSON: {e}");
                    let _ = tx.send(error_response(Value::Null, PARSE_ERROR, format!("parse error: {e}")));
                    continue;
                }
            };

            let is_call = message.get("method").and_then(Value::as_str) == Some("tools/call");
            match message.get("id").cloned() {
                Some(id) if is_call => {
                    let key = id.to_string();
                    let ctx = RequestContext::default();
                    self.in_flight.lock().insert(key.clone(), ctx.cancel.clone());
                    let server = self.clone();
                    let tx = tx.clone();
                    tasks.spawn(async move {
                        if let Some(response) = server.handle_message(message, ctx).await {
                            let _ = tx.send(response);
                        }
                        server.in_flight.lock().remove(&key);
                    });
                }
                _ => {
                    if let Some(response) = self.handle_message(message, RequestContext::default()).await {
                        let _ = tx.send(response);
                    }
                }
            }
        }

        info!("stdin closed, waiting for {} in-flight requests", tasks.len());
        while tasks.join_next().await.is_some() {}
        drop(tx);
        match writer_task.await {
            Ok(result) => result,
            Err(e) => Err(io::Error::other(e)),
        }
    }

    /// JSON-RPC over HTTP at `POST /mcp`.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().route("/mcp", post(http_handler)).with_state(self)
    }

    pub async fn run_http(self: Arc<Self>, listen: SocketAddr) -> io::Result<()> {
        let listener = tokio::net::TcpListener::bind(listen).await?;
        info!("MCP server listening on http://{}/mcp", listener.local_addr()?);
        axum::serve(listener, self.router()).await
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn http_handler(State(server): State<Arc<Server>>, headers: HeaderMap, body: String) -> Response {
    let message: Value = match serde_json::from_str(&body) {
        Ok(Value::Object(message)) => Value::Object(message),
        Ok(_) => {
            return Json(error_response(Value::Null, INVALID_PARAMS, "expected a JSON-RPC object")).into_response()
        }
        Err(e) => return Json(error_response(Value::Null, PARSE_ERROR, format!("parse error: {e}"))).into_response(),
    };

    let ctx = RequestContext {
        credential: bearer(&headers),
        traceparent: headers
            .get(crate::client::transport::TRACEPARENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        cancel: CancellationToken::new(),
    };
    // dropping the guard cancels upstream calls if the client goes away
    let _guard = ctx.cancel.clone().drop_guard();
    match server.handle_message(message, ctx).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::ChartOptions;
    use crate::client::ClientProvider;
    use crate::mcp::tool::{bind, Tool, ToolMetadata, ToolResult};
    use crate::mcp::tools::families;
    use serde_json::json;
    use std::time::Duration;

    fn loopback_server() -> Arc<Server> {
        let clients = Arc::new(ClientProvider::loopback("https://example.invalid").unwrap());
        let mut registry = Registry::new();
        for family in families(clients, ChartOptions::default()) {
            registry.register_family(family).unwrap();
        }
        Arc::new(Server::new(registry))
    }

    /// A server whose only tools echo the session or never finish.
    fn session_echo_server() -> Arc<Server> {
        let state = Arc::new(());
        let mut registry = Registry::new();
        registry
            .register(Tool::new(
                ToolMetadata::new("whoami", "echo the session", json!({"type": "object"})),
                bind(&state, |_, session, _| async move {
                    ToolResult::json(json!({
                        "credential": session.credential(),
                        "trace_id": crate::session::encode_hex(&session.trace().trace_id),
                    }))
                }),
            ))
            .unwrap();
        registry
            .register(Tool::new(
                ToolMetadata::new("hang", "never returns", json!({"type": "object"})),
                bind(&state, |_, _, _| async move {
                    std::future::pending::<()>().await;
                    ToolResult::json("unreachable")
                }),
            ))
            .unwrap();
        Arc::new(Server::new(registry))
    }

    async fn call(server: &Server, message: Value) -> Value {
        server.handle_message(message, RequestContext::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let server = loopback_server();
        let init = call(&server, json!({"jsonrpc": "2.0", "id": 0, "method": "initialize"})).await;
        assert_eq!(init["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(init["result"]["serverInfo"]["name"], "chrono-mcp");

        let list = call(&server, json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})).await;
        let tools = list["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), server.registry().len());
        assert!(tools.iter().all(|t| t["inputSchema"]["type"] == "object"));

        let ping = call(&server, json!({"jsonrpc": "2.0", "id": 2, "method": "ping"})).await;
        assert_eq!(ping["result"], json!({}));
    }

    #[tokio::test]
    async fn test_notifications_and_unknown_methods() {
        let server = loopback_server();
        let none = server
            .handle_message(
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
                RequestContext::default(),
            )
            .await;
        assert!(none.is_none());

        let err = call(&server, json!({"jsonrpc": "2.0", "id": "x", "method": "sampling/createMessage"})).await;
        assert_eq!(err["id"], "x");
        assert_eq!(err["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tools_call_loopback() {
        let server = loopback_server();
        let reply = call(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "tools/call",
                "params": {
                    "name": "query_prometheus_range",
                    "arguments": {
                        "query": "http_requests_total",
                        "start": "2025-04-01T00:00:00Z",
                        "end": "2025-04-01T01:00:00Z",
                        "step_seconds": 60
                    }
                }
            }),
        )
        .await;
        let result = &reply["result"];
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["structuredContent"]["resultType"], "matrix");
        assert!(result["_meta"]["link"].as_str().unwrap().contains("explorer-v2"));
    }

    #[tokio::test]
    async fn test_tools_call_errors() {
        let server = loopback_server();
        let missing = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "query_prometheus_range", "arguments": {"query": null}}}),
        )
        .await;
        assert_eq!(missing["error"]["code"], INVALID_PARAMS);
        assert!(missing["error"]["message"].as_str().unwrap().contains("\"query\""));

        let unknown = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": "nope"}}),
        )
        .await;
        assert_eq!(unknown["error"]["code"], METHOD_NOT_FOUND);

        let bad_args = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": {"name": "nope", "arguments": [1]}}),
        )
        .await;
        assert_eq!(bad_args["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_traceparent_from_meta() {
        let server = session_echo_server();
        let reply = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {
                "name": "whoami",
                "_meta": {"traceparent": "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"}
            }}),
        )
        .await;
        assert_eq!(
            reply["result"]["structuredContent"]["trace_id"],
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
    }

    #[tokio::test]
    async fn test_stdio_cancellation() {
        let server = session_echo_server();
        let (client, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let serving = tokio::spawn(server.serve_lines(BufReader::new(server_read), server_write));

        let (client_read, mut client_write) = tokio::io::split(client);
        let mut replies = BufReader::new(client_read).lines();

        let hang = json!({"jsonrpc": "2.0", "id": 41, "method": "tools/call", "params": {"name": "hang"}});
        client_write.write_all(format!("{hang}\n").as_bytes()).await.unwrap();
        // the ping reply proves the hung call did not block the reader
        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        let first: Value = serde_json::from_str(&replies.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first["id"], 1);

        let cancel = json!({"jsonrpc": "2.0", "method": "notifications/cancelled", "params": {"requestId": 41}});
        client_write.write_all(format!("{cancel}\n").as_bytes()).await.unwrap();
        let second: Value = tokio::time::timeout(Duration::from_secs(5), replies.next_line())
            .await
            .unwrap()
            .unwrap()
            .map(|line| serde_json::from_str(&line).unwrap())
            .unwrap();
        assert_eq!(second["id"], 41);
        assert_eq!(second["error"]["code"], crate::error::REQUEST_CANCELLED);

        client_write.write_all(b"not json\n").await.unwrap();
        let third: Value = serde_json::from_str(&replies.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(third["error"]["code"], PARSE_ERROR);

        drop(replies);
        drop(client_write);
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_http_transport() {
        let server = session_echo_server();
        let base = crate::client::testing::serve(server.router()).await;
        let client = reqwest::Client::new();

        let reply: Value = client
            .post(format!("{base}/mcp"))
            .bearer_auth("caller-token")
            .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "whoami"}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reply["result"]["structuredContent"]["credential"], "caller-token");

        let accepted = client
            .post(format!("{base}/mcp"))
            .json(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .send()
            .await
            .unwrap();
        assert_eq!(accepted.status(), reqwest::StatusCode::ACCEPTED);
    }

    #[test]
    fn test_bearer() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer(&headers), None);
        headers.insert(AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer(&headers).as_deref(), Some("abc"));
        headers.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer(&headers), None);
    }
}
