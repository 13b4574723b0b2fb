use async_trait::async_trait;
use relaycore::{DataMap, ExecutionContext, ExecutionResult, NodeError, NodeExecutor, NodeType};
use relayruntime::{ExecutorFactory, ExecutorMetadata};
use serde_json::Value;

const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

/// HTTP request node
///
/// Config: `url` (required), `method` (default GET), `headers` (object of
/// strings), `body` (JSON, or a string sent as-is), `allow_error_status`.
/// Output is `{status, body, headers}` laid over the node's input.
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn method(ctx: &ExecutionContext) -> Result<reqwest::Method, NodeError> {
        let method = ctx.config_str("method").unwrap_or("GET").to_uppercase();
        if !METHODS.contains(&method.as_str()) {
            return Err(NodeError::InvalidConfig {
                field: "method".to_string(),
                reason: format!("unsupported method {}", method),
            });
        }
        reqwest::Method::from_bytes(method.as_bytes()).map_err(|e| NodeError::InvalidConfig {
            field: "method".to_string(),
            reason: e.to_string(),
        })
    }

    fn url(ctx: &ExecutionContext) -> Result<&str, NodeError> {
        ctx.require_config("url")?
            .as_str()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| NodeError::InvalidConfig {
                field: "url".to_string(),
                reason: "expected a non-empty string".to_string(),
            })
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestNode {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let (url, method) = match (Self::url(&ctx), Self::method(&ctx)) {
            (Ok(url), Ok(method)) => (url.to_string(), method),
            (Err(err), _) | (_, Err(err)) => {
                return Ok(ExecutionResult::from(err).with_node_type(NodeType::HTTP_REQUEST))
            }
        };

        ctx.events.info(format!("{} {}", method, url));

        let mut request = self.client.request(method.clone(), url.as_str());
        if let Some(Value::Object(headers)) = ctx.config.get("headers") {
            for (key, value) in headers {
                if let Some(val_str) = value.as_str() {
                    request = request.header(key.as_str(), val_str);
                }
            }
        }
        match ctx.config.get("body") {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(json) => request = request.json(json),
        }

        let sent = tokio::select! {
            sent = request.send() => sent,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        };
        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                return Ok(ExecutionResult::failure(format!("HTTP request failed: {}", e))
                    .with_node_type(NodeType::HTTP_REQUEST))
            }
        };

        let status = response.status();
        let headers: DataMap = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
            .collect();

        let body_text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return Ok(ExecutionResult::failure(format!("Failed to read response: {}", e))
                    .with_node_type(NodeType::HTTP_REQUEST))
            }
        };
        // JSON bodies are kept structured so later nodes can address fields.
        let body = serde_json::from_str(&body_text).unwrap_or(Value::String(body_text));

        ctx.events.info(format!("Response status: {}", status.as_u16()));

        let allow_error_status = ctx
            .config
            .get("allow_error_status")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !status.is_success() && !allow_error_status {
            return Ok(ExecutionResult::failure(format!(
                "HTTP {} {} returned status {}",
                method,
                url,
                status.as_u16()
            ))
            .with_node_type(NodeType::HTTP_REQUEST));
        }

        let mut data = ctx.previous_data;
        data.insert("status".to_string(), Value::from(status.as_u16()));
        data.insert("body".to_string(), body);
        data.insert("headers".to_string(), Value::Object(headers));

        Ok(ExecutionResult::ok(data).with_node_type(NodeType::HTTP_REQUEST))
    }

    async fn validate(&self, ctx: &ExecutionContext) -> bool {
        Self::url(ctx).is_ok() && Self::method(ctx).is_ok()
    }
}

pub struct HttpRequestNodeFactory;

impl ExecutorFactory for HttpRequestNodeFactory {
    fn create(&self) -> Box<dyn NodeExecutor> {
        Box::new(HttpRequestNode::new())
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::new("Make HTTP requests", "action")
            .with_input("url", "Request URL", true)
            .with_input("method", "GET, POST, PUT, PATCH or DELETE", false)
            .with_input("headers", "Request headers", false)
            .with_input("body", "Request body", false)
            .with_output("status", "Response status code")
            .with_output("body", "Response body, parsed when JSON")
            .with_output("headers", "Response headers")
    }
}
