use crate::error::ToolError;
use crate::params::Arguments;
use crate::session::Session;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;

/// Handler half of a tool: `(session, arguments) -> result`.
pub type Handler = Arc<dyn Fn(Session, Arguments) -> BoxFuture<'static, Result<ToolResult, ToolError>> + Send + Sync>;

/// What a tool advertises in `tools/list`.
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub annotations: Option<Value>,
}

impl ToolMetadata {
    pub fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            annotations: None,
        }
    }

    /// Marks the tool as side-effect free for clients that honor hints.
    pub fn read_only(mut self) -> Self {
        self.annotations = Some(json!({"readOnlyHint": true, "openWorldHint": true}));
        self
    }

    pub fn to_json(&self) -> Value {
        let mut tool = json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        });
        if let Some(annotations) = &self.annotations {
            tool["annotations"] = annotations.clone();
        }
        tool
    }
}

/// A named operation: metadata plus the function that serves it.
#[derive(Clone)]
pub struct Tool {
    pub metadata: ToolMetadata,
    handler: Handler,
}

impl Tool {
    pub fn new(metadata: ToolMetadata, handler: Handler) -> Self {
        Self { metadata, handler }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub async fn call(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        (self.handler)(session, args).await
    }
}

/// Build a [`Handler`] that calls `f` with a shared `state`.
pub fn bind<S, F, Fut>(state: &Arc<S>, f: F) -> Handler
where
    S: Send + Sync + 'static,
    F: Fn(Arc<S>, Session, Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolResult, ToolError>> + Send + 'static,
{
    let state = state.clone();
    Arc::new(move |session, args| Box::pin(f(state.clone(), session, args)))
}

/// A group of tools sharing clients and a link builder.
pub trait ToolFamily: Send + Sync {
    fn name(&self) -> &'static str;

    fn tools(self: Arc<Self>) -> Vec<Tool>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Json(Value),
    /// PNG bytes.
    Image(Vec<u8>),
}

/// One content block plus string-keyed metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: Content,
    pub meta: Map<String, Value>,
}

impl ToolResult {
    pub fn json(value: impl serde::Serialize) -> Result<Self, ToolError> {
        Ok(Self {
            content: Content::Json(serde_json::to_value(value)?),
            meta: Map::new(),
        })
    }

    pub fn image(png: Vec<u8>) -> Self {
        Self {
            content: Content::Image(png),
            meta: Map::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }

    pub fn with_link(self, link: impl ToString) -> Self {
        self.with_meta("link", link.to_string())
    }

    pub fn with_warnings(self, warnings: &[String]) -> Self {
        if warnings.is_empty() {
            return self;
        }
        self.with_meta("warnings", warnings.to_vec())
    }

    /// The `tools/call` result object.
    pub fn to_mcp(&self) -> Value {
        let mut result = match &self.content {
            Content::Json(value) => json!({
                "content": [{"type": "text", "text": value.to_string(), "mimeType": "application/json"}],
                "structuredContent": structured(value),
            }),
            Content::Image(png) => json!({
                "content": [{"type": "image", "data": STANDARD.encode(png), "mimeType": "image/png"}],
            }),
        };
        if !self.meta.is_empty() {
            result["_meta"] = Value::Object(self.meta.clone());
        }
        result
    }
}

/// `structuredContent` must be an object; other values get wrapped.
fn structured(value: &Value) -> Value {
    match value {
        Value::Object(_) => value.clone(),
        other => json!({ "result": other }),
    }
}
