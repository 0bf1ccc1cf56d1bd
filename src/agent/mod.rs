//! ReAct driver over the in-process tool registry.

use crate::error::ToolError;
use crate::mcp::tool::{Content, ToolResult};
use crate::mcp::Registry;
use crate::session::Session;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ringlog::*;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod config;
pub mod llm;
pub mod prompt;

pub use config::AgentConfig;
pub use llm::{ChatClient, LanguageModel, LlmError};
use prompt::{PromptError, PromptTemplate, Step};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error("no final answer after {0} iterations")]
    IterationLimit(usize),
}

/// Render a tool result as the text of an observation.
pub fn observation(result: Result<ToolResult, ToolError>) -> String {
    let result = match result {
        Ok(result) => result,
        Err(e) => return format!("error: {e}"),
    };
    let mut text = match &result.content {
        Content::Json(value) => value.to_string(),
        Content::Image(png) => format!("data:image/png;base64,{}", STANDARD.encode(png)),
    };
    if let Some(Value::String(link)) = result.meta.get("link") {
        text.push_str("\nlink: ");
        text.push_str(link);
    }
    text
}

pub struct Agent {
    registry: Arc<Registry>,
    model: Box<dyn LanguageModel>,
    template: PromptTemplate,
    max_iterations: usize,
    tool_timeout: Duration,
}

impl Agent {
    pub fn new(
        registry: Arc<Registry>,
        model: Box<dyn LanguageModel>,
        max_iterations: usize,
        tool_timeout: Duration,
    ) -> Self {
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let template = prompt::react_template(&registry, &today);
        Self {
            registry,
            model,
            template,
            max_iterations,
            tool_timeout,
        }
    }

    async fn call_tool(&self, tool: &str, input: Value) -> String {
        let Value::Object(args) = input else {
            return "error: Action Input must be a JSON object".to_string();
        };
        let session = Session::background();
        let cancel = session.cancellation().clone();
        match tokio::time::timeout(self.tool_timeout, self.registry.call(tool, session, args)).await {
            Ok(result) => observation(result),
            Err(_) => {
                cancel.cancel();
                warn!("tool {tool} timed out after {:?}", self.tool_timeout);
                format!("error: tool {tool} timed out after {:?}", self.tool_timeout)
            }
        }
    }

    /// Answer one input, streaming model output through `on_chunk`.
    pub async fn run(&self, input: &str, on_chunk: &mut (dyn FnMut(&str) + Send)) -> Result<String, AgentError> {
        let mut steps: Vec<(String, String)> = Vec::new();
        for iteration in 0..self.max_iterations {
            let scratchpad = prompt::scratchpad(&steps);
            let text = self
                .template
                .format(&[("input", input), ("agent_scratchpad", scratchpad.as_str())])?;
            let output = self.model.complete(&text, &[prompt::STOP], on_chunk).await?;

            match prompt::parse(&output) {
                Ok(Step::Finish { answer, .. }) => {
                    debug!("final answer after {} iterations", iteration + 1);
                    return Ok(answer);
                }
                Ok(Step::Action { tool, input, log }) => {
                    debug!("iteration {}: calling {tool}", iteration + 1);
                    let observed = self.call_tool(&tool, input).await;
                    on_chunk(&format!("\nObservation: {observed}\n"));
                    steps.push((log, observed));
                }
                Err(e) => {
                    let observed = format!("Invalid format: {e}. Reply with an Action and Action Input, or a Final Answer.");
                    on_chunk(&format!("\nObservation: {observed}\n"));
                    steps.push((output, observed));
                }
            }
        }
        Err(AgentError::IterationLimit(self.max_iterations))
    }
}
