//! ReAct prompt template and output parsing.

use crate::mcp::Registry;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Where the model stops so the tool result can be spliced in.
pub const STOP: &str = "\nObservation:";

pub const TEMPLATE: &str = "You are an observability assistant. Today is {today}.

Answer the following question as best you can. You have access to the following tools:

{tool_descriptions}

Use the following format:

Question: the input question you must answer
Thought: you should always think about what to do
Action: the action to take, should be one of [{tool_names}]
Action Input: the input to the action, as a single JSON object matching the tool's input schema
Observation: the result of the action
... (this Thought/Action/Action Input/Observation can repeat N times)
Thought: I now know the final answer
Final Answer: the final answer to the original input question

When an observation contains a data:image/png;base64 URL, embed it in the final answer as a markdown image.

Begin!

Question: {input}
Thought:{agent_scratchpad}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("prompt variable {0:?} has no value")]
    Missing(String),
    #[error("unterminated prompt variable at byte {0}")]
    Unterminated(usize),
}

/// A `{name}` template with some variables bound up front.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
    partials: BTreeMap<String, String>,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            partials: BTreeMap::new(),
        }
    }

    pub fn partial(mut self, name: &str, value: impl Into<String>) -> Self {
        self.partials.insert(name.to_string(), value.into());
        self
    }

    /// Substitute every variable. Per-call values shadow partials.
    pub fn format(&self, values: &[(&str, &str)]) -> Result<String, PromptError> {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        let mut offset = 0;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or(PromptError::Unterminated(offset + open))?;
            let name = &after[..close];
            let value = values
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| *v)
                .or_else(|| self.partials.get(name).map(String::as_str))
                .ok_or_else(|| PromptError::Missing(name.to_string()))?;
            out.push_str(value);
            let consumed = open + 1 + close + 1;
            offset += consumed;
            rest = &rest[consumed..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// The ReAct template with tool names, descriptions and today's date bound.
pub fn react_template(registry: &Registry, today: &str) -> PromptTemplate {
    let names: Vec<&str> = registry.tools().map(|t| t.name()).collect();
    PromptTemplate::new(TEMPLATE)
        .partial("tool_names", names.join(", "))
        .partial("tool_descriptions", tool_descriptions(registry))
        .partial("today", today)
}

/// One entry per tool, with its JSON input schema.
pub fn tool_descriptions(registry: &Registry) -> String {
    registry
        .tools()
        .map(|t| {
            format!(
                "{}: {}\n  input schema: {}",
                t.name(),
                t.metadata.description,
                t.metadata.input_schema
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// What the model asked for in one turn. `log` is the raw model text.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Action { tool: String, input: Value, log: String },
    Finish { answer: String, log: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("could not find an Action or a Final Answer in the model output")]
    NoAction,
    #[error("Action Input is not a JSON object: {0}")]
    BadInput(String),
}

fn field<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    let start = text.rfind(label)? + label.len();
    let value = &text[start..];
    let end = value.find("\nObservation").unwrap_or(value.len());
    Some(value[..end].trim())
}

/// Parse one model turn into a [`Step`].
pub fn parse(text: &str) -> Result<Step, ParseError> {
    if let Some(answer) = field(text, "Final Answer:") {
        return Ok(Step::Finish {
            answer: answer.to_string(),
            log: text.to_string(),
        });
    }

    let input_at = text.rfind("Action Input:").ok_or(ParseError::NoAction)?;
    let action = field(&text[..input_at], "Action:").ok_or(ParseError::NoAction)?;
    let tool = action.lines().next().unwrap_or_default().trim().trim_matches('`').to_string();
    if tool.is_empty() {
        return Err(ParseError::NoAction);
    }

    let raw = field(&text[input_at..], "Action Input:").unwrap_or_default();
    let raw = raw
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let input = if raw.is_empty() {
        Value::Object(Default::default())
    } else {
        match serde_json::from_str::<Value>(raw) {
            Ok(value @ Value::Object(_)) => value,
            Ok(other) => return Err(ParseError::BadInput(other.to_string())),
            Err(e) => return Err(ParseError::BadInput(e.to_string())),
        }
    };
    Ok(Step::Action {
        tool,
        input,
        log: text.to_string(),
    })
}

/// The running transcript the model continues from.
pub fn scratchpad(steps: &[(String, String)]) -> String {
    let mut pad = String::new();
    for (log, observation) in steps {
        pad.push_str(log);
        pad.push_str("\nObservation: ");
        pad.push_str(observation);
        pad.push_str("\nThought:");
    }
    pad
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::ChartOptions;
    use crate::client::ClientProvider;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_format() {
        let template = PromptTemplate::new("{a} and {b}").partial("a", "one").partial("b", "two");
        assert_eq!(template.format(&[]).unwrap(), "one and two");
        assert_eq!(template.format(&[("b", "three")]).unwrap(), "one and three");
        assert_eq!(
            PromptTemplate::new("{missing}").format(&[]),
            Err(PromptError::Missing("missing".into()))
        );
        assert_eq!(PromptTemplate::new("x {open").format(&[]), Err(PromptError::Unterminated(2)));
    }

    #[test]
    fn test_react_template() {
        let clients = Arc::new(ClientProvider::loopback("https://example.invalid").unwrap());
        let registry = crate::mcp::build_registry(clients, ChartOptions::default()).unwrap();
        let prompt = react_template(&registry, "2025-04-01")
            .format(&[("input", "what is the error rate?"), ("agent_scratchpad", "")])
            .unwrap();
        assert!(prompt.contains("Today is 2025-04-01"));
        assert!(prompt.contains("query_prometheus_range: "));
        assert!(prompt.contains("input schema: {"));
        assert!(prompt.ends_with("Question: what is the error rate?\nThought:"));
    }

    #[test]
    fn test_parse_action() {
        let text = " I should look at the request rate.\nAction: query_prometheus_instant\nAction Input: {\"expression\": \"sum(rate(http_requests_total[5m]))\"}";
        let Step::Action { tool, input, .. } = parse(text).unwrap() else {
            panic!("expected an action");
        };
        assert_eq!(tool, "query_prometheus_instant");
        assert_eq!(input, json!({"expression": "sum(rate(http_requests_total[5m]))"}));
    }

    #[test]
    fn test_parse_fenced_and_empty_input() {
        let fenced = "Action: list_prometheus_label_names\nAction Input: ```json\n{\"start\": \"-1h\"}\n```";
        assert!(matches!(parse(fenced).unwrap(), Step::Action { input, .. } if input == json!({"start": "-1h"})));

        let empty = "Action: list_prometheus_label_names\nAction Input:";
        assert!(matches!(parse(empty).unwrap(), Step::Action { input, .. } if input == json!({})));
    }

    #[test]
    fn test_parse_finish_and_errors() {
        let done = " I now know the final answer\nFinal Answer: 42 requests per second";
        assert!(matches!(parse(done).unwrap(), Step::Finish { answer, .. } if answer == "42 requests per second"));

        assert_eq!(parse("I am not sure"), Err(ParseError::NoAction));
        assert!(matches!(
            parse("Action: x\nAction Input: [1]"),
            Err(ParseError::BadInput(_))
        ));
    }

    #[test]
    fn test_scratchpad() {
        let pad = scratchpad(&[(" think\nAction: a\nAction Input: {}".into(), "{\"ok\":true}".into())]);
        assert_eq!(pad, " think\nAction: a\nAction Input: {}\nObservation: {\"ok\":true}\nThought:");
    }
}
