//! Streaming chat-completions client.

use async_trait::async_trait;
use futures::StreamExt;
use ringlog::*;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("chat completion request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chat completion returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed stream chunk: {0}")]
    Chunk(String),
}

/// A model that continues a prompt, reporting text as it streams in.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        stop: &[&str],
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<String, LlmError>;
}

/// Splits a server-sent event byte stream into `data:` payloads.
///
/// Chunks may end anywhere, including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                events.push(data.trim_start().to_string());
            }
        }
        events
    }
}

/// Text delta of one `chat.completion.chunk`, if any.
pub fn delta(payload: &str) -> Result<Option<String>, LlmError> {
    let chunk: Value = serde_json::from_str(payload).map_err(|e| LlmError::Chunk(e.to_string()))?;
    Ok(chunk
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .map(str::to_string))
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
    temperature: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<&'a str>,
}

/// OpenAI-compatible `/chat/completions` over SSE.
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatClient {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .user_agent(crate::common::user_agent())
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl LanguageModel for ChatClient {
    async fn complete(
        &self,
        prompt: &str,
        stop: &[&str],
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            stream: true,
            temperature: 0.0,
            stop: stop.to_vec(),
        };
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut text = String::new();
        let mut decoder = SseDecoder::default();
        let mut stream = response.bytes_stream();
        'stream: while let Some(bytes) = stream.next().await {
            for payload in decoder.push(&bytes?) {
                if payload == "[DONE]" {
                    break 'stream;
                }
                if let Some(content) = delta(&payload)? {
                    on_chunk(&content);
                    text.push_str(&content);
                }
            }
        }
        trace!("completion of {} bytes", text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::serve;
    use axum::http::{header, HeaderMap};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};

    #[test]
    fn test_decoder_split_lines() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert_eq!(decoder.push(b":1}\r\n\r\ndata: [DONE]\n"), vec!["{\"a\":1}", "[DONE]"]);
        assert!(decoder.push(b": keep-alive\n").is_empty());
    }

    #[test]
    fn test_decoder_split_utf8() {
        let mut decoder = SseDecoder::default();
        let line = "data: é\n".as_bytes();
        assert!(decoder.push(&line[..7]).is_empty());
        assert_eq!(decoder.push(&line[7..]), vec!["é"]);
    }

    #[test]
    fn test_delta() {
        let chunk = r#"{"choices":[{"delta":{"content":"Thought"}}]}"#;
        assert_eq!(delta(chunk).unwrap().as_deref(), Some("Thought"));
        assert_eq!(delta(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(), None);
        assert!(delta("nope").is_err());
    }

    #[tokio::test]
    async fn test_streamed_completion() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer sk-test");
                assert_eq!(body["stream"], true);
                assert_eq!(body["stop"][0], "\nObservation:");
                let events = [
                    r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
                    r#"data: {"choices":[{"delta":{"content":" I know"}}]}"#,
                    r#"data: {"choices":[{"delta":{"content":"\nFinal Answer: 4"}}]}"#,
                    "data: [DONE]",
                ];
                let body = events.join("\n\n") + "\n\n";
                ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
            }),
        );
        let base = serve(router).await;
        let client = ChatClient::new(&format!("{base}/v1/"), "sk-test", "gpt-4o").unwrap();

        let mut streamed = Vec::new();
        let text = client
            .complete("2+2?", &["\nObservation:"], &mut |chunk| streamed.push(chunk.to_string()))
            .await
            .unwrap();
        assert_eq!(text, " I know\nFinal Answer: 4");
        assert_eq!(streamed.len(), 2);
    }

    #[tokio::test]
    async fn test_error_status() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let base = serve(router).await;
        let client = ChatClient::new(&base, "sk-bad", "gpt-4o").unwrap();
        let err = client.complete("hi", &[], &mut |_| {}).await.unwrap_err();
        assert!(matches!(err, LlmError::Status { status: 401, .. }));
    }
}
