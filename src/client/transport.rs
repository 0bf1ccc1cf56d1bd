use crate::common;
use crate::common::ptr;
use crate::error::ToolError;
use crate::session::Session;
use reqwest::header::{HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::{Method, RequestBuilder, StatusCode};
use ringlog::*;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};

pub const TRACEPARENT: &str = "traceparent";

/// Shared HTTP client that stamps identity, credential and trace headers on
/// every outbound request.
///
/// The credential comes from the session when it carries one and from the
/// static process default otherwise.
pub struct Transport {
    client: reqwest::Client,
    default_credential: String,
    user_agent: String,
}

impl Transport {
    pub fn new(default_credential: impl Into<String>, timeout: Duration) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::Internal(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            default_credential: default_credential.into(),
            user_agent: common::user_agent(),
        })
    }

    /// Start a request stamped for `session`.
    pub fn request(&self, session: &Session, method: Method, url: &str) -> RequestBuilder {
        let credential = ptr::or_else(session.credential(), self.default_credential.as_str());
        self.request_as(session, method, url, credential)
    }

    /// Like [`Transport::request`] but with a credential owned by another
    /// upstream, such as a LogScale repository token.
    pub fn request_as(&self, session: &Session, method: Method, url: &str, credential: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .header(USER_AGENT, &self.user_agent)
            .header(TRACEPARENT, session.trace().child().traceparent());

        if !credential.is_empty() {
            if let Ok(mut value) = HeaderValue::from_str(&format!("Bearer {credential}")) {
                value.set_sensitive(true);
                builder = builder.header(AUTHORIZATION, value);
            }
        }
        builder
    }

    /// Send and read the body, racing against the session's cancellation.
    ///
    /// Non-2xx responses become [`ToolError::Upstream`] carrying the raw body.
    pub async fn execute(&self, session: &Session, builder: RequestBuilder) -> Result<Vec<u8>, ToolError> {
        let request = builder.build()?;
        let method = request.method().clone();
        let url = request.url().clone();
        let started = Instant::now();

        let exchange = async {
            let response = self.client.execute(request).await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<(StatusCode, Vec<u8>), ToolError>((status, body.to_vec()))
        };

        let (status, body) = tokio::select! {
            _ = session.cancellation().cancelled() => {
                debug!("{} {} cancelled after {:?}", method, url.path(), started.elapsed());
                return Err(ToolError::Cancelled);
            }
            result = exchange => result?,
        };

        debug!(
            "{} {} -> {} in {:?}",
            method,
            url.path(),
            status.as_u16(),
            started.elapsed()
        );

        if !status.is_success() {
            return Err(ToolError::Upstream {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body)
    }

    /// [`Transport::execute`] then decode the body as JSON.
    pub async fn json<T: DeserializeOwned>(
        &self,
        session: &Session,
        builder: RequestBuilder,
    ) -> Result<T, ToolError> {
        let body = self.execute(session, builder).await?;
        if body.is_empty() {
            return serde_json::from_slice(b"null").map_err(|e| decode_error(e, &body));
        }
        serde_json::from_slice(&body).map_err(|e| decode_error(e, &body))
    }
}

fn decode_error(e: serde_json::Error, body: &[u8]) -> ToolError {
    let preview: String = String::from_utf8_lossy(body).chars().take(200).collect();
    ToolError::Internal(format!("failed to decode upstream response: {e}: {preview}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::serve;
    use crate::session::TraceContext;
    use axum::http::HeaderMap;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    async fn echo_headers(headers: HeaderMap) -> Json<Value> {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        Json(json!({
            "user_agent": get("user-agent"),
            "authorization": get("authorization"),
            "traceparent": get("traceparent"),
        }))
    }

    fn router() -> Router {
        Router::new()
            .route("/headers", get(echo_headers))
            .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "no such thing") }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    "late"
                }),
            )
    }

    #[tokio::test]
    async fn test_stamps_headers() {
        let base = serve(router()).await;
        let transport = Transport::new("static", Duration::from_secs(5)).unwrap();
        let trace = TraceContext::parse("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01").unwrap();

        let session = Session::new("per-call", CancellationToken::new(), trace);
        let url = format!("{base}/headers");
        let seen: Value = transport
            .json(&session, transport.request(&session, Method::GET, &url))
            .await
            .unwrap();

        assert_eq!(seen["user_agent"], common::user_agent());
        assert_eq!(seen["authorization"], "Bearer per-call");
        let tp = seen["traceparent"].as_str().unwrap();
        assert!(tp.starts_with("00-4bf92f3577b34da6a3ce929d0e0e4736-"));
        assert!(!tp.contains("00f067aa0ba902b7"));

        let session = Session::new("", CancellationToken::new(), trace);
        let seen: Value = transport
            .json(&session, transport.request(&session, Method::GET, &url))
            .await
            .unwrap();
        assert_eq!(seen["authorization"], "Bearer static");
    }

    #[tokio::test]
    async fn test_no_credential() {
        let base = serve(router()).await;
        let transport = Transport::new("", Duration::from_secs(5)).unwrap();
        let session = Session::background();
        let url = format!("{base}/headers");
        let seen: Value = transport
            .json(&session, transport.request(&session, Method::GET, &url))
            .await
            .unwrap();
        assert_eq!(seen["authorization"], "");
    }

    #[tokio::test]
    async fn test_upstream_status() {
        let base = serve(router()).await;
        let transport = Transport::new("", Duration::from_secs(5)).unwrap();
        let session = Session::background();
        let url = format!("{base}/missing");
        let err = transport
            .execute(&session, transport.request(&session, Method::GET, &url))
            .await
            .unwrap_err();
        match err {
            ToolError::Upstream { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "no such thing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled() {
        let base = serve(router()).await;
        let transport = Transport::new("", Duration::from_secs(60)).unwrap();
        let session = Session::background();
        let cancel = session.cancellation().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let url = format!("{base}/slow");
        let err = transport
            .execute(&session, transport.request(&session, Method::GET, &url))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }
}
