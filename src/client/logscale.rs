use super::rest::segment_url;
use super::transport::Transport;
use crate::error::{ResultExt, ToolError};
use crate::session::Session;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query_string: &'a str,
    start: i64,
    end: i64,
}

/// Synchronous query client for a LogScale tenant.
pub struct LogScaleClient {
    transport: Arc<Transport>,
    tenant: String,
    token: String,
    session: Session,
}

impl LogScaleClient {
    pub fn new(transport: Arc<Transport>, tenant: &str, token: &str, session: Session) -> Self {
        Self {
            transport,
            tenant: tenant.trim_end_matches('/').to_string(),
            token: token.to_string(),
            session,
        }
    }

    /// Run `query` over `repository`, returning one flat object per row.
    pub async fn query(
        &self,
        query: &str,
        repository: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Map<String, Value>>, ToolError> {
        let url = segment_url(&format!("{}/api/v1/repositories", self.tenant), &[repository, "query"])?;
        let body = QueryRequest {
            query_string: query,
            start: start.timestamp_millis(),
            end: end.timestamp_millis(),
        };
        let builder = self
            .transport
            .request_as(&self.session, Method::POST, url.as_str(), &self.token)
            .json(&body);

        self.transport
            .json(&self.session, builder)
            .await
            .with_context(|| format!("failed to query logscale repository {repository:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::serve;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration;

    async fn query(
        Path(repo): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Result<Json<Value>, (StatusCode, String)> {
        if repo == "missing" {
            return Err((StatusCode::NOT_FOUND, "repository not found".into()));
        }
        Ok(Json(json!([{
            "repo": repo,
            "auth": headers.get("authorization").and_then(|v| v.to_str().ok()),
            "content_type": headers.get("content-type").and_then(|v| v.to_str().ok()),
            "queryString": body["queryString"],
            "start": body["start"],
            "end": body["end"],
        }])))
    }

    fn client(base: &str) -> LogScaleClient {
        let transport = Arc::new(Transport::new("platform-token", Duration::from_secs(5)).unwrap());
        LogScaleClient::new(transport, base, "ls-token", Session::background())
    }

    #[tokio::test]
    async fn test_query() {
        let router = Router::new().route("/api/v1/repositories/{repo}/query", post(query));
        let base = serve(router).await;

        let start = Utc.timestamp_opt(1600000000, 0).unwrap();
        let end = Utc.timestamp_opt(1600003600, 0).unwrap();
        let rows = client(&base).query("count()", "sandbox", start, end).await.unwrap();

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row["repo"], "sandbox");
        assert_eq!(row["auth"], "Bearer ls-token");
        assert_eq!(row["content_type"], "application/json");
        assert_eq!(row["queryString"], "count()");
        assert_eq!(row["start"], 1600000000000i64);
        assert_eq!(row["end"], 1600003600000i64);
    }

    #[tokio::test]
    async fn test_repository_stays_one_segment() {
        let router = Router::new().route("/api/v1/repositories/{repo}/query", post(query));
        let base = serve(router).await;
        let now = Utc::now();
        let rows = client(&base).query("*", "../other/query?x", now, now).await.unwrap();
        assert_eq!(rows[0]["repo"], "../other/query?x");
    }

    #[tokio::test]
    async fn test_query_not_found() {
        let router = Router::new().route("/api/v1/repositories/{repo}/query", post(query));
        let base = serve(router).await;
        let now = Utc::now();
        let err = client(&base).query("*", "missing", now, now).await.unwrap_err();
        match err.root() {
            ToolError::Upstream { status, body } => {
                assert_eq!(*status, 404);
                assert_eq!(body, "repository not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
