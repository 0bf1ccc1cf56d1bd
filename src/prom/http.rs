use super::*;
use crate::client::transport::Transport;
use crate::client::rest::{segment_url, QueryParams};
use crate::session::Session;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Prometheus HTTP API client rooted at a base path such as `/data/metrics`.
pub struct PrometheusClient {
    transport: Arc<Transport>,
    base: String,
    session: Session,
}

fn unix(t: DateTime<Utc>) -> String {
    format!("{:.3}", t.timestamp_millis() as f64 / 1000.0)
}

impl PrometheusClient {
    pub fn new(transport: Arc<Transport>, base: &str, session: Session) -> Self {
        Self {
            transport,
            base: base.trim_end_matches('/').to_string(),
            session,
        }
    }

    /// GET `/api/v1/<endpoint...>`, one encoded path segment per element.
    async fn call<T: DeserializeOwned>(&self, endpoint: &[&str], params: &QueryParams) -> Result<(T, Vec<String>), ToolError> {
        let url = segment_url(&format!("{}/api/v1", self.base), endpoint)?;
        let builder = self
            .transport
            .request(&self.session, Method::GET, url.as_str())
            .query(params.as_slice());
        let envelope: Envelope<T> = self.transport.json(&self.session, builder).await?;

        if envelope.status != "success" {
            return Err(ToolError::Internal(format!(
                "prometheus {}: {}",
                envelope.error_type.unwrap_or_default(),
                envelope.error.unwrap_or_default()
            )));
        }
        let data = envelope
            .data
            .ok_or_else(|| ToolError::Internal(format!("prometheus {} returned no data", endpoint.join("/"))))?;
        Ok((data, envelope.warnings))
    }

    fn window(matchers: &[String], start: DateTime<Utc>, end: DateTime<Utc>) -> QueryParams {
        let mut params = QueryParams::new();
        params
            .push_all("match[]", matchers)
            .push("start", unix(start))
            .push("end", unix(end));
        params
    }
}

#[async_trait]
impl PrometheusApi for PrometheusClient {
    async fn query(&self, query: &str, time: DateTime<Utc>) -> Result<QueryOutput, ToolError> {
        let mut params = QueryParams::new();
        params.push("query", query).push("time", unix(time));
        let (value, warnings) = self.call(&["query"], &params).await?;
        Ok(QueryOutput { value, warnings })
    }

    async fn query_range(&self, query: &str, range: Range) -> Result<QueryOutput, ToolError> {
        let mut params = QueryParams::new();
        params
            .push("query", query)
            .push("start", unix(range.start))
            .push("end", unix(range.end))
            .push("step", range.step.num_seconds().max(1));
        let (value, warnings) = self.call(&["query_range"], &params).await?;
        Ok(QueryOutput { value, warnings })
    }

    async fn label_names(
        &self,
        matchers: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>, ToolError> {
        let (names, _) = self.call(&["labels"], &Self::window(matchers, start, end)).await?;
        Ok(names)
    }

    async fn label_values(
        &self,
        label: &str,
        matchers: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>, ToolError> {
        let (values, _) = self
            .call(&["label", label, "values"], &Self::window(matchers, start, end))
            .await?;
        Ok(values)
    }

    async fn series(
        &self,
        matchers: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Labels>, ToolError> {
        let (series, _) = self.call(&["series"], &Self::window(matchers, start, end)).await?;
        Ok(series)
    }

    async fn metadata(&self, metric: &str) -> Result<HashMap<String, Vec<MetricMetadata>>, ToolError> {
        let mut params = QueryParams::new();
        params.push("metric", metric);
        let (metadata, _) = self.call(&["metadata"], &params).await?;
        Ok(metadata)
    }

    async fn rules(&self, kind: Option<&str>) -> Result<Value, ToolError> {
        let mut params = QueryParams::new();
        params.push_opt("type", kind);
        let (rules, _) = self.call(&["rules"], &params).await?;
        Ok(rules)
    }

    async fn alerts(&self) -> Result<Value, ToolError> {
        let (alerts, _) = self.call(&["alerts"], &QueryParams::new()).await?;
        Ok(alerts)
    }

    async fn targets(&self) -> Result<Value, ToolError> {
        let (targets, _) = self.call(&["targets"], &QueryParams::new()).await?;
        Ok(targets)
    }

    async fn build_info(&self) -> Result<Value, ToolError> {
        let (info, _) = self.call(&["status", "buildinfo"], &QueryParams::new()).await?;
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::serve;
    use axum::extract::{Path, RawQuery};
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration as StdDuration;

    fn router() -> Router {
        Router::new()
            .route(
                "/data/metrics/api/v1/query_range",
                get(|RawQuery(q): RawQuery| async move {
                    Json(json!({
                        "status": "success",
                        "warnings": [q.unwrap_or_default()],
                        "data": {
                            "resultType": "matrix",
                            "result": [{"metric": {"cluster": "us-west"}, "values": [[0, "1"], [60, "2"]]}]
                        }
                    }))
                }),
            )
            .route(
                "/data/metrics/api/v1/label/{name}/values",
                get(|Path(name): Path<String>| async move {
                    let data = if name == "service" { json!(["orders", "payments"]) } else { json!([name]) };
                    Json(json!({"status": "success", "data": data}))
                }),
            )
            .route(
                "/data/metrics/api/v1/metadata",
                get(|| async {
                    Json(json!({"status": "success", "data": {"up": [{"type": "gauge", "help": "", "unit": ""}]}}))
                }),
            )
    }

    fn client(base: &str) -> PrometheusClient {
        let transport = Arc::new(Transport::new("", StdDuration::from_secs(5)).unwrap());
        PrometheusClient::new(transport, &format!("{base}/data/metrics"), Session::background())
    }

    #[tokio::test]
    async fn test_query_range() {
        let base = serve(router()).await;
        let start = Utc.timestamp_opt(0, 0).unwrap();
        let output = client(&base)
            .query_range("up", Range::new(start, start + Duration::minutes(1), Duration::seconds(60)))
            .await
            .unwrap();

        let QueryValue::Matrix(series) = output.value else {
            panic!("expected a matrix");
        };
        assert_eq!(series[0].values.len(), 2);
        assert_eq!(output.warnings, vec!["query=up&start=0.000&end=60.000&step=60"]);
    }

    #[tokio::test]
    async fn test_label_values_and_metadata() {
        let base = serve(router()).await;
        let client = client(&base);
        let now = Utc::now();
        let values = client.label_values("service", &[], now, now).await.unwrap();
        assert_eq!(values, vec!["orders", "payments"]);

        let metadata = client.metadata("up").await.unwrap();
        assert_eq!(metadata["up"][0].kind, "gauge");
    }

    #[tokio::test]
    async fn test_label_name_stays_one_segment() {
        let base = serve(router()).await;
        let now = Utc::now();
        let values = client(&base).label_values("../../query?x", &[], now, now).await.unwrap();
        assert_eq!(values, vec!["../../query?x"]);
    }

    #[tokio::test]
    async fn test_unknown_endpoint() {
        let base = serve(router()).await;
        let err = client(&base).build_info().await.unwrap_err();
        assert!(matches!(err, ToolError::Upstream { status: 404, .. }));
    }
}
