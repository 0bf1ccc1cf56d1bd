use super::rest::{QueryParams, RestClient};
use crate::error::{ResultExt, ToolError};
use crate::params::TimeRange;
use crate::session::encode_hex;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl From<&TimeRange> for Window {
    fn from(range: &TimeRange) -> Self {
        Self {
            start: range.start,
            end: range.end,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PageRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<i64>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogListRequest {
    pub query: String,
    pub timestamp_filter: Window,
    pub page: PageRequest,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogRangeRequest {
    pub query: String,
    pub timestamp_filter: Window,
    pub page: PageRequest,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogHistogramRequest {
    pub query: String,
    pub timestamp_filter: Window,
    pub step_seconds: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogFieldRequest {
    pub query: String,
    pub timestamp_filter: Window,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub field_name: String,
    pub limit: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceQueryType {
    TraceIds,
    ServiceOperation,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceRequest {
    pub query_type: TraceQueryType,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace_ids: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub operation: String,
}

/// Raw id bytes, base64 on the wire and lowercase hex when shown to a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteId(pub Vec<u8>);

impl ByteId {
    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }
}

impl<'de> Deserialize<'de> for ByteId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        match encoded.as_deref() {
            None | Some("") => Ok(ByteId::default()),
            Some(s) => STANDARD
                .decode(s)
                .map(ByteId)
                .map_err(serde::de::Error::custom),
        }
    }
}

impl Serialize for ByteId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpanLink {
    #[serde(default)]
    pub trace_id: ByteId,
    #[serde(default)]
    pub span_id: ByteId,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Span {
    #[serde(default)]
    pub trace_id: ByteId,
    #[serde(default)]
    pub span_id: ByteId,
    #[serde(default)]
    pub parent_span_id: ByteId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<SpanLink>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Trace {
    #[serde(default)]
    pub spans: Vec<Span>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TraceList {
    #[serde(default)]
    pub traces: Vec<Trace>,
}

#[derive(Debug, Default, Deserialize)]
struct FieldNames {
    #[serde(default)]
    field_names: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FieldValues {
    #[serde(default)]
    values: Vec<Value>,
}

/// Client for `/api/v1/data`.
pub struct DataClient {
    rest: RestClient,
}

impl DataClient {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    pub async fn list_logs(&self, request: &LogListRequest) -> Result<Value, ToolError> {
        self.rest
            .post("/api/v1/data/logs/list", request)
            .await
            .context("failed to list logs")
    }

    pub async fn query_logs_range(&self, request: &LogRangeRequest) -> Result<Value, ToolError> {
        self.rest
            .post("/api/v1/data/logs/range-query", request)
            .await
            .context("failed to query logs")
    }

    pub async fn log_histogram(&self, request: &LogHistogramRequest) -> Result<Value, ToolError> {
        self.rest
            .post("/api/v1/data/logs/histogram", request)
            .await
            .context("failed to get log histogram")
    }

    pub async fn log_field_names(&self, request: &LogFieldRequest) -> Result<Vec<String>, ToolError> {
        let names: FieldNames = self
            .rest
            .post("/api/v1/data/logs/field-names", request)
            .await
            .context("failed to list log field names")?;
        Ok(names.field_names)
    }

    pub async fn log_field_values(&self, request: &LogFieldRequest) -> Result<Vec<Value>, ToolError> {
        let values: FieldValues = self
            .rest
            .post("/api/v1/data/logs/field-values", request)
            .await
            .with_context(|| format!("failed to list values of log field {:?}", request.field_name))?;
        Ok(values.values)
    }

    pub async fn list_traces(&self, request: &TraceRequest) -> Result<TraceList, ToolError> {
        self.rest
            .post("/api/v1/data/traces", request)
            .await
            .context("failed to list traces")
    }

    pub async fn list_events(&self, query: &str, range: &TimeRange, page: &PageRequest) -> Result<Value, ToolError> {
        let mut params = QueryParams::new();
        params
            .push("query", query)
            .push("happened_after", range.start.to_rfc3339())
            .push("happened_before", range.end.to_rfc3339())
            .push_opt("page.max_size", page.max_size)
            .push("page.token", &page.token);
        self.rest
            .get("/api/v1/data/events", params.as_slice())
            .await
            .context("failed to list events")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::serve;
    use crate::client::transport::Transport;
    use crate::session::Session;
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_trace_id_hex() {
        let trace_id: Vec<u8> = (1..=16).collect();
        let span_id: Vec<u8> = (1..=8).collect();
        let span: Span = serde_json::from_value(json!({
            "trace_id": STANDARD.encode(&trace_id),
            "span_id": STANDARD.encode(&span_id),
            "parent_span_id": "",
            "operation": "ListOrders",
        }))
        .unwrap();

        assert_eq!(span.trace_id.to_hex(), "0102030405060708090a0b0c0d0e0f10");
        assert_eq!(span.span_id.to_hex(), "0102030405060708");
        assert_eq!(span.parent_span_id.to_hex(), "");

        let rendered = serde_json::to_value(&span).unwrap();
        assert_eq!(rendered["trace_id"], "0102030405060708090a0b0c0d0e0f10");
        assert_eq!(rendered["parent_span_id"], "");
        assert_eq!(rendered["operation"], "ListOrders");
    }

    #[test]
    fn test_hex_length() {
        for len in [0usize, 1, 8, 16, 32] {
            let id = ByteId(vec![0xff; len]);
            assert_eq!(id.to_hex().len(), 2 * len);
        }
    }

    #[test]
    fn test_link_ids() {
        let trace: Trace = serde_json::from_value(json!({
            "spans": [{
                "span_id": STANDARD.encode([0xab, 0xcd]),
                "links": [{"trace_id": STANDARD.encode([0x01]), "span_id": null}]
            }]
        }))
        .unwrap();
        let rendered = serde_json::to_value(&trace).unwrap();
        assert_eq!(rendered["spans"][0]["span_id"], "abcd");
        assert_eq!(rendered["spans"][0]["links"][0]["trace_id"], "01");
        assert_eq!(rendered["spans"][0]["links"][0]["span_id"], "");
    }

    #[test]
    fn test_trace_request_wire() {
        let request = TraceRequest {
            query_type: TraceQueryType::TraceIds,
            start_time: Utc.timestamp_opt(0, 0).unwrap(),
            end_time: Utc.timestamp_opt(60, 0).unwrap(),
            trace_ids: vec!["abc".into()],
            service: String::new(),
            operation: String::new(),
        };
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["query_type"], "TRACE_IDS");
        assert!(wire.get("service").is_none());
    }

    #[tokio::test]
    async fn test_field_names() {
        let router = Router::new().route(
            "/api/v1/data/logs/field-names",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"field_names": [body["query"].clone(), json!("severity")]}))
            }),
        );
        let base = serve(router).await;
        let transport = Arc::new(Transport::new("", Duration::from_secs(5)).unwrap());
        let client = DataClient::new(RestClient::new(transport, &base, Session::background()));

        let range = TimeRange::new(Utc.timestamp_opt(0, 0).unwrap(), Utc.timestamp_opt(60, 0).unwrap());
        let names = client
            .log_field_names(&LogFieldRequest {
                query: "service".into(),
                timestamp_filter: Window::from(&range),
                field_name: String::new(),
                limit: 100,
            })
            .await
            .unwrap();
        assert_eq!(names, vec!["service", "severity"]);
    }
}
