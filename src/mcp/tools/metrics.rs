use crate::chart::{render_matrix, ChartOptions};
use crate::client::ClientProvider;
use crate::common::ptr;
use crate::error::{ResultExt, ToolError};
use crate::mcp::schema::InputSchema;
use crate::mcp::tool::{bind, Tool, ToolFamily, ToolMetadata, ToolResult};
use crate::params::{self, Arguments};
use crate::prom::{QueryValue, Range};
use crate::session::Session;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_STEP_SECONDS: i64 = 60;

/// Prometheus query and metadata tools.
pub struct MetricsTools {
    clients: Arc<ClientProvider>,
    chart: ChartOptions,
}

impl MetricsTools {
    pub fn new(clients: Arc<ClientProvider>, chart: ChartOptions) -> Self {
        Self { clients, chart }
    }

    fn range(args: &Arguments) -> Result<Range, ToolError> {
        let window = params::time_range(args)?;
        let step = params::int(args, "step_seconds", false, DEFAULT_STEP_SECONDS)?;
        if step <= 0 {
            return Err(ToolError::invalid(format!("step_seconds must be positive, got {step}")));
        }
        Ok(Range::new(window.start, window.end, Duration::seconds(step)))
    }

    async fn query_range(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let query = params::string(&args, "query", true, "")?;
        let range = Self::range(&args)?;
        let output = self
            .clients
            .prometheus_data(&session)
            .query_range(&query, range)
            .await
            .context("failed to execute range query")?;

        let link = self
            .clients
            .links()
            .metric_explorer()
            .with_query(&query)
            .with_time_range(range.start, range.end);
        Ok(ToolResult::json(&output.value)?
            .with_warnings(&output.warnings)
            .with_link(link))
    }

    async fn query_instant(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let expression = params::string(&args, "expression", true, "")?;
        let time = params::time(&args, "time", false, Utc::now())?;
        let output = self
            .clients
            .prometheus_data(&session)
            .query(&expression, time)
            .await
            .context("failed to execute instant query")?;

        let link = self
            .clients
            .links()
            .metric_explorer()
            .with_query(&expression)
            .with_time_range(time - Duration::hours(1), time);
        Ok(ToolResult::json(&output.value)?
            .with_warnings(&output.warnings)
            .with_link(link))
    }

    async fn render_range(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let query = params::string(&args, "query", true, "")?;
        let range = Self::range(&args)?;
        let output = self
            .clients
            .prometheus_data(&session)
            .query_range(&query, range)
            .await
            .context("failed to execute range query")?;

        let matrix = match output.value {
            QueryValue::Matrix(matrix) => matrix,
            other => {
                return Err(ToolError::Upstream {
                    status: 502,
                    body: format!("expected a matrix result, got {}", other.kind()),
                })
            }
        };
        let options = ChartOptions {
            title: query.clone(),
            ..self.chart.clone()
        };
        let png = render_matrix(&matrix, &options)?;

        let link = self
            .clients
            .links()
            .metric_explorer()
            .with_query(&query)
            .with_time_range(range.start, range.end);
        Ok(ToolResult::image(png).with_link(link))
    }

    async fn list_series(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let selectors = params::string_array(&args, "selectors", true, &[])?;
        if selectors.is_empty() {
            return Err(ToolError::invalid("at least one selector is required"));
        }
        let window = params::time_range(&args)?;
        let series = self
            .clients
            .prometheus_data(&session)
            .series(&selectors, window.start, window.end)
            .await
            .context("failed to list series")?;
        ToolResult::json(series)
    }

    async fn list_label_names(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let selectors = params::string_array(&args, "selectors", false, &[])?;
        let window = params::time_range(&args)?;
        let names = self
            .clients
            .prometheus_data(&session)
            .label_names(&selectors, window.start, window.end)
            .await
            .context("failed to list label names")?;
        ToolResult::json(names)
    }

    async fn list_label_values(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let label = params::string(&args, "label_name", true, "")?;
        let selectors = params::string_array(&args, "selectors", false, &[])?;
        let window = params::time_range(&args)?;
        let values = self
            .clients
            .prometheus_data(&session)
            .label_values(&label, &selectors, window.start, window.end)
            .await
            .with_context(|| format!("failed to list values of label {label:?}"))?;
        ToolResult::json(values)
    }

    async fn series_metadata(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let metric = params::string(&args, "metric", true, "")?;
        let mut metadata = self
            .clients
            .prometheus_data(&session)
            .metadata(&metric)
            .await
            .with_context(|| format!("failed to get metadata for {metric:?}"))?;

        match metadata.remove(&metric).and_then(|entries| entries.into_iter().next()) {
            Some(entry) => ToolResult::json(json!({ "metadata": entry })),
            None => ToolResult::json(json!({})),
        }
    }

    async fn list_rules(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let kind = params::string(&args, "type", false, "")?;
        if !matches!(kind.as_str(), "" | "alert" | "record") {
            return Err(ToolError::invalid(format!("type must be alert or record, got {kind:?}")));
        }
        let rules: Value = self
            .clients
            .prometheus_recording(&session)
            .rules(ptr::non_zero(kind.as_str()))
            .await
            .context("failed to list rules")?;
        ToolResult::json(rules)
    }
}

impl ToolFamily for MetricsTools {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn tools(self: Arc<Self>) -> Vec<Tool> {
        let range_schema = || {
            InputSchema::new()
                .string("query", "PromQL expression", true)
                .time_range()
                .integer(
                    "step_seconds",
                    &format!("Query resolution step in seconds (default: {DEFAULT_STEP_SECONDS})"),
                    false,
                )
                .build()
        };

        vec![
            Tool::new(
                ToolMetadata::new(
                    "query_prometheus_range",
                    "Evaluate a PromQL expression over a time range and return a matrix",
                    range_schema(),
                )
                .read_only(),
                bind(&self, |t, s, a| async move { t.query_range(s, a).await }),
            ),
            Tool::new(
                ToolMetadata::new(
                    "query_prometheus_instant",
                    "Evaluate a PromQL expression at a single instant",
                    InputSchema::new()
                        .string("expression", "PromQL expression", true)
                        .time("time", "Evaluation time (default: now)", false)
                        .build(),
                )
                .read_only(),
                bind(&self, |t, s, a| async move { t.query_instant(s, a).await }),
            ),
            Tool::new(
                ToolMetadata::new(
                    "render_prometheus_range_query",
                    "Evaluate a PromQL range query and render the result as a PNG line chart",
                    range_schema(),
                )
                .read_only(),
                bind(&self, |t, s, a| async move { t.render_range(s, a).await }),
            ),
            Tool::new(
                ToolMetadata::new(
                    "list_prometheus_series",
                    "List the label sets of series matching at least one selector",
                    InputSchema::new()
                        .string_array("selectors", "Series selectors such as up{job=\"api\"}", true)
                        .time_range()
                        .build(),
                )
                .read_only(),
                bind(&self, |t, s, a| async move { t.list_series(s, a).await }),
            ),
            Tool::new(
                ToolMetadata::new(
                    "list_prometheus_label_names",
                    "List label names, optionally restricted to series matching selectors",
                    InputSchema::new()
                        .string_array("selectors", "Series selectors", false)
                        .time_range()
                        .build(),
                )
                .read_only(),
                bind(&self, |t, s, a| async move { t.list_label_names(s, a).await }),
            ),
            Tool::new(
                ToolMetadata::new(
                    "list_prometheus_label_values",
                    "List values of a label, optionally restricted to series matching selectors",
                    InputSchema::new()
                        .string("label_name", "Label to list values of", true)
                        .string_array("selectors", "Series selectors", false)
                        .time_range()
                        .build(),
                )
                .read_only(),
                bind(&self, |t, s, a| async move { t.list_label_values(s, a).await }),
            ),
            Tool::new(
                ToolMetadata::new(
                    "list_prometheus_series_metadata",
                    "Get the type, help and unit of a metric",
                    InputSchema::new().string("metric", "Metric name", true).build(),
                )
                .read_only(),
                bind(&self, |t, s, a| async move { t.series_metadata(s, a).await }),
            ),
            Tool::new(
                ToolMetadata::new(
                    "list_prometheus_rules",
                    "List recording and alerting rule groups",
                    InputSchema::new()
                        .enumeration("type", "Only return rules of this type", &["alert", "record"], false)
                        .build(),
                )
                .read_only(),
                bind(&self, |t, s, a| async move { t.list_rules(s, a).await }),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tool::Content;

    fn family() -> Arc<MetricsTools> {
        let clients = Arc::new(ClientProvider::loopback("https://example.chronosphere.io").unwrap());
        Arc::new(MetricsTools::new(
            clients,
            ChartOptions {
                width: 160,
                height: 120,
                ..Default::default()
            },
        ))
    }

    fn tool(name: &str) -> Tool {
        family().tools().into_iter().find(|t| t.name() == name).unwrap()
    }

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    fn json_content(result: &ToolResult) -> &Value {
        match &result.content {
            Content::Json(value) => value,
            Content::Image(_) => panic!("expected json content"),
        }
    }

    #[tokio::test]
    async fn test_query_range_loopback() {
        let result = tool("query_prometheus_range")
            .call(
                Session::background(),
                args(json!({
                    "query": "sum by (cluster) (rate(container_cpu_usage_seconds_total{}[2m]))",
                    "start": "2025-04-01T00:00:00Z",
                    "end": "2025-04-01T01:00:00Z",
                    "step_seconds": 60
                })),
            )
            .await
            .unwrap();

        let value = json_content(&result);
        assert_eq!(value["resultType"], "matrix");
        let series = value["result"].as_array().unwrap();
        assert_eq!(series.len(), 2);
        let mut clusters: Vec<&str> = series.iter().map(|s| s["metric"]["cluster"].as_str().unwrap()).collect();
        clusters.sort();
        assert_eq!(clusters, vec!["us-central", "us-west"]);
        assert!(series.iter().all(|s| s["values"].as_array().unwrap().len() == 61));

        let link = result.meta["link"].as_str().unwrap();
        assert!(link.starts_with("https://example.chronosphere.io/metrics/explorer-v2?"));
        assert!(link.contains("start=1743465600000"));
    }

    #[tokio::test]
    async fn test_step_must_be_positive() {
        let err = tool("query_prometheus_range")
            .call(Session::background(), args(json!({"query": "up", "step_seconds": 0})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_label_names() {
        let names = tool("list_prometheus_label_names");
        let result = names.call(Session::background(), Arguments::new()).await.unwrap();
        assert_eq!(
            json_content(&result),
            &json!(["__name__", "cluster", "grpc_code", "grpc_method", "namespace", "service"])
        );

        let result = names
            .call(
                Session::background(),
                args(json!({"selectors": ["container_cpu_usage_seconds_total{}"], "start": "-1h"})),
            )
            .await
            .unwrap();
        assert_eq!(
            json_content(&result),
            &json!(["__name__", "cluster", "namespace", "service"])
        );
    }

    #[tokio::test]
    async fn test_series_requires_selector() {
        let err = tool("list_prometheus_series")
            .call(Session::background(), args(json!({"selectors": []})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_metadata_absent_is_empty() {
        let meta = tool("list_prometheus_series_metadata");
        let result = meta
            .call(Session::background(), args(json!({"metric": "no_such_metric"})))
            .await
            .unwrap();
        assert_eq!(json_content(&result), &json!({}));

        let result = meta
            .call(
                Session::background(),
                args(json!({"metric": "container_cpu_usage_seconds_total"})),
            )
            .await
            .unwrap();
        assert_eq!(json_content(&result)["metadata"]["type"], "counter");
    }

    #[tokio::test]
    async fn test_render_returns_png() {
        let result = tool("render_prometheus_range_query")
            .call(
                Session::background(),
                args(json!({"query": "container_memory_usage_bytes{cluster=\"us-west\"}", "start": "-30m"})),
            )
            .await
            .unwrap();
        let Content::Image(png) = &result.content else {
            panic!("expected image content");
        };
        assert_eq!(&png[1..4], b"PNG");
        assert!(result.meta.contains_key("link"));
    }

    #[tokio::test]
    async fn test_render_rejects_string_query() {
        let err = tool("render_prometheus_range_query")
            .call(Session::background(), args(json!({"query": "\"text\""})))
            .await
            .unwrap_err();
        assert!(matches!(err.root(), ToolError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_rules_unimplemented_in_loopback() {
        let err = tool("list_prometheus_rules")
            .call(Session::background(), Arguments::new())
            .await
            .unwrap_err();
        assert!(matches!(err.root(), ToolError::Unimplemented(_)));
        assert_eq!(err.code(), crate::error::METHOD_NOT_FOUND);
    }
}
