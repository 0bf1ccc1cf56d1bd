//! The Prometheus query surface shared by the live HTTP client and the
//! in-process loopback engine.

use crate::error::ToolError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;

mod http;
mod value;

pub use http::PrometheusClient;
pub use value::*;

/// Bounds and resolution of a range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Duration,
}

impl Range {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, step: Duration) -> Self {
        Self { start, end, step }
    }
}

#[async_trait]
pub trait PrometheusApi: Send + Sync {
    async fn query(&self, query: &str, time: DateTime<Utc>) -> Result<QueryOutput, ToolError>;

    async fn query_range(&self, query: &str, range: Range) -> Result<QueryOutput, ToolError>;

    async fn label_names(
        &self,
        matchers: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>, ToolError>;

    async fn label_values(
        &self,
        label: &str,
        matchers: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>, ToolError>;

    async fn series(
        &self,
        matchers: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Labels>, ToolError>;

    /// Metadata keyed by metric name. An empty `metric` asks for everything.
    async fn metadata(&self, metric: &str) -> Result<HashMap<String, Vec<MetricMetadata>>, ToolError>;

    /// Rule groups; `kind` is `alert` or `record` when filtering.
    async fn rules(&self, kind: Option<&str>) -> Result<Value, ToolError>;

    async fn alerts(&self) -> Result<Value, ToolError>;

    async fn targets(&self) -> Result<Value, ToolError>;

    async fn build_info(&self) -> Result<Value, ToolError>;
}
