use super::rest::{QueryParams, RestClient};
use crate::common::ptr;
use crate::error::{ResultExt, ToolError};
use serde_json::Value;

/// Configuration resources reachable under `/api/v1/config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Monitor,
    Dashboard,
    Slo,
    NotificationPolicy,
    RecordingRule,
    RollupRule,
    DropRule,
    MappingRule,
    Collection,
    Team,
    MutingRule,
    TraceBehavior,
    TraceMetricsRule,
    ServiceAccount,
    DerivedLabel,
    DerivedMetric,
    Bucket,
    LogIngestConfig,
    OtelMetricsIngestion,
    TraceTailSamplingRules,
}

/// List filters a resource collection accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    Names,
    Slugs,
    BucketSlugs,
    CollectionSlugs,
    TeamSlugs,
}

impl ListFilter {
    /// Tool parameter and query-string key.
    pub fn key(&self) -> &'static str {
        match self {
            ListFilter::Names => "names",
            ListFilter::Slugs => "slugs",
            ListFilter::BucketSlugs => "bucket_slugs",
            ListFilter::CollectionSlugs => "collection_slugs",
            ListFilter::TeamSlugs => "team_slugs",
        }
    }
}

use ListFilter::*;

impl ResourceKind {
    /// Kinds with `get_<singular>` and `list_<plural>` tools.
    pub const COLLECTIONS: &'static [ResourceKind] = &[
        ResourceKind::Monitor,
        ResourceKind::Dashboard,
        ResourceKind::Slo,
        ResourceKind::NotificationPolicy,
        ResourceKind::RecordingRule,
        ResourceKind::RollupRule,
        ResourceKind::DropRule,
        ResourceKind::MappingRule,
        ResourceKind::Collection,
        ResourceKind::Team,
        ResourceKind::MutingRule,
        ResourceKind::TraceBehavior,
        ResourceKind::TraceMetricsRule,
        ResourceKind::ServiceAccount,
        ResourceKind::DerivedLabel,
        ResourceKind::DerivedMetric,
        ResourceKind::Bucket,
    ];

    /// Kinds with exactly one instance per tenant.
    pub const SINGLETONS: &'static [ResourceKind] = &[
        ResourceKind::LogIngestConfig,
        ResourceKind::OtelMetricsIngestion,
        ResourceKind::TraceTailSamplingRules,
    ];

    /// snake_case name used in tool names and response envelopes.
    pub fn singular(&self) -> &'static str {
        match self {
            ResourceKind::Monitor => "monitor",
            ResourceKind::Dashboard => "dashboard",
            ResourceKind::Slo => "slo",
            ResourceKind::NotificationPolicy => "notification_policy",
            ResourceKind::RecordingRule => "recording_rule",
            ResourceKind::RollupRule => "rollup_rule",
            ResourceKind::DropRule => "drop_rule",
            ResourceKind::MappingRule => "mapping_rule",
            ResourceKind::Collection => "collection",
            ResourceKind::Team => "team",
            ResourceKind::MutingRule => "muting_rule",
            ResourceKind::TraceBehavior => "trace_behavior",
            ResourceKind::TraceMetricsRule => "trace_metrics_rule",
            ResourceKind::ServiceAccount => "service_account",
            ResourceKind::DerivedLabel => "derived_label",
            ResourceKind::DerivedMetric => "derived_metric",
            ResourceKind::Bucket => "bucket",
            ResourceKind::LogIngestConfig => "log_ingest_config",
            ResourceKind::OtelMetricsIngestion => "otel_metrics_ingestion",
            ResourceKind::TraceTailSamplingRules => "trace_tail_sampling_rules",
        }
    }

    pub fn plural(&self) -> String {
        match self {
            ResourceKind::NotificationPolicy => "notification_policies".to_string(),
            kind if kind.is_singleton() => kind.singular().to_string(),
            kind => format!("{}s", kind.singular()),
        }
    }

    pub fn is_singleton(&self) -> bool {
        Self::SINGLETONS.contains(self)
    }

    /// Path segment under `/api/v1/config`.
    pub fn segment(&self) -> String {
        self.plural().replace('_', "-")
    }

    /// Human-readable name for tool descriptions.
    pub fn display(&self) -> String {
        match self {
            ResourceKind::Slo => "SLO".to_string(),
            kind => kind.singular().replace('_', " "),
        }
    }

    pub fn filters(&self) -> &'static [ListFilter] {
        match self {
            ResourceKind::Monitor => &[Names, Slugs, BucketSlugs, CollectionSlugs, TeamSlugs],
            ResourceKind::Dashboard => &[Names, Slugs, BucketSlugs, CollectionSlugs],
            ResourceKind::Slo => &[Names, Slugs, CollectionSlugs],
            ResourceKind::Collection => &[Names, Slugs, TeamSlugs],
            ResourceKind::RecordingRule
            | ResourceKind::RollupRule
            | ResourceKind::MappingRule => &[Names, Slugs, BucketSlugs],
            ResourceKind::NotificationPolicy => &[Names, Slugs, BucketSlugs],
            ResourceKind::LogIngestConfig
            | ResourceKind::OtelMetricsIngestion
            | ResourceKind::TraceTailSamplingRules => &[],
            _ => &[Names, Slugs],
        }
    }

    /// UI page for a single resource, when one exists.
    pub fn ui_path(&self, slug: &str) -> Option<String> {
        match self {
            ResourceKind::Monitor => Some(format!("/monitors/{slug}")),
            ResourceKind::Dashboard => Some(format!("/dashboards/{slug}")),
            ResourceKind::Slo => Some(format!("/slos/{slug}")),
            ResourceKind::Collection => Some(format!("/collections/{slug}")),
            ResourceKind::Team => Some(format!("/teams/{slug}")),
            _ => None,
        }
    }
}

/// Filters and page controls for a `list` call.
#[derive(Debug, Default, Clone)]
pub struct ListQuery {
    pub filters: Vec<(ListFilter, Vec<String>)>,
    pub page_max_size: Option<i64>,
    pub page_token: String,
}

impl ListQuery {
    fn params(&self) -> QueryParams {
        let mut q = QueryParams::new();
        for (filter, values) in &self.filters {
            q.push_all(filter.key(), values);
        }
        q.push_opt("page.max_size", self.page_max_size.filter(|n| *n > 0));
        q.push("page.token", &self.page_token);
        q
    }
}

/// One page of resources.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_token: Option<String>,
}

/// `page.next_token` of a list response, when there is a further page.
pub fn next_page_token(response: &Value) -> Option<String> {
    response
        .pointer("/page/next_token")
        .and_then(Value::as_str)
        .and_then(ptr::non_zero)
        .map(str::to_string)
}

pub struct ConfigClient {
    rest: RestClient,
}

impl ConfigClient {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    fn path(kind: ResourceKind) -> String {
        format!("/api/v1/config/{}", kind.segment())
    }

    pub async fn read(&self, kind: ResourceKind, slug: &str) -> Result<Value, ToolError> {
        let response: Value = self
            .rest
            .get_segments(&Self::path(kind), &[slug], &[])
            .await
            .with_context(|| format!("failed to read {} {slug:?}", kind.display()))?;
        Ok(unwrap_envelope(response, kind.singular()))
    }

    pub async fn read_singleton(&self, kind: ResourceKind) -> Result<Value, ToolError> {
        let response: Value = self
            .rest
            .get(&Self::path(kind), &[])
            .await
            .with_context(|| format!("failed to read {}", kind.display()))?;
        Ok(unwrap_envelope(response, kind.singular()))
    }

    pub async fn list(&self, kind: ResourceKind, query: &ListQuery) -> Result<Page, ToolError> {
        let response: Value = self
            .rest
            .get(&Self::path(kind), query.params().as_slice())
            .await
            .with_context(|| format!("failed to list {}", kind.plural().replace('_', " ")))?;

        let next_token = next_page_token(&response);
        let items = match response.get(kind.plural().as_str()) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        Ok(Page { items, next_token })
    }
}

fn unwrap_envelope(response: Value, key: &str) -> Value {
    match response {
        Value::Object(mut map) if map.contains_key(key) => map.remove(key).unwrap_or(Value::Null),
        other => other,
    }
}
