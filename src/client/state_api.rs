use super::rest::{QueryParams, RestClient};
use crate::error::{ResultExt, ToolError};
use serde_json::Value;

/// Orderings understood by the metric usage endpoints.
pub const USAGE_ORDER_BY: &[&str] = &[
    "VALUABLE",
    "DPPS",
    "UTILITY",
    "REFERENCES",
    "EXECUTIONS",
    "UNIQUE_VALUES",
    "UNIQUE_USERS",
];

#[derive(Debug, Clone, Default)]
pub struct MonitorStatusQuery {
    pub monitor_slugs: Vec<String>,
    pub collection_slugs: Vec<String>,
    pub team_slugs: Vec<String>,
    pub include_signal_statuses: bool,
    pub include_series_statuses: bool,
    pub sort_by: String,
}

#[derive(Debug, Clone, Default)]
pub struct UsageQuery {
    pub glob: String,
    pub order_by: String,
    pub ascending: bool,
    pub lookback_secs: i64,
    pub page_max_size: Option<i64>,
    pub page_token: String,
}

impl UsageQuery {
    fn params(&self, glob_key: &str) -> QueryParams {
        let mut q = QueryParams::new();
        q.push(glob_key, &self.glob)
            .push("order.by", &self.order_by)
            .push_opt("order.ascending", self.ascending.then_some(true))
            .push_opt("lookback_secs", (self.lookback_secs > 0).then_some(self.lookback_secs))
            .push_opt("page.max_size", self.page_max_size.filter(|n| *n > 0))
            .push("page.token", &self.page_token);
        q
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleEvaluationQuery {
    pub rule_slugs: Vec<String>,
    pub page_max_size: Option<i64>,
    pub page_token: String,
}

/// Client for `/api/v1/state`.
pub struct StateClient {
    rest: RestClient,
}

impl StateClient {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    pub async fn list_monitor_statuses(&self, query: &MonitorStatusQuery) -> Result<Value, ToolError> {
        let mut q = QueryParams::new();
        q.push_all("monitor_slugs", &query.monitor_slugs)
            .push_all("collection_slugs", &query.collection_slugs)
            .push_all("team_slugs", &query.team_slugs)
            .push_opt("include_signal_statuses", query.include_signal_statuses.then_some(true))
            .push_opt("include_series_statuses", query.include_series_statuses.then_some(true))
            .push("sort_by", &query.sort_by);
        self.rest
            .get("/api/v1/state/monitor-statuses", q.as_slice())
            .await
            .context("failed to list monitor statuses")
    }

    pub async fn list_metric_usages_by_metric_name(&self, query: &UsageQuery) -> Result<Value, ToolError> {
        self.rest
            .get(
                "/api/v1/state/metric-usages-by-metric-name",
                query.params("metric_name_glob").as_slice(),
            )
            .await
            .context("failed to list metric usages by metric name")
    }

    pub async fn list_metric_usages_by_label_name(&self, query: &UsageQuery) -> Result<Value, ToolError> {
        self.rest
            .get(
                "/api/v1/state/metric-usages-by-label-name",
                query.params("label_name_glob").as_slice(),
            )
            .await
            .context("failed to list metric usages by label name")
    }

    pub async fn list_rule_evaluations(&self, query: &RuleEvaluationQuery) -> Result<Value, ToolError> {
        let mut q = QueryParams::new();
        q.push_all("rule_slugs", &query.rule_slugs)
            .push_opt("page.max_size", query.page_max_size.filter(|n| *n > 0))
            .push("page.token", &query.page_token);
        self.rest
            .get("/api/v1/state/rule-evaluations", q.as_slice())
            .await
            .context("failed to list rule evaluations")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::serve;
    use crate::client::transport::Transport;
    use crate::session::Session;
    use axum::extract::RawQuery;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_usage_params() {
        let query = UsageQuery {
            glob: "container_*".into(),
            order_by: "DPPS".into(),
            ascending: true,
            lookback_secs: 86400,
            page_max_size: Some(0),
            page_token: String::new(),
        };
        let params = query.params("metric_name_glob");
        let keys: Vec<&str> = params.as_slice().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["metric_name_glob", "order.by", "order.ascending", "lookback_secs"]);
    }

    #[tokio::test]
    async fn test_monitor_statuses_query() {
        let router = Router::new().route(
            "/api/v1/state/monitor-statuses",
            get(|RawQuery(q): RawQuery| async move { Json(json!({"query": q.unwrap_or_default()})) }),
        );
        let base = serve(router).await;
        let transport = Arc::new(Transport::new("", Duration::from_secs(5)).unwrap());
        let client = StateClient::new(RestClient::new(transport, &base, Session::background()));

        let response = client
            .list_monitor_statuses(&MonitorStatusQuery {
                monitor_slugs: vec!["a".into(), "b".into()],
                include_signal_statuses: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(
            response["query"],
            "monitor_slugs=a&monitor_slugs=b&include_signal_statuses=true"
        );
    }
}
