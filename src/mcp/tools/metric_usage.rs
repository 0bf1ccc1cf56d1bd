use super::next_page_meta;
use crate::client::state_api::{RuleEvaluationQuery, UsageQuery, USAGE_ORDER_BY};
use crate::client::ClientProvider;
use crate::error::ToolError;
use crate::mcp::schema::InputSchema;
use crate::mcp::tool::{bind, Tool, ToolFamily, ToolMetadata, ToolResult};
use crate::params::{self, Arguments};
use crate::session::Session;
use std::sync::Arc;

const DEFAULT_LOOKBACK_DAYS: i64 = 30;
const DEFAULT_PAGE_SIZE: i64 = 100;
const SECONDS_PER_DAY: i64 = 86_400;

/// Which dimension a usage listing is keyed by.
#[derive(Debug, Clone, Copy)]
enum UsageKey {
    MetricName,
    LabelName,
}

impl UsageKey {
    fn glob_param(self) -> &'static str {
        match self {
            UsageKey::MetricName => "metric_name_glob",
            UsageKey::LabelName => "label_name_glob",
        }
    }
}

/// How metrics and labels are used by dashboards, monitors and queries.
pub struct MetricUsageTools {
    clients: Arc<ClientProvider>,
}

fn usage_query(args: &Arguments, key: UsageKey) -> Result<UsageQuery, ToolError> {
    let order_by = params::string(args, "order_by", false, "")?;
    if !order_by.is_empty() && !USAGE_ORDER_BY.contains(&order_by.as_str()) {
        return Err(ToolError::invalid(format!(
            "order_by must be one of {}",
            USAGE_ORDER_BY.join(", ")
        )));
    }
    let lookback_days = params::int(args, "lookback_days", false, DEFAULT_LOOKBACK_DAYS)?;
    if lookback_days <= 0 {
        return Err(ToolError::invalid("lookback_days must be positive"));
    }
    Ok(UsageQuery {
        glob: params::string(args, key.glob_param(), false, "")?,
        order_by,
        ascending: params::boolean(args, "ascending", false, false)?,
        lookback_secs: lookback_days.saturating_mul(SECONDS_PER_DAY),
        page_max_size: Some(params::int(args, "page_max_size", false, DEFAULT_PAGE_SIZE)?),
        page_token: params::string(args, "page_token", false, "")?,
    })
}

fn usage_schema(key: UsageKey) -> serde_json::Value {
    InputSchema::new()
        .string(key.glob_param(), "Glob over names, for example http_*", false)
        .enumeration("order_by", "Sort key", USAGE_ORDER_BY, false)
        .boolean("ascending", "Sort ascending instead of descending", false)
        .integer(
            "lookback_days",
            &format!("Days of usage to consider (default: {DEFAULT_LOOKBACK_DAYS})"),
            false,
        )
        .page(DEFAULT_PAGE_SIZE)
        .build()
}

impl MetricUsageTools {
    pub fn new(clients: Arc<ClientProvider>) -> Self {
        Self { clients }
    }

    async fn usages(&self, session: Session, args: Arguments, key: UsageKey) -> Result<ToolResult, ToolError> {
        let query = usage_query(&args, key)?;
        let state = self.clients.state_api(&session)?;
        let response = match key {
            UsageKey::MetricName => state.list_metric_usages_by_metric_name(&query).await?,
            UsageKey::LabelName => state.list_metric_usages_by_label_name(&query).await?,
        };
        let result = ToolResult::json(&response)?;
        Ok(next_page_meta(result, &response))
    }

    async fn rule_evaluations(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let query = RuleEvaluationQuery {
            rule_slugs: params::string_array(&args, "rule_slugs", false, &[])?,
            page_max_size: Some(params::int(&args, "page_max_size", false, DEFAULT_PAGE_SIZE)?),
            page_token: params::string(&args, "page_token", false, "")?,
        };
        let response = self.clients.state_api(&session)?.list_rule_evaluations(&query).await?;
        let result = ToolResult::json(&response)?;
        Ok(next_page_meta(result, &response))
    }
}

impl ToolFamily for MetricUsageTools {
    fn name(&self) -> &'static str {
        "metric_usage"
    }

    fn tools(self: Arc<Self>) -> Vec<Tool> {
        vec![
            Tool::new(
                ToolMetadata::new(
                    "list_metric_usages_by_metric_name",
                    "Rank metrics by how much they are used and what they cost",
                    usage_schema(UsageKey::MetricName),
                )
                .read_only(),
                bind(&self, |t, s, a| async move { t.usages(s, a, UsageKey::MetricName).await }),
            ),
            Tool::new(
                ToolMetadata::new(
                    "list_metric_usages_by_label_name",
                    "Rank labels by how much they are used and how many values they carry",
                    usage_schema(UsageKey::LabelName),
                )
                .read_only(),
                bind(&self, |t, s, a| async move { t.usages(s, a, UsageKey::LabelName).await }),
            ),
            Tool::new(
                ToolMetadata::new(
                    "list_rule_evaluations",
                    "Recent evaluation results of recording and alerting rules",
                    InputSchema::new()
                        .string_array("rule_slugs", "Only these rules", false)
                        .page(DEFAULT_PAGE_SIZE)
                        .build(),
                )
                .read_only(),
                bind(&self, |t, s, a| async move { t.rule_evaluations(s, a).await }),
            ),
        ]
    }
}
