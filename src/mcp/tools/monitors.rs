use crate::client::state_api::MonitorStatusQuery;
use crate::client::ClientProvider;
use crate::error::ToolError;
use crate::mcp::schema::InputSchema;
use crate::mcp::tool::{bind, Tool, ToolFamily, ToolMetadata, ToolResult};
use crate::params::{self, Arguments};
use crate::session::Session;
use std::sync::Arc;

const SORT_ORDERS: &[&str] = &["SORT_BY_NAME", "SORT_BY_STATE"];

/// Live monitor state. Definitions come from the config family.
pub struct MonitorTools {
    clients: Arc<ClientProvider>,
}

impl MonitorTools {
    pub fn new(clients: Arc<ClientProvider>) -> Self {
        Self { clients }
    }

    async fn list_statuses(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let query = MonitorStatusQuery {
            monitor_slugs: params::string_array(&args, "monitor_slugs", false, &[])?,
            collection_slugs: params::string_array(&args, "collection_slugs", false, &[])?,
            team_slugs: params::string_array(&args, "team_slugs", false, &[])?,
            include_signal_statuses: params::boolean(&args, "include_signal_statuses", false, false)?,
            include_series_statuses: params::boolean(&args, "include_series_statuses", false, false)?,
            sort_by: params::string(&args, "sort_by", false, "")?,
        };
        if query.include_series_statuses && !query.include_signal_statuses {
            return Err(ToolError::invalid(
                "include_series_statuses requires include_signal_statuses",
            ));
        }
        if !query.sort_by.is_empty() && !SORT_ORDERS.contains(&query.sort_by.as_str()) {
            return Err(ToolError::invalid(format!(
                "sort_by must be one of {}",
                SORT_ORDERS.join(", ")
            )));
        }

        let response = self.clients.state_api(&session)?.list_monitor_statuses(&query).await?;
        ToolResult::json(response)
    }
}

impl ToolFamily for MonitorTools {
    fn name(&self) -> &'static str {
        "monitors"
    }

    fn tools(self: Arc<Self>) -> Vec<Tool> {
        vec![Tool::new(
            ToolMetadata::new(
                "list_monitor_statuses",
                "Current alerting state of monitors, optionally broken down by signal and series",
                InputSchema::new()
                    .string_array("monitor_slugs", "Only these monitors", false)
                    .string_array("collection_slugs", "Only monitors in these collections", false)
                    .string_array("team_slugs", "Only monitors owned by these teams", false)
                    .boolean("include_signal_statuses", "Include the state of each signal", false)
                    .boolean(
                        "include_series_statuses",
                        "Include the state of each series; requires include_signal_statuses",
                        false,
                    )
                    .enumeration("sort_by", "Result ordering", SORT_ORDERS, false)
                    .build(),
            )
            .read_only(),
            bind(&self, |t, s, a| async move { t.list_statuses(s, a).await }),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tools::testing::{args, json_content, live_clients, tool};
    use axum::extract::RawQuery;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    fn router() -> Router {
        Router::new().route(
            "/api/v1/state/monitor-statuses",
            get(|RawQuery(q): RawQuery| async move {
                Json(json!({"monitor_statuses": [], "query": q.unwrap_or_default()}))
            }),
        )
    }

    #[tokio::test]
    async fn test_statuses_query() {
        let clients = live_clients(router()).await;
        let result = tool(MonitorTools::new(clients), "list_monitor_statuses")
            .call(
                Session::background(),
                args(json!({
                    "monitor_slugs": ["latency"],
                    "include_signal_statuses": true,
                    "include_series_statuses": true,
                })),
            )
            .await
            .unwrap();
        assert_eq!(
            json_content(&result)["query"],
            "monitor_slugs=latency&include_signal_statuses=true&include_series_statuses=true"
        );
    }

    #[tokio::test]
    async fn test_series_requires_signals() {
        let clients = live_clients(router()).await;
        let err = tool(MonitorTools::new(clients), "list_monitor_statuses")
            .call(Session::background(), args(json!({"include_series_statuses": true})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_sort_by_checked() {
        let clients = live_clients(router()).await;
        let err = tool(MonitorTools::new(clients), "list_monitor_statuses")
            .call(Session::background(), args(json!({"sort_by": "newest"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument(_)));
    }
}
