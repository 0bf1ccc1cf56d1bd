use super::next_page_meta;
use crate::client::data_api::PageRequest;
use crate::client::ClientProvider;
use crate::error::ToolError;
use crate::mcp::schema::InputSchema;
use crate::mcp::tool::{bind, Tool, ToolFamily, ToolMetadata, ToolResult};
use crate::params::{self, Arguments};
use crate::session::Session;
use std::sync::Arc;

const DEFAULT_PAGE_SIZE: i64 = 100;

/// Change events: deploys, config updates, alerts.
pub struct EventTools {
    clients: Arc<ClientProvider>,
}

impl EventTools {
    pub fn new(clients: Arc<ClientProvider>) -> Self {
        Self { clients }
    }

    async fn list_events(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let query = params::string(&args, "query", false, "")?;
        let range = params::time_range(&args)?;
        let page = PageRequest {
            max_size: Some(params::int(&args, "page_max_size", false, DEFAULT_PAGE_SIZE)?),
            token: params::string(&args, "page_token", false, "")?,
        };
        let response = self
            .clients
            .data_api(&session)?
            .list_events(&query, &range, &page)
            .await?;

        let link = self
            .clients
            .links()
            .event_explorer()
            .with_query(query)
            .with_time_range(range.start, range.end);
        let result = ToolResult::json(&response)?.with_link(link);
        Ok(next_page_meta(result, &response))
    }
}

impl ToolFamily for EventTools {
    fn name(&self) -> &'static str {
        "events"
    }

    fn tools(self: Arc<Self>) -> Vec<Tool> {
        vec![Tool::new(
            ToolMetadata::new(
                "list_events",
                "List change events such as deploys and configuration updates",
                InputSchema::new()
                    .string("query", "Event query, for example source=\"github\"", false)
                    .time_range()
                    .page(DEFAULT_PAGE_SIZE)
                    .build(),
            )
            .read_only(),
            bind(&self, |t, s, a| async move { t.list_events(s, a).await }),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tools::testing::{args, json_content, live_clients, tool};
    use axum::extract::Query;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_list_events() {
        let router = Router::new().route(
            "/api/v1/data/events",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                Json(json!({
                    "events": [{"title": "deploy", "query": q.get("query")}],
                    "page": {"next_token": if q.contains_key("page.token") { "" } else { "second" }},
                    "max_size": q.get("page.max_size"),
                }))
            }),
        );
        let clients = live_clients(router).await;
        let events = tool(EventTools::new(clients), "list_events");

        let first = events
            .call(Session::background(), args(json!({"query": "source=\"github\""})))
            .await
            .unwrap();
        let value: &Value = json_content(&first);
        assert_eq!(value["events"][0]["query"], "source=\"github\"");
        assert_eq!(value["max_size"], "100");
        assert_eq!(first.meta["next_page_token"], "second");
        assert!(first.meta["link"].as_str().unwrap().contains("/events/explorer?"));

        let last = events
            .call(Session::background(), args(json!({"page_token": "second"})))
            .await
            .unwrap();
        assert!(last.meta.get("next_page_token").is_none());
    }
}
