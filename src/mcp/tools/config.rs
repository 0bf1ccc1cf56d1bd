use crate::client::config_api::{ListQuery, ResourceKind};
use crate::client::ClientProvider;
use crate::error::ToolError;
use crate::mcp::schema::InputSchema;
use crate::mcp::tool::{bind, Tool, ToolFamily, ToolMetadata, ToolResult};
use crate::params::{self, Arguments};
use crate::session::Session;
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_PAGE_SIZE: i64 = 100;

/// `get_*` and `list_*` tools for every configuration resource kind.
pub struct ConfigTools {
    clients: Arc<ClientProvider>,
}

impl ConfigTools {
    pub fn new(clients: Arc<ClientProvider>) -> Self {
        Self { clients }
    }

    async fn get(&self, session: Session, args: Arguments, kind: ResourceKind) -> Result<ToolResult, ToolError> {
        let config = self.clients.config_api(&session)?;
        if kind.is_singleton() {
            return ToolResult::json(config.read_singleton(kind).await?);
        }

        let slug = params::string(&args, "slug", true, "")?;
        let resource = config.read(kind, &slug).await?;
        let mut result = ToolResult::json(resource)?;
        if let Some(path) = kind.ui_path(&slug) {
            result = result.with_link(self.clients.links().custom(&path));
        }
        Ok(result)
    }

    async fn list(&self, session: Session, args: Arguments, kind: ResourceKind) -> Result<ToolResult, ToolError> {
        let mut filters = Vec::new();
        for filter in kind.filters() {
            let values = params::string_array(&args, filter.key(), false, &[])?;
            if !values.is_empty() {
                filters.push((*filter, values));
            }
        }
        let query = ListQuery {
            filters,
            page_max_size: Some(params::int(&args, "page_max_size", false, DEFAULT_PAGE_SIZE)?),
            page_token: params::string(&args, "page_token", false, "")?,
        };

        let page = self.clients.config_api(&session)?.list(kind, &query).await?;
        let mut body = serde_json::Map::new();
        body.insert(kind.plural(), Value::Array(page.items));
        let result = ToolResult::json(Value::Object(body))?;
        Ok(match page.next_token {
            Some(token) => result.with_meta("next_page_token", token),
            None => result,
        })
    }

    fn get_tool(self: &Arc<Self>, kind: ResourceKind) -> Tool {
        let (description, schema) = if kind.is_singleton() {
            (
                format!("Get the tenant's {} configuration", kind.display()),
                // the schema stays an object; it just has nothing to fill in
                json!({"type": "object", "properties": {}}),
            )
        } else {
            (
                format!("Get a {} by slug", kind.display()),
                InputSchema::new()
                    .string("slug", &format!("Slug of the {}", kind.display()), true)
                    .build(),
            )
        };
        Tool::new(
            ToolMetadata::new(&format!("get_{}", kind.singular()), &description, schema).read_only(),
            bind(self, move |t, s, a| async move { t.get(s, a, kind).await }),
        )
    }

    fn list_tool(self: &Arc<Self>, kind: ResourceKind) -> Tool {
        let plural = kind.plural();
        let mut schema = InputSchema::new();
        for filter in kind.filters() {
            schema = schema.string_array(
                filter.key(),
                &format!("Only {} with these {}", plural.replace('_', " "), filter.key().replace('_', " ")),
                false,
            );
        }
        Tool::new(
            ToolMetadata::new(
                &format!("list_{plural}"),
                &format!("List {}", plural.replace('_', " ")),
                schema.page(DEFAULT_PAGE_SIZE).build(),
            )
            .read_only(),
            bind(self, move |t, s, a| async move { t.list(s, a, kind).await }),
        )
    }
}

impl ToolFamily for ConfigTools {
    fn name(&self) -> &'static str {
        "config"
    }

    fn tools(self: Arc<Self>) -> Vec<Tool> {
        let mut tools = Vec::new();
        for kind in ResourceKind::COLLECTIONS {
            tools.push(self.get_tool(*kind));
            tools.push(self.list_tool(*kind));
        }
        for kind in ResourceKind::SINGLETONS {
            tools.push(self.get_tool(*kind));
        }
        tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tools::testing::{args, json_content, live_clients, tool};
    use axum::extract::{Path, RawQuery};
    use axum::routing::get;
    use axum::{Json, Router};

    fn router() -> Router {
        Router::new()
            .route(
                "/api/v1/config/monitors",
                get(|RawQuery(q): RawQuery| async move {
                    Json(json!({
                        "monitors": [{"slug": "latency", "query": q.unwrap_or_default()}],
                        "page": {"next_token": "p2"}
                    }))
                }),
            )
            .route(
                "/api/v1/config/monitors/{slug}",
                get(|Path(slug): Path<String>| async move { Json(json!({"monitor": {"slug": slug}})) }),
            )
            .route(
                "/api/v1/config/buckets/{slug}",
                get(|Path(slug): Path<String>| async move { Json(json!({"bucket": {"slug": slug}})) }),
            )
            .route(
                "/api/v1/config/trace-tail-sampling-rules",
                get(|| async { Json(json!({"trace_tail_sampling_rules": {"rules": []}})) }),
            )
    }

    #[test]
    fn test_tool_table() {
        let clients = Arc::new(ClientProvider::loopback("https://example.invalid").unwrap());
        let tools = Arc::new(ConfigTools::new(clients)).tools();
        let count = ResourceKind::COLLECTIONS.len() * 2 + ResourceKind::SINGLETONS.len();
        assert_eq!(tools.len(), count);

        let list_monitors = tools.iter().find(|t| t.name() == "list_monitors").unwrap();
        let properties = list_monitors.metadata.input_schema["properties"].as_object().unwrap();
        for key in ["names", "slugs", "bucket_slugs", "collection_slugs", "team_slugs", "page_token"] {
            assert!(properties.contains_key(key), "missing {key}");
        }

        let get_slo = tools.iter().find(|t| t.name() == "get_slo").unwrap();
        assert_eq!(get_slo.metadata.input_schema["required"], json!(["slug"]));
        assert!(tools.iter().any(|t| t.name() == "get_otel_metrics_ingestion"));
    }

    #[tokio::test]
    async fn test_get_with_link() {
        let clients = live_clients(router()).await;
        let result = tool(ConfigTools::new(clients), "get_monitor")
            .call(Session::background(), args(json!({"slug": "latency"})))
            .await
            .unwrap();
        assert_eq!(json_content(&result), &json!({"slug": "latency"}));
        assert!(result.meta["link"].as_str().unwrap().ends_with("/monitors/latency"));
    }

    #[tokio::test]
    async fn test_get_without_ui_page() {
        let clients = live_clients(router()).await;
        let result = tool(ConfigTools::new(clients), "get_bucket")
            .call(Session::background(), args(json!({"slug": "prod"})))
            .await
            .unwrap();
        assert_eq!(json_content(&result), &json!({"slug": "prod"}));
        assert!(result.meta.get("link").is_none());
    }

    #[tokio::test]
    async fn test_list_filters_and_token() {
        let clients = live_clients(router()).await;
        let result = tool(ConfigTools::new(clients), "list_monitors")
            .call(
                Session::background(),
                args(json!({"team_slugs": ["sre"], "page_max_size": 5})),
            )
            .await
            .unwrap();
        let value = json_content(&result);
        assert_eq!(value["monitors"][0]["query"], "team_slugs=sre&page.max_size=5");
        assert_eq!(result.meta["next_page_token"], "p2");
    }

    #[tokio::test]
    async fn test_singleton_takes_no_slug() {
        let clients = live_clients(router()).await;
        let result = tool(ConfigTools::new(clients), "get_trace_tail_sampling_rules")
            .call(Session::background(), args(json!({})))
            .await
            .unwrap();
        assert_eq!(json_content(&result), &json!({"rules": []}));
    }

    #[tokio::test]
    async fn test_missing_slug() {
        let clients = live_clients(router()).await;
        let err = tool(ConfigTools::new(clients), "get_monitor")
            .call(Session::background(), args(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::MissingRequired(_)));
    }
}
