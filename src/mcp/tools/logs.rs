use super::next_page_meta;
use crate::client::data_api::{
    LogFieldRequest, LogHistogramRequest, LogListRequest, LogRangeRequest, PageRequest, Window,
};
use crate::client::ClientProvider;
use crate::error::ToolError;
use crate::mcp::pagination;
use crate::mcp::schema::InputSchema;
use crate::mcp::tool::{bind, Tool, ToolFamily, ToolMetadata, ToolResult};
use crate::params::{self, Arguments, TimeRange};
use crate::session::Session;
use chrono::Duration;
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_PAGE_SIZE: i64 = 10;
const DEFAULT_FIELD_LIMIT: i64 = 100;
const DEFAULT_ROW_LIMIT: usize = 100;
const HISTOGRAM_BUCKETS: i64 = 100;

/// Fields `query_logs_range` returns when the query projects nothing.
const DEFAULT_PROJECTION: &str = "project logID, timestamp, message, severity, service";

/// Log search, histogram and field discovery.
pub struct LogTools {
    clients: Arc<ClientProvider>,
}

/// Append the default projection unless the query already has one.
pub fn with_default_projection(query: &str) -> String {
    let has_projection = query
        .split('|')
        .skip(1)
        .any(|stage| stage.trim_start().to_ascii_lowercase().starts_with("project"));
    if has_projection {
        return query.to_string();
    }
    let query = query.trim();
    if query.is_empty() {
        DEFAULT_PROJECTION.to_string()
    } else {
        format!("{query} | {DEFAULT_PROJECTION}")
    }
}

/// One bucket per hundredth of the range, at least a second wide.
pub fn histogram_step(range: &TimeRange) -> i64 {
    (range.duration().num_seconds() / HISTOGRAM_BUCKETS).max(1)
}

impl LogTools {
    pub fn new(clients: Arc<ClientProvider>) -> Self {
        Self { clients }
    }

    fn link(&self, query: &str, range: &TimeRange) -> String {
        self.clients
            .links()
            .log_explorer()
            .with_query(query)
            .with_time_range(range.start, range.end)
            .build()
    }

    async fn list_logs(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let query = params::string(&args, "query", true, "")?;
        let range = params::time_range(&args)?;
        let page = PageRequest {
            max_size: Some(params::int(&args, "page_max_size", false, DEFAULT_PAGE_SIZE)?),
            token: params::string(&args, "page_token", false, "")?,
        };
        let response = self
            .clients
            .data_api(&session)?
            .list_logs(&LogListRequest {
                query: query.clone(),
                timestamp_filter: Window::from(&range),
                page,
            })
            .await?;

        let result = ToolResult::json(&response)?.with_link(self.link(&query, &range));
        Ok(next_page_meta(result, &response))
    }

    async fn get_log(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let id = params::string(&args, "id", true, "")?;
        let end = params::time(&args, "end", false, chrono::Utc::now())?;
        let start = params::time(&args, "start", false, end - Duration::days(30))?;
        let range = TimeRange::new(start, end);
        let query = format!("logID={}", serde_json::to_string(&id)?);

        let mut response = self
            .clients
            .data_api(&session)?
            .list_logs(&LogListRequest {
                query: query.clone(),
                timestamp_filter: Window::from(&range),
                page: PageRequest {
                    max_size: Some(1),
                    token: String::new(),
                },
            })
            .await?;

        let log = match response.get_mut("logs").map(Value::take) {
            Some(Value::Array(logs)) => logs.into_iter().next(),
            _ => None,
        };
        match log {
            Some(log) => Ok(ToolResult::json(log)?.with_link(self.link(&query, &range))),
            None => ToolResult::json(json!({})),
        }
    }

    async fn query_range(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let query = with_default_projection(&params::string(&args, "query", true, "")?);
        let range = params::time_range(&args)?;
        let (limit, offset) = params::limit_offset(&args, DEFAULT_ROW_LIMIT)?;
        let page = PageRequest {
            max_size: None,
            token: params::string(&args, "page_token", false, "")?,
        };
        let mut response = self
            .clients
            .data_api(&session)?
            .query_logs_range(&LogRangeRequest {
                query: query.clone(),
                timestamp_filter: Window::from(&range),
                page,
            })
            .await?;
        let next_page = crate::client::config_api::next_page_token(&response);

        // grid results are windowed locally; time series pass through
        let mut meta = None;
        if let Some(grid) = response.get_mut("grid_data") {
            let (trimmed, page_meta) = pagination::trim(grid.take(), "rows", limit, offset)?;
            *grid = trimmed;
            meta = Some(page_meta);
        }

        let mut result = ToolResult::json(&response)?.with_link(self.link(&query, &range));
        if let Some(meta) = meta {
            meta.insert_into(&mut result.meta);
        }
        if let Some(token) = next_page {
            result = result.with_meta("next_page_token", token);
        }
        Ok(result)
    }

    async fn histogram(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let query = params::string(&args, "query", false, "")?;
        let range = params::time_range(&args)?;
        let group_by = params::string_array(&args, "group_by", false, &[])?;
        let response = self
            .clients
            .data_api(&session)?
            .log_histogram(&LogHistogramRequest {
                query: query.clone(),
                timestamp_filter: Window::from(&range),
                step_seconds: histogram_step(&range),
                group_by,
            })
            .await?;
        Ok(ToolResult::json(response)?.with_link(self.link(&query, &range)))
    }

    async fn field_names(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let request = LogFieldRequest {
            query: params::string(&args, "query", false, "")?,
            timestamp_filter: Window::from(&params::time_range(&args)?),
            field_name: String::new(),
            limit: params::int(&args, "limit", false, DEFAULT_FIELD_LIMIT)?,
        };
        let names = self.clients.data_api(&session)?.log_field_names(&request).await?;
        ToolResult::json(names)
    }

    async fn field_values(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let request = LogFieldRequest {
            field_name: params::string(&args, "field_name", true, "")?,
            query: params::string(&args, "query", false, "")?,
            timestamp_filter: Window::from(&params::time_range(&args)?),
            limit: params::int(&args, "limit", false, DEFAULT_FIELD_LIMIT)?,
        };
        let values = self.clients.data_api(&session)?.log_field_values(&request).await?;
        ToolResult::json(values)
    }
}

impl ToolFamily for LogTools {
    fn name(&self) -> &'static str {
        "logs"
    }

    fn tools(self: Arc<Self>) -> Vec<Tool> {
        vec![
            Tool::new(
                ToolMetadata::new(
                    "list_logs",
                    "Search logs with a log query and return one page of matching records",
                    InputSchema::new()
                        .string("query", "Log query, for example service=\"orders\" severity=\"ERROR\"", true)
                        .time_range()
                        .page(DEFAULT_PAGE_SIZE)
                        .build(),
                )
                .read_only(),
                bind(&self, |t, s, a| async move { t.list_logs(s, a).await }),
            ),
            Tool::new(
                ToolMetadata::new(
                    "get_log",
                    "Fetch a single log record by its logID",
                    InputSchema::new()
                        .string("id", "logID of the record", true)
                        .time("start", "Start of the search window (default: 30 days before end)", false)
                        .time("end", "End of the search window (default: now)", false)
                        .build(),
                )
                .read_only(),
                bind(&self, |t, s, a| async move { t.get_log(s, a).await }),
            ),
            Tool::new(
                ToolMetadata::new(
                    "query_logs_range",
                    "Run a log query that aggregates or projects fields, returning a time series or a grid",
                    InputSchema::new()
                        .string("query", "Log query; logID, timestamp, message, severity and service are projected when the query projects nothing", true)
                        .time_range()
                        .string("page_token", "Token of the page to fetch", false)
                        .limit_offset(DEFAULT_ROW_LIMIT)
                        .build(),
                )
                .read_only(),
                bind(&self, |t, s, a| async move { t.query_range(s, a).await }),
            ),
            Tool::new(
                ToolMetadata::new(
                    "get_log_histogram",
                    "Count matching logs over time in 100 buckets",
                    InputSchema::new()
                        .string("query", "Log query (default: all logs)", false)
                        .time_range()
                        .string_array("group_by", "Fields to split counts by", false)
                        .build(),
                )
                .read_only(),
                bind(&self, |t, s, a| async move { t.histogram(s, a).await }),
            ),
            Tool::new(
                ToolMetadata::new(
                    "list_log_field_names",
                    "List the field names present in matching logs",
                    InputSchema::new()
                        .string("query", "Log query (default: all logs)", false)
                        .time_range()
                        .integer("limit", &format!("Maximum number of names (default: {DEFAULT_FIELD_LIMIT})"), false)
                        .build(),
                )
                .read_only(),
                bind(&self, |t, s, a| async move { t.field_names(s, a).await }),
            ),
            Tool::new(
                ToolMetadata::new(
                    "list_log_field_values",
                    "List the most common values of a log field",
                    InputSchema::new()
                        .string("field_name", "Field to list values of", true)
                        .string("query", "Log query (default: all logs)", false)
                        .time_range()
                        .integer("limit", &format!("Maximum number of values (default: {DEFAULT_FIELD_LIMIT})"), false)
                        .build(),
                )
                .read_only(),
                bind(&self, |t, s, a| async move { t.field_values(s, a).await }),
            ),
        ]
    }
}
