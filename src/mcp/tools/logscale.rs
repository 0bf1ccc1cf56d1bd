use crate::client::ClientProvider;
use crate::error::ToolError;
use crate::mcp::schema::InputSchema;
use crate::mcp::tool::{bind, Tool, ToolFamily, ToolMetadata, ToolResult};
use crate::params::{self, Arguments};
use crate::session::Session;
use std::sync::Arc;

pub struct LogScaleTools {
    clients: Arc<ClientProvider>,
}

impl LogScaleTools {
    pub fn new(clients: Arc<ClientProvider>) -> Self {
        Self { clients }
    }

    async fn query(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let query = params::string(&args, "query", true, "")?;
        let repository = params::string(&args, "repository", true, "")?;
        let range = params::time_range(&args)?;
        let rows = self
            .clients
            .logscale(&session)?
            .query(&query, &repository, range.start, range.end)
            .await?;
        ToolResult::json(rows)
    }
}

impl ToolFamily for LogScaleTools {
    fn name(&self) -> &'static str {
        "logscale"
    }

    fn tools(self: Arc<Self>) -> Vec<Tool> {
        vec![Tool::new(
            ToolMetadata::new(
                "query_logscale",
                "Run a LogScale query against a repository and return the matching rows",
                InputSchema::new()
                    .string("query", "LogScale query string", true)
                    .string("repository", "Repository to search", true)
                    .time_range()
                    .build(),
            )
            .read_only(),
            bind(&self, |t, s, a| async move { t.query(s, a).await }),
        )]
    }
}
