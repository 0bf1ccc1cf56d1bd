use crate::client::data_api::{TraceQueryType, TraceRequest};
use crate::client::ClientProvider;
use crate::error::ToolError;
use crate::mcp::pagination;
use crate::mcp::schema::InputSchema;
use crate::mcp::tool::{bind, Tool, ToolFamily, ToolMetadata, ToolResult};
use crate::params::{self, Arguments};
use crate::session::Session;
use std::sync::Arc;

const DEFAULT_LIMIT: usize = 20;

pub struct TraceTools {
    clients: Arc<ClientProvider>,
}

impl TraceTools {
    pub fn new(clients: Arc<ClientProvider>) -> Self {
        Self { clients }
    }

    async fn list_traces(&self, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let range = params::time_range(&args)?;
        let service = params::string(&args, "service", false, "")?;
        let operation = params::string(&args, "operation", false, "")?;
        let trace_ids = params::string_array(&args, "trace_ids", false, &[])?;
        let (limit, offset) = params::limit_offset(&args, DEFAULT_LIMIT)?;

        let query_type = match (trace_ids.is_empty(), service.is_empty() && operation.is_empty()) {
            (false, false) => {
                return Err(ToolError::invalid(
                    "trace_ids cannot be combined with service or operation",
                ))
            }
            (false, true) => TraceQueryType::TraceIds,
            (true, _) => TraceQueryType::ServiceOperation,
        };

        let traces = self
            .clients
            .data_api(&session)?
            .list_traces(&TraceRequest {
                query_type,
                start_time: range.start,
                end_time: range.end,
                trace_ids,
                service,
                operation,
            })
            .await?;

        let (payload, meta) = pagination::trim(serde_json::to_value(traces)?, "traces", limit, offset)?;
        let mut result = ToolResult::json(payload)?;
        meta.insert_into(&mut result.meta);
        Ok(result)
    }
}

impl ToolFamily for TraceTools {
    fn name(&self) -> &'static str {
        "traces"
    }

    fn tools(self: Arc<Self>) -> Vec<Tool> {
        vec![Tool::new(
            ToolMetadata::new(
                "list_traces",
                "Find traces by id, or by service and operation. Span, trace and link ids are lowercase hex",
                InputSchema::new()
                    .time_range()
                    .string("service", "Service that emitted the root or any span", false)
                    .string("operation", "Operation name within the service", false)
                    .string_array("trace_ids", "Hex trace ids; cannot be combined with service or operation", false)
                    .limit_offset(DEFAULT_LIMIT)
                    .build(),
            )
            .read_only(),
            bind(&self, |t, s, a| async move { t.list_traces(s, a).await }),
        )]
    }
}
