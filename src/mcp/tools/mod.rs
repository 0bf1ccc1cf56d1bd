//! Tool families, one file each.

use super::tool::ToolFamily;
use crate::chart::ChartOptions;
use crate::client::ClientProvider;
use std::sync::Arc;

mod config;
mod events;
mod logs;
mod logscale;
mod metric_usage;
mod metrics;
mod monitors;
mod traces;

pub use config::ConfigTools;
pub use events::EventTools;
pub use logs::LogTools;
pub use logscale::LogScaleTools;
pub use metric_usage::MetricUsageTools;
pub use metrics::MetricsTools;
pub use monitors::MonitorTools;
pub use traces::TraceTools;

/// Every family the clients can serve. Loopback clients only back the
/// Prometheus tools.
pub fn families(clients: Arc<ClientProvider>, chart: ChartOptions) -> Vec<Arc<dyn ToolFamily>> {
    let mut families: Vec<Arc<dyn ToolFamily>> = vec![Arc::new(MetricsTools::new(clients.clone(), chart))];
    if clients.is_loopback() {
        return families;
    }
    families.push(Arc::new(LogTools::new(clients.clone())));
    families.push(Arc::new(LogScaleTools::new(clients.clone())));
    families.push(Arc::new(TraceTools::new(clients.clone())));
    families.push(Arc::new(EventTools::new(clients.clone())));
    families.push(Arc::new(MonitorTools::new(clients.clone())));
    families.push(Arc::new(MetricUsageTools::new(clients.clone())));
    families.push(Arc::new(ConfigTools::new(clients)));
    families
}

/// Copy the upstream `page.next_token` into result metadata.
fn next_page_meta(result: super::tool::ToolResult, response: &serde_json::Value) -> super::tool::ToolResult {
    match crate::client::config_api::next_page_token(response) {
        Some(token) => result.with_meta("next_page_token", token),
        None => result,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::registry::Registry;
    use crate::mcp::tool::ToolFamily;

    fn registry(clients: ClientProvider) -> Registry {
        let mut registry = Registry::new();
        for family in families(Arc::new(clients), ChartOptions::default()) {
            registry.register_family(family).unwrap();
        }
        registry
    }

    #[test]
    fn test_loopback_registers_metrics_only() {
        let registry = registry(ClientProvider::loopback("https://example.invalid").unwrap());
        assert_eq!(registry.len(), 8);
        assert!(registry.tools().all(|t| t.name().contains("prometheus")));
    }

    #[test]
    fn test_live_catalog_is_valid_and_unique() {
        let clients = ClientProvider::live(crate::client::Upstream {
            api_url: "https://example.chronosphere.io".into(),
            timeout: std::time::Duration::from_secs(1),
            ..Default::default()
        })
        .unwrap();
        // registration validates schemas and rejects duplicate names
        let registry = registry(clients);
        for name in [
            "query_prometheus_range",
            "list_logs",
            "get_log",
            "query_logs_range",
            "get_log_histogram",
            "list_log_field_names",
            "list_log_field_values",
            "list_traces",
            "list_events",
            "query_logscale",
            "list_monitor_statuses",
            "list_metric_usages_by_metric_name",
            "list_metric_usages_by_label_name",
            "list_rule_evaluations",
            "get_monitor",
            "list_monitors",
            "list_notification_policies",
            "get_slo",
            "get_log_ingest_config",
            "get_trace_tail_sampling_rules",
        ] {
            assert!(registry.get(name).is_some(), "missing {name}");
        }
        assert!(registry.get("list_log_ingest_configs").is_none());
        assert!(registry.tools().all(|t| !t.metadata.description.is_empty()));
    }

    #[test]
    fn test_family_names() {
        let clients = Arc::new(ClientProvider::loopback("https://example.invalid").unwrap());
        let names: Vec<&str> = families(clients, ChartOptions::default())
            .iter()
            .map(|f| f.name())
            .collect();
        assert_eq!(names, vec!["metrics"]);
    }
}
