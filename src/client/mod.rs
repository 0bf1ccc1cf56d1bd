//! Typed clients for the upstream APIs, vended per session.

use crate::error::ToolError;
use crate::links::LinkBuilder;
use crate::prom::{PrometheusApi, PrometheusClient};
use crate::promql::QueryEngine;
use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;

pub mod config_api;
pub mod data_api;
pub mod logscale;
pub mod rest;
pub mod state_api;
pub mod transport;

pub use config_api::{ConfigClient, ListFilter, ListQuery, Page, ResourceKind};
pub use data_api::DataClient;
pub use logscale::LogScaleClient;
pub use rest::RestClient;
pub use state_api::StateClient;
pub use transport::Transport;

/// Prometheus API over raw stored data.
pub const PROMETHEUS_DATA_PATH: &str = "/data/metrics";
/// Prometheus API over the recording and alerting rule evaluator.
pub const PROMETHEUS_RECORDING_PATH: &str = "/app/prom";

/// Where live clients send their requests.
#[derive(Debug, Clone, Default)]
pub struct Upstream {
    pub api_url: String,
    /// Used when the session carries no credential of its own.
    pub api_token: String,
    pub logscale_url: String,
    pub logscale_token: String,
    pub timeout: Duration,
}

enum Backend {
    Live {
        transport: Arc<Transport>,
        upstream: Upstream,
    },
    Loopback(Arc<QueryEngine>),
}

/// Vends typed clients bound to a session.
///
/// In loopback mode both Prometheus accessors return the shared synthetic
/// engine and every other accessor fails with `Unimplemented`.
pub struct ClientProvider {
    backend: Backend,
    links: LinkBuilder,
}

impl ClientProvider {
    pub fn live(upstream: Upstream) -> Result<Self, ToolError> {
        let links = LinkBuilder::new(&upstream.api_url)
            .map_err(|e| ToolError::invalid(format!("api url {:?}: {e}", upstream.api_url)))?;
        let transport = Arc::new(Transport::new(upstream.api_token.clone(), upstream.timeout)?);
        Ok(Self {
            backend: Backend::Live { transport, upstream },
            links,
        })
    }

    /// `link_base` only shapes deep links; nothing is ever sent there.
    pub fn loopback(link_base: &str) -> Result<Self, ToolError> {
        let links =
            LinkBuilder::new(link_base).map_err(|e| ToolError::invalid(format!("link base {link_base:?}: {e}")))?;
        Ok(Self {
            backend: Backend::Loopback(Arc::new(QueryEngine::default())),
            links,
        })
    }

    pub fn is_loopback(&self) -> bool {
        matches!(self.backend, Backend::Loopback(_))
    }

    pub fn links(&self) -> &LinkBuilder {
        &self.links
    }

    fn rest(&self, session: &Session, what: &str) -> Result<RestClient, ToolError> {
        match &self.backend {
            Backend::Live { transport, upstream } => {
                Ok(RestClient::new(transport.clone(), &upstream.api_url, session.clone()))
            }
            Backend::Loopback(_) => Err(ToolError::Unimplemented(format!("{what} in loopback mode"))),
        }
    }

    pub fn config_api(&self, session: &Session) -> Result<ConfigClient, ToolError> {
        self.rest(session, "config API").map(ConfigClient::new)
    }

    pub fn data_api(&self, session: &Session) -> Result<DataClient, ToolError> {
        self.rest(session, "data API").map(DataClient::new)
    }

    pub fn state_api(&self, session: &Session) -> Result<StateClient, ToolError> {
        self.rest(session, "state API").map(StateClient::new)
    }

    fn prometheus(&self, session: &Session, path: &str) -> Arc<dyn PrometheusApi> {
        match &self.backend {
            Backend::Live { transport, upstream } => Arc::new(PrometheusClient::new(
                transport.clone(),
                &format!("{}{}", upstream.api_url.trim_end_matches('/'), path),
                session.clone(),
            )),
            Backend::Loopback(engine) => engine.clone(),
        }
    }

    pub fn prometheus_data(&self, session: &Session) -> Arc<dyn PrometheusApi> {
        self.prometheus(session, PROMETHEUS_DATA_PATH)
    }

    pub fn prometheus_recording(&self, session: &Session) -> Arc<dyn PrometheusApi> {
        self.prometheus(session, PROMETHEUS_RECORDING_PATH)
    }

    pub fn logscale(&self, session: &Session) -> Result<LogScaleClient, ToolError> {
        match &self.backend {
            Backend::Live { transport, upstream } => {
                if upstream.logscale_url.is_empty() {
                    return Err(ToolError::invalid("no logscale url configured"));
                }
                Ok(LogScaleClient::new(
                    transport.clone(),
                    &upstream.logscale_url,
                    &upstream.logscale_token,
                    session.clone(),
                ))
            }
            Backend::Loopback(_) => Err(ToolError::Unimplemented("logscale in loopback mode".into())),
        }
    }
}
