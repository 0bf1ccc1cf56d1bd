//! In-process Prometheus engine over the synthetic catalog.
//!
//! Implements the same [`PrometheusApi`] as the HTTP client so tools, the
//! chart renderer and the agent can run without an upstream.

use crate::error::ToolError;
use crate::prom::{
    InstantSample, Labels, MetricMetadata, PrometheusApi, QueryOutput, QueryValue, Range, RangeSeries, Sample,
    StringSample,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ringlog::*;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

mod catalog;
mod eval;
mod labels;
mod parser;
mod series;

pub use catalog::{Catalog, Generator, SineParams, SyntheticMetric};
pub use eval::{Grid, StepSeries};
pub use labels::{LabelMatcher, MatchOp, METRIC_NAME};
pub use parser::{parse, Expr, Selector};

use eval::{Evaluator, Value as EvalValue};

/// Points a range query may return per series.
pub const MAX_POINTS: usize = 11_000;
/// Raw samples a single selector may read per series.
pub const MAX_RAW_SAMPLES: i64 = 500_000;

/// Resolution of raw samples behind instant queries.
const INSTANT_RESOLUTION_MS: i64 = 60_000;

#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("{0} is not supported")]
    Unsupported(String),

    #[error("{0}")]
    Eval(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),
}

impl From<QueryError> for ToolError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Unsupported(_) => ToolError::Unimplemented(e.to_string()),
            other => ToolError::InvalidArgument(other.to_string()),
        }
    }
}

pub struct QueryEngine {
    catalog: Catalog,
    lookback: Duration,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new(Catalog::synthetic())
    }
}

impl QueryEngine {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            lookback: Duration::minutes(5),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn instant(&self, query: &str, time: DateTime<Utc>) -> Result<QueryValue, QueryError> {
        let expr = parse(query)?;
        let time_ms = time.timestamp_millis();
        let ev = Evaluator::new(
            &self.catalog,
            Grid::instant(time_ms),
            INSTANT_RESOLUTION_MS,
            self.lookback.num_milliseconds(),
        );
        let ts = time_ms as f64 / 1000.0;

        if let Expr::RangeSelector { selector, range_ms } = &expr {
            return Ok(QueryValue::Matrix(sorted(ev.eval_raw_range(selector, *range_ms)?)));
        }

        let keep_order = is_sort(&expr);
        Ok(match ev.eval(&expr)? {
            EvalValue::Scalar(values) => QueryValue::Scalar(Sample::new(ts, values[0])),
            EvalValue::String(s) => QueryValue::String(StringSample(ts, s)),
            EvalValue::Vector(series) => {
                let mut samples: Vec<InstantSample> = series
                    .into_iter()
                    .filter_map(|s| {
                        s.points[0].map(|v| InstantSample {
                            metric: s.labels,
                            value: Sample::new(ts, v),
                        })
                    })
                    .collect();
                if !keep_order {
                    samples.sort_by(|a, b| a.metric.cmp(&b.metric));
                }
                QueryValue::Vector(samples)
            }
        })
    }

    pub fn range(&self, query: &str, range: Range) -> Result<QueryValue, QueryError> {
        let step_ms = range.step.num_milliseconds();
        if step_ms <= 0 {
            return Err(QueryError::InvalidRange(
                "zero or negative query resolution step widths are not accepted".into(),
            ));
        }
        let start_ms = range.start.timestamp_millis();
        let end_ms = range.end.timestamp_millis();
        if end_ms < start_ms {
            return Err(QueryError::InvalidRange("end timestamp must not be before start time".into()));
        }
        let points = ((end_ms - start_ms) / step_ms) as usize + 1;
        if points > MAX_POINTS {
            return Err(QueryError::InvalidRange(format!(
                "exceeded maximum resolution of {MAX_POINTS} points per timeseries"
            )));
        }

        let expr = parse(query)?;
        let grid = Grid {
            start_ms,
            step_ms,
            points,
        };
        let ev = Evaluator::new(
            &self.catalog,
            grid,
            raw_resolution(step_ms),
            self.lookback.num_milliseconds(),
        );

        let series = match ev.eval(&expr)? {
            EvalValue::Vector(series) => series,
            EvalValue::Scalar(values) => vec![StepSeries {
                labels: Labels::new(),
                points: values.into_iter().map(Some).collect(),
            }],
            EvalValue::String(_) => {
                return Err(QueryError::Eval(
                    "invalid expression type \"string\" for range query, must be scalar or instant vector".into(),
                ))
            }
        };

        let matrix = series
            .into_iter()
            .filter_map(|s| {
                let values: Vec<Sample> = s
                    .points
                    .iter()
                    .enumerate()
                    .filter_map(|(i, p)| p.map(|v| Sample::new(grid.time(i) as f64 / 1000.0, v)))
                    .collect();
                (!values.is_empty()).then_some(RangeSeries {
                    metric: s.labels,
                    values,
                })
            })
            .collect();
        Ok(QueryValue::Matrix(sorted(matrix)))
    }

    /// Label names, from the catalog or from the series each selector
    /// returns over `[start, end]`.
    pub fn label_names(
        &self,
        matchers: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>, QueryError> {
        if matchers.is_empty() {
            return Ok(self.catalog.label_names());
        }
        let names = self
            .matched_series(matchers, start, end)?
            .into_iter()
            .flat_map(|labels| labels.into_keys());
        Ok(sorted_unique(names))
    }

    pub fn label_values(
        &self,
        label: &str,
        matchers: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>, QueryError> {
        if matchers.is_empty() {
            return Ok(self.catalog.label_values(label));
        }
        let values = self
            .matched_series(matchers, start, end)?
            .into_iter()
            .filter_map(|mut labels| labels.remove(label));
        Ok(sorted_unique(values))
    }

    pub fn series(&self, matchers: &[String]) -> Result<Vec<Labels>, QueryError> {
        let mut out = Vec::new();
        for matcher in matchers {
            let selector = selector(matcher)?;
            out.extend(self.catalog.matching(&selector.matchers).map(|m| m.labels.clone()));
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    pub fn metadata(&self, metric: &str) -> HashMap<String, Vec<MetricMetadata>> {
        let mut out: HashMap<String, Vec<MetricMetadata>> = HashMap::new();
        for m in self.catalog.metrics() {
            let name = m.name();
            if !metric.is_empty() && name != metric {
                continue;
            }
            out.entry(name.to_string()).or_insert_with(|| {
                vec![MetricMetadata {
                    kind: if m.is_gauge { "gauge" } else { "counter" }.into(),
                    help: format!("Synthetic {name}"),
                    unit: String::new(),
                }]
            });
        }
        out
    }

    fn matched_series(
        &self,
        matchers: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Labels>, QueryError> {
        let range = Range::new(start, end, Duration::minutes(1));
        let mut out = Vec::new();
        for matcher in matchers {
            match self.range(matcher, range)? {
                QueryValue::Matrix(series) => out.extend(series.into_iter().map(|s| s.metric)),
                other => {
                    return Err(QueryError::Eval(format!(
                        "selector {matcher:?} evaluated to {}",
                        other.kind()
                    )))
                }
            }
        }
        Ok(out)
    }
}

/// Raw sample spacing for a range query; always divides the step so every
/// evaluation timestamp has a sample.
fn raw_resolution(step_ms: i64) -> i64 {
    if step_ms > INSTANT_RESOLUTION_MS && step_ms % INSTANT_RESOLUTION_MS == 0 {
        INSTANT_RESOLUTION_MS
    } else {
        step_ms
    }
}

fn selector(query: &str) -> Result<Selector, QueryError> {
    match parse(query)? {
        Expr::Selector(selector) => Ok(selector),
        _ => Err(QueryError::Eval(format!("{query:?} is not a series selector"))),
    }
}

fn is_sort(expr: &Expr) -> bool {
    match expr {
        Expr::Paren(inner) => is_sort(inner),
        Expr::Call { name, .. } => name == "sort" || name == "sort_desc",
        _ => false,
    }
}

fn sorted(mut series: Vec<RangeSeries>) -> Vec<RangeSeries> {
    series.sort_by(|a, b| a.metric.cmp(&b.metric));
    series
}

fn sorted_unique(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut items: Vec<String> = items.collect();
    items.sort();
    items.dedup();
    items
}

#[async_trait]
impl PrometheusApi for QueryEngine {
    async fn query(&self, query: &str, time: DateTime<Utc>) -> Result<QueryOutput, ToolError> {
        debug!("loopback instant query: {query}");
        Ok(QueryOutput::new(self.instant(query, time)?))
    }

    async fn query_range(&self, query: &str, range: Range) -> Result<QueryOutput, ToolError> {
        debug!("loopback range query: {query}");
        Ok(QueryOutput::new(self.range(query, range)?))
    }

    async fn label_names(
        &self,
        matchers: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>, ToolError> {
        Ok(QueryEngine::label_names(self, matchers, start, end)?)
    }

    async fn label_values(
        &self,
        label: &str,
        matchers: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>, ToolError> {
        Ok(QueryEngine::label_values(self, label, matchers, start, end)?)
    }

    async fn series(
        &self,
        matchers: &[String],
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<Labels>, ToolError> {
        Ok(QueryEngine::series(self, matchers)?)
    }

    async fn metadata(&self, metric: &str) -> Result<HashMap<String, Vec<MetricMetadata>>, ToolError> {
        Ok(QueryEngine::metadata(self, metric))
    }

    async fn rules(&self, _kind: Option<&str>) -> Result<Value, ToolError> {
        Err(ToolError::Unimplemented("rules on the loopback engine".into()))
    }

    async fn alerts(&self) -> Result<Value, ToolError> {
        Err(ToolError::Unimplemented("alerts on the loopback engine".into()))
    }

    async fn targets(&self) -> Result<Value, ToolError> {
        Err(ToolError::Unimplemented("targets on the loopback engine".into()))
    }

    async fn build_info(&self) -> Result<Value, ToolError> {
        Err(ToolError::Unimplemented("build info on the loopback engine".into()))
    }
}
