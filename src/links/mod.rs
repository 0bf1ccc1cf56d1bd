//! Deep links into the platform UI.
//!
//! Pure URL composition with no I/O. Parameters are collected in a sorted map
//! so the resulting query string is stable.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

pub const METRIC_EXPLORER_PATH: &str = "/metrics/explorer-v2";
pub const LOG_EXPLORER_PATH: &str = "/logs/explorer";
pub const EVENT_EXPLORER_PATH: &str = "/events/explorer";

/// Vends link builders rooted at the platform's base URL.
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    base: Url,
}

impl LinkBuilder {
    pub fn new(base: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            base: Url::parse(base)?,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn metric_explorer(&self) -> MetricExplorer {
        MetricExplorer {
            link: self.custom(METRIC_EXPLORER_PATH),
            queries: Vec::new(),
        }
    }

    pub fn log_explorer(&self) -> LogExplorer {
        LogExplorer {
            link: self.custom(LOG_EXPLORER_PATH).with_param("visualization", "list"),
        }
    }

    pub fn event_explorer(&self) -> EventExplorer {
        EventExplorer {
            link: self.custom(EVENT_EXPLORER_PATH),
            query: String::new(),
        }
    }

    pub fn custom(&self, path: &str) -> Link {
        Link {
            base: self.base.clone(),
            path: path.to_string(),
            params: BTreeMap::new(),
        }
    }
}

/// A link to an arbitrary UI path with fluent parameters.
#[derive(Debug, Clone)]
pub struct Link {
    base: Url,
    path: String,
    params: BTreeMap<String, String>,
}

impl Link {
    /// Empty values are skipped.
    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if value.is_empty() {
            self.params.remove(key);
        } else {
            self.params.insert(key.to_string(), value);
        }
        self
    }

    pub fn with_params<I, K, V>(self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        params
            .into_iter()
            .fold(self, |link, (k, v)| link.with_param(k.as_ref(), v))
    }

    /// Seconds since the epoch.
    pub fn with_time_sec(self, key: &str, time: DateTime<Utc>) -> Self {
        self.with_param(key, time.timestamp().to_string())
    }

    fn with_time_ms(self, key: &str, time: DateTime<Utc>) -> Self {
        self.with_param(key, time.timestamp_millis().to_string())
    }

    pub fn build(&self) -> String {
        let mut url = self.base.clone();
        let path = format!(
            "{}/{}",
            self.base.path().trim_end_matches('/'),
            self.path.trim_start_matches('/')
        );
        url.set_path(&path);
        url.set_query(None);
        if !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(self.params.iter());
        }
        url.to_string()
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build())
    }
}

#[derive(Serialize)]
struct DataQuery<'a> {
    kind: &'static str,
    spec: DataQuerySpec<'a>,
}

#[derive(Serialize)]
struct DataQuerySpec<'a> {
    plugin: Plugin<'a>,
}

#[derive(Serialize)]
struct Plugin<'a> {
    kind: &'static str,
    spec: PluginSpec<'a>,
}

#[derive(Serialize)]
struct PluginSpec<'a> {
    query: &'a str,
}

impl<'a> DataQuery<'a> {
    fn prometheus(query: &'a str) -> Self {
        Self {
            kind: "DataQuery",
            spec: DataQuerySpec {
                plugin: Plugin {
                    kind: "PrometheusTimeSeriesQuery",
                    spec: PluginSpec { query },
                },
            },
        }
    }
}

/// Metric explorer link; each query is one element of the `queries` array.
#[derive(Debug, Clone)]
pub struct MetricExplorer {
    link: Link,
    queries: Vec<String>,
}

impl MetricExplorer {
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        if !query.is_empty() {
            self.queries.push(query);
        }
        self
    }

    pub fn with_time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.link = self.link.with_time_ms("start", start).with_time_ms("end", end);
        self
    }

    pub fn build(&self) -> String {
        if self.queries.is_empty() {
            return self.link.build();
        }
        let queries: Vec<DataQuery> = self.queries.iter().map(|q| DataQuery::prometheus(q)).collect();
        // serializing plain string structs cannot fail
        let encoded = serde_json::to_string(&queries).unwrap_or_default();
        self.link.clone().with_param("queries", encoded).build()
    }
}

impl fmt::Display for MetricExplorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build())
    }
}

/// Log explorer link; `visualization` defaults to `list`.
#[derive(Debug, Clone)]
pub struct LogExplorer {
    link: Link,
}

impl LogExplorer {
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.link = self.link.with_param("query", query);
        self
    }

    pub fn with_visualization(mut self, visualization: &str) -> Self {
        self.link = self.link.with_param("visualization", visualization);
        self
    }

    pub fn with_time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.link = self.link.with_time_ms("start", start).with_time_ms("end", end);
        self
    }

    pub fn build(&self) -> String {
        self.link.build()
    }
}

impl fmt::Display for LogExplorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build())
    }
}

#[derive(Serialize)]
struct ChangeEventsParams<'a> {
    query: &'a str,
    slug: &'a str,
}

/// Event explorer link. The window is expressed as a relative token.
#[derive(Debug, Clone)]
pub struct EventExplorer {
    link: Link,
    query: String,
}

impl EventExplorer {
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.link = self.link.with_param("start", relative_token(end - start));
        self
    }

    pub fn build(&self) -> String {
        if self.query.is_empty() {
            return self.link.build();
        }
        let params = ChangeEventsParams {
            query: &self.query,
            slug: "",
        };
        let encoded = serde_json::to_string(&params).unwrap_or_default();
        self.link.clone().with_param("change_events_params", encoded).build()
    }
}

impl fmt::Display for EventExplorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build())
    }
}

/// `Nd` for at least a day, `Nh` for at least an hour, otherwise `Nm`.
pub fn relative_token(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    if secs >= 86_400 {
        format!("{}d", secs / 86_400)
    } else if secs >= 3_600 {
        format!("{}h", secs / 3_600)
    } else {
        format!("{}m", secs / 60)
    }
}
