use super::transport::Transport;
use crate::common::ptr;
use crate::error::ToolError;
use crate::session::Session;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use url::Url;

/// A base URL plus the transport and session every call goes out under.
#[derive(Clone)]
pub struct RestClient {
    transport: Arc<Transport>,
    base: String,
    session: Session,
}

impl RestClient {
    pub fn new(transport: Arc<Transport>, base: &str, session: Session) -> Self {
        Self {
            transport,
            base: base.trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(String, String)]) -> Result<T, ToolError> {
        self.get_url(&self.url(path), query).await
    }

    /// GET `path` followed by caller-supplied `segments`, each sent as one
    /// encoded path segment.
    pub async fn get_segments<T: DeserializeOwned>(
        &self,
        path: &str,
        segments: &[&str],
        query: &[(String, String)],
    ) -> Result<T, ToolError> {
        let url = segment_url(&self.url(path), segments)?;
        self.get_url(url.as_str(), query).await
    }

    async fn get_url<T: DeserializeOwned>(&self, url: &str, query: &[(String, String)]) -> Result<T, ToolError> {
        let builder = self
            .transport
            .request(&self.session, Method::GET, url)
            .query(query);
        self.transport.json(&self.session, builder).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ToolError> {
        let builder = self
            .transport
            .request(&self.session, Method::POST, &self.url(path))
            .json(body);
        self.transport.json(&self.session, builder).await
    }
}

/// `base` with each of `segments` appended as a single percent-encoded path
/// segment. `/`, `?` and `#` inside a segment never change the path shape.
pub fn segment_url(base: &str, segments: &[&str]) -> Result<Url, ToolError> {
    if let Some(dot) = segments.iter().find(|s| matches!(**s, "" | "." | "..")) {
        return Err(ToolError::invalid(format!("{dot:?} is not a valid path segment")));
    }
    let mut url = Url::parse(base).map_err(|e| ToolError::Internal(format!("base url {base:?}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| ToolError::Internal(format!("base url {base:?} cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Query-string builder that drops empty values and repeats array keys.
#[derive(Debug, Default, Clone)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: impl ToString) -> &mut Self {
        if let Some(value) = ptr::non_zero(value.to_string()) {
            self.0.push((key.to_string(), value));
        }
        self
    }

    pub fn push_opt<V: ToString>(&mut self, key: &str, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.push(key, value);
        }
        self
    }

    pub fn push_all<V: ToString>(&mut self, key: &str, values: &[V]) -> &mut Self {
        for value in values {
            self.push(key, value.to_string());
        }
        self
    }

    pub fn as_slice(&self) -> &[(String, String)] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params() {
        let mut q = QueryParams::new();
        q.push("a", "1")
            .push("empty", "")
            .push_opt::<u32>("none", None)
            .push_opt("n", Some(5))
            .push_all("slugs", &["x", "y"]);
        assert_eq!(
            q.as_slice(),
            &[
                ("a".to_string(), "1".to_string()),
                ("n".to_string(), "5".to_string()),
                ("slugs".to_string(), "x".to_string()),
                ("slugs".to_string(), "y".to_string()),
            ]
        );
    }

    #[test]
    fn test_segment_url_encodes_each_segment() {
        let url = segment_url("https://acme.example.io/api/v1/config/monitors", &["../dashboards/secret?x=1#top"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://acme.example.io/api/v1/config/monitors/..%2Fdashboards%2Fsecret%3Fx=1%23top"
        );

        let url = segment_url("https://tenant.example.io/logscale/", &["my repo", "query"]).unwrap();
        assert_eq!(url.path(), "/logscale/my%20repo/query");
    }

    #[test]
    fn test_segment_url_rejects_dot_segments() {
        for bad in ["..", ".", ""] {
            let err = segment_url("https://acme.example.io/api", &[bad]).unwrap_err();
            assert!(matches!(err, ToolError::InvalidArgument(_)), "{bad:?}");
        }
    }

    #[test]
    fn test_url_join() {
        let transport = Arc::new(Transport::new("", std::time::Duration::from_secs(1)).unwrap());
        let client = RestClient::new(transport, "https://acme.example.io/", Session::background());
        assert_eq!(
            client.url("/api/v1/config/monitors"),
            "https://acme.example.io/api/v1/config/monitors"
        );
    }
}
