//! Request Descriptor (C4): a caller's intent to call one endpoint, before
//! auth headers, dedup fingerprinting, or retry state are attached.

use std::collections::HashMap;

use bytes::Bytes;

/// HTTP verb. Kept as a closed enum (rather than a string) so the retry
/// engine and dedup table can match on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// One endpoint call, described independently of how it will be dispatched.
///
/// `query` is an ordered list rather than a map: two descriptors that differ
/// only in query-parameter order must still produce the same dedup
/// fingerprint, so ordering is normalized (sorted) at fingerprint time
/// instead of being lost here (spec §4.4).
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    /// Whether the pipeline should inject `Authorization: Bearer <token>`.
    /// `false` only for the token endpoint itself, which authenticates via
    /// Basic auth or form credentials instead (spec §4.2 step 4).
    pub authenticated: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        RequestDescriptor {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HashMap::new(),
            body: None,
            authenticated: true,
        }
    }

    /// Marks this call as not requiring an injected bearer token.
    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }

    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn json_body(mut self, body: &impl serde::Serialize) -> crate::error::Result<Self> {
        let bytes = serde_json::to_vec(body)?;
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    /// A GET with no body is treated as idempotent and eligible for both
    /// dedup and transient-failure retry; every other method is not unless
    /// the caller built it from a safe template (spec §4.4, §4.2 step 6).
    pub fn is_idempotent(&self) -> bool {
        matches!(self.method, Method::Get) && self.body.is_none()
    }

    /// Assembles the full URL against a base, percent-encoding query values
    /// via `url::Url`.
    ///
    /// `Url::join` treats a base path without a trailing slash as a file,
    /// not a directory, and drops its last segment when resolving a
    /// relative reference (so `.../v1` + `me` would become `.../me`,
    /// silently losing `v1`). The base's path is normalized to end in `/`
    /// before joining so it always behaves as a directory prefix.
    pub fn build_url(&self, base: &url::Url) -> crate::error::Result<url::Url> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let directory_path = format!("{}/", base.path());
            base.set_path(&directory_path);
        }
        let mut url = base.join(self.path.trim_start_matches('/'))?;
        let non_empty: Vec<_> = self.query.iter().filter(|(_, v)| !v.is_empty()).collect();
        if !non_empty.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in non_empty {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_keeps_base_path_segment() {
        let base = url::Url::parse("https://api.melodia.example.com/v1").unwrap();
        let descriptor = RequestDescriptor::new(Method::Get, "/me");
        let url = descriptor.build_url(&base).unwrap();
        assert_eq!(url.as_str(), "https://api.melodia.example.com/v1/me");
    }

    #[test]
    fn build_url_appends_sorted_by_insertion_query_params() {
        let base = url::Url::parse("https://api.melodia.example.com/v1").unwrap();
        let descriptor = RequestDescriptor::new(Method::Get, "/tracks")
            .query_param("ids", "a")
            .query_param("ids", "b");
        let url = descriptor.build_url(&base).unwrap();
        assert_eq!(url.query(), Some("ids=a&ids=b"));
    }

    #[test]
    fn build_url_omits_empty_value_query_params() {
        let base = url::Url::parse("https://api.melodia.example.com/v1").unwrap();
        let descriptor = RequestDescriptor::new(Method::Get, "/search")
            .query_param("q", "phoenix")
            .query_param("market", "");
        let url = descriptor.build_url(&base).unwrap();
        assert_eq!(url.query(), Some("q=phoenix"));
    }

    #[test]
    fn new_descriptor_defaults_to_authenticated() {
        let descriptor = RequestDescriptor::new(Method::Get, "/me");
        assert!(descriptor.authenticated);
        assert!(!descriptor.unauthenticated().authenticated);
    }
}
