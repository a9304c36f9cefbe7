//! Request context handed to the dispatcher.
//!
//! Identity is resolved upstream; the gateway only reads the ids.

use crate::domain::rule::Method;
use bytes::Bytes;
use std::collections::BTreeMap;

/// Caller identity used for partitioning counters and cache keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Identity<'a> {
    pub user_id: Option<&'a str>,
    pub organization_id: Option<&'a str>,
}

impl<'a> Identity<'a> {
    pub fn new(user_id: Option<&'a str>, organization_id: Option<&'a str>) -> Self {
        Self {
            user_id,
            organization_id,
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// Description of one incoming request.
///
/// Header names are stored lower-cased so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    headers: BTreeMap<String, String>,
    pub user_id: Option<String>,
    pub organization_id: Option<String>,
    /// Never interpreted, only measured
    pub body: Option<Bytes>,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: BTreeMap::new(),
            user_id: None,
            organization_id: None,
            body: None,
        }
    }

    /// Shorthand for a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.headers
                .insert(name.as_ref().to_ascii_lowercase(), value.into());
        }
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn identity(&self) -> Identity<'_> {
        Identity::new(self.user_id.as_deref(), self.organization_id.as_deref())
    }

    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Bytes::len)
    }
}
