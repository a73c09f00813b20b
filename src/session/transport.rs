//! Transport boundary: where the manager reads and writes session ids.
//!
//! The core never touches a concrete HTTP library. Framework glue implements
//! [`Transport`] over its request/response pair; [`RequestContext`] is a
//! plain in-memory implementation for tests and embedding.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// SameSite attribute for the session cookie.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    /// Attribute omitted; browser default applies.
    #[default]
    Default,
    Lax,
    Strict,
    None,
}

impl SameSite {
    pub fn as_attribute(self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::Lax => Some("Lax"),
            Self::Strict => Some("Strict"),
            Self::None => Some("None"),
        }
    }
}

/// Outbound session cookie with its attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub domain: Option<String>,
    pub http_only: bool,
    pub secure: bool,
    /// `Some(0)` expires the cookie immediately, `None` makes it a browser-session cookie.
    pub max_age: Option<u64>,
    pub same_site: SameSite,
}

impl SessionCookie {
    /// Render as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}; Path={}", self.name, self.value, self.path);
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={max_age}"));
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if let Some(same_site) = self.same_site.as_attribute() {
            out.push_str("; SameSite=");
            out.push_str(same_site);
        }
        out
    }
}

/// Request/response carrier of the session identifier.
pub trait Transport: Send {
    /// Inbound cookie value by name.
    fn cookie(&self, name: &str) -> Option<String>;

    /// Inbound URL query parameter by name.
    fn query(&self, name: &str) -> Option<String>;

    /// Inbound header value by name (case-insensitive).
    fn header(&self, name: &str) -> Option<String>;

    /// Whether the inbound connection is TLS-terminated.
    fn is_tls(&self) -> bool;

    /// Queue a cookie on the outbound response. Also makes it visible to
    /// subsequent `cookie` lookups on this request.
    fn set_cookie(&mut self, cookie: SessionCookie);

    /// Set an outbound response header (and the inbound view of it).
    fn set_header(&mut self, name: &str, value: &str);
}

/// In-memory request/response pair.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub cookies: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub tls: bool,
    pub response_cookies: Vec<SessionCookie>,
    pub response_headers: HashMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Most recent outbound cookie with this name.
    pub fn response_cookie(&self, name: &str) -> Option<&SessionCookie> {
        self.response_cookies.iter().rev().find(|c| c.name == name)
    }
}

impl Transport for RequestContext {
    fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.get(name).cloned()
    }

    fn query(&self, name: &str) -> Option<String> {
        self.query.get(name).cloned()
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers.get(&name.to_ascii_lowercase()).cloned()
    }

    fn is_tls(&self) -> bool {
        self.tls
    }

    fn set_cookie(&mut self, cookie: SessionCookie) {
        if cookie.max_age == Some(0) {
            self.cookies.remove(&cookie.name);
        } else {
            self.cookies
                .insert(cookie.name.clone(), cookie.value.clone());
        }
        self.response_cookies.push(cookie);
    }

    fn set_header(&mut self, name: &str, value: &str) {
        let key = name.to_ascii_lowercase();
        self.headers.insert(key.clone(), value.to_string());
        self.response_headers.insert(key, value.to_string());
    }
}
