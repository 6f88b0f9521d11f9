//! HTTP transport types exchanged with the `Transport` seam.
//!
//! # Design
//! These types describe HTTP requests and responses as plain data. `OData`
//! compiles an `HttpRequest` from its query state and configuration and
//! hands it to a `Transport`, which returns an `HttpResponse` or a
//! `TransportError`. Keeping both sides as owned data makes the
//! orchestrator testable with an in-memory transport.

use std::collections::BTreeMap;
use std::fmt;

use crate::config::Auth;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully compiled request: configuration parameters merged with the
/// query mapping and JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub uri: String,
    /// Protocol query parameters (`$filter`, `$top`, ...).
    pub query: BTreeMap<String, String>,
    /// JSON-encoded payload.
    pub body: String,
    pub headers: BTreeMap<String, String>,
    pub auth: Option<Auth>,
    /// Free-form transport parameters passed through from `Config`.
    pub client: serde_json::Map<String, serde_json::Value>,
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Reason phrase reported with the status line.
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}
