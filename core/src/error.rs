//! Error types for the OData client.
//!
//! # Design
//! `ODataError` is the whole taxonomy a caller of a terminal action can
//! observe. `InvalidParameter` is raised before anything touches the
//! network. `Auth`, `NotFound` and `Request` come from a completed HTTP
//! exchange with an error status, `Connection` from an exchange that never
//! produced a response, and `Service` from any other transport failure.
//! The transport-side failures are produced only by the request error
//! handler in `error_handler`.

use thiserror::Error;

use crate::error_handler::DebugContext;
use crate::http::HttpResponse;
use crate::response::Response;

/// Errors returned by `OData`, `QueryState` and `Response`.
#[derive(Debug, Error)]
pub enum ODataError {
    /// The caller supplied a malformed value (bad GUID, unknown enum value,
    /// wrong shape for a field list, empty host).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The server answered 401.
    #[error("authentication failed: {message}")]
    Auth {
        message: String,
        response: Option<HttpResponse>,
    },

    /// The server answered 404.
    #[error("not found: {message}")]
    NotFound {
        message: String,
        response: Option<HttpResponse>,
    },

    /// The server answered with any other error status.
    #[error("request failed with status {status}: {}", .reason.as_deref().unwrap_or("<no reason>"))]
    Request {
        status: u16,
        reason: Option<String>,
        response: Option<HttpResponse>,
    },

    /// No response was received at all. Carries the request as it was
    /// compiled when the failure happened.
    #[error("connection failed: {message}")]
    Connection {
        message: String,
        debug: Box<DebugContext>,
    },

    /// Any other failure inside the transport.
    #[error("service error: {message}")]
    Service { message: String, code: Option<u16> },

    /// `Response::body_key` was asked for a key the decoded body lacks.
    #[error("key '{key}' does not exist in the response body")]
    KeyNotFound { key: String, response: Box<Response> },

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The response body could not be decoded.
    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

impl ODataError {
    /// HTTP status carried by the error, when the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            ODataError::Auth { .. } => Some(401),
            ODataError::NotFound { .. } => Some(404),
            ODataError::Request { status, .. } => Some(*status),
            ODataError::Service { code, .. } => *code,
            _ => None,
        }
    }

    /// Raw transport response for status-bearing errors.
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            ODataError::Auth { response, .. }
            | ODataError::NotFound { response, .. }
            | ODataError::Request { response, .. } => response.as_ref(),
            _ => None,
        }
    }
}
