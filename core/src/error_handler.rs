//! Translation of request failures into `ODataError`.
//!
//! # Design
//! The handler is the single place where opaque transport failures become
//! typed errors. It always produces an error; there is no "handled" outcome.
//! Checks run in this order:
//!
//! 1. a completed exchange with an error status, split on 401 / 404 / other;
//! 2. a failure to receive any response, which keeps the compiled request;
//! 3. any other transport failure;
//! 4. errors raised by the client itself, passed through unchanged.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::config::ConfigParameters;
use crate::error::ODataError;
use crate::http::HttpRequest;
use crate::transport::TransportError;

/// Snapshot of a compiled request, attached to connection failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DebugContext {
    pub uri: String,
    pub config: ConfigParameters,
    pub query: BTreeMap<String, String>,
    pub body: String,
}

impl From<&HttpRequest> for DebugContext {
    fn from(request: &HttpRequest) -> Self {
        Self {
            uri: request.uri.clone(),
            config: ConfigParameters {
                auth: request.auth.clone(),
                headers: request.headers.clone(),
                client: request.client.clone(),
            },
            query: request.query.clone(),
            body: request.body.clone(),
        }
    }
}

/// A failure caught while executing a terminal action.
#[derive(Debug)]
pub enum RequestFailure {
    /// Reported by the transport.
    Transport(TransportError),
    /// Raised by the client before or around the transport call.
    Client(ODataError),
}

impl From<TransportError> for RequestFailure {
    fn from(err: TransportError) -> Self {
        RequestFailure::Transport(err)
    }
}

impl From<ODataError> for RequestFailure {
    fn from(err: ODataError) -> Self {
        RequestFailure::Client(err)
    }
}

/// Maps a caught failure to the error returned to the caller.
pub trait RequestErrorHandler {
    fn handle(&self, failure: RequestFailure, debug: Option<DebugContext>) -> ODataError;
}

/// The default failure mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct ODataRequestErrorHandler;

impl RequestErrorHandler for ODataRequestErrorHandler {
    fn handle(&self, failure: RequestFailure, debug: Option<DebugContext>) -> ODataError {
        let err = match failure {
            RequestFailure::Transport(TransportError::Status { status, response }) => {
                let reason = response.as_ref().map(|r| r.reason.clone()).filter(|r| !r.is_empty());
                match status {
                    401 => ODataError::Auth {
                        message: reason.unwrap_or_else(|| "Unauthorized".to_string()),
                        response,
                    },
                    404 => ODataError::NotFound {
                        message: reason.unwrap_or_else(|| "Not Found".to_string()),
                        response,
                    },
                    _ => ODataError::Request {
                        status,
                        reason,
                        response,
                    },
                }
            }
            RequestFailure::Transport(TransportError::Connect { message }) => ODataError::Connection {
                message,
                debug: Box::new(debug.unwrap_or_default()),
            },
            RequestFailure::Transport(TransportError::Other { message, code }) => {
                ODataError::Service { message, code }
            }
            RequestFailure::Client(err) => return err,
        };
        debug!(target: "odata_core::error_handler", error = %err, "request failed");
        err
    }
}
