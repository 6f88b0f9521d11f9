//! The transport seam between the orchestrator and an HTTP client.
//!
//! # Design
//! `OData` never performs I/O itself. It compiles an `HttpRequest` and
//! hands it to a `Transport`. Transports report failures with
//! `TransportError`, whose variants follow the usual HTTP client taxonomy:
//! a completed exchange with an error status, a failure to get any
//! response, and everything else. The request error handler turns these
//! into `ODataError`.
//!
//! `UreqTransport` is the blocking implementation used by default.

use thiserror::Error;

use crate::http::{HttpRequest, HttpResponse};

/// Failure reported by a `Transport`.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The server answered, but with an error status.
    #[error("server returned status {status}")]
    Status {
        status: u16,
        response: Option<HttpResponse>,
    },

    /// No response was received (DNS failure, refused connection, timeout).
    #[error("could not connect: {message}")]
    Connect { message: String },

    /// Any other failure inside the HTTP client.
    #[error("transport failure: {message}")]
    Other { message: String, code: Option<u16> },
}

/// Executes a compiled request.
///
/// Implementations must return `TransportError::Status` for 4xx and 5xx
/// answers rather than a successful `HttpResponse`.
pub trait Transport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request)
    }
}

#[cfg(feature = "ureq")]
pub use self::blocking::UreqTransport;

#[cfg(feature = "ureq")]
mod blocking {
    use std::fmt;
    use std::time::Duration;

    use base64::Engine;
    use ureq::typestate::{WithBody, WithoutBody};
    use ureq::{Agent, RequestBuilder};

    use super::{Transport, TransportError};
    use crate::config::Auth;
    use crate::http::{HttpMethod, HttpRequest, HttpResponse};

    /// Blocking transport backed by a `ureq::Agent`.
    ///
    /// Proxies and TLS are configured on the agent. Of the client
    /// parameters, `timeout` (seconds, whole request) is applied per
    /// request; the rest are ignored.
    #[derive(Clone)]
    pub struct UreqTransport {
        agent: Agent,
    }

    impl fmt::Debug for UreqTransport {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("UreqTransport").finish_non_exhaustive()
        }
    }

    impl Default for UreqTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl UreqTransport {
        pub fn new() -> Self {
            let agent = Agent::config_builder().http_status_as_error(false).build().new_agent();
            Self { agent }
        }

        /// Use a caller-built agent. It must have `http_status_as_error`
        /// disabled so error statuses arrive with their response.
        pub fn with_agent(agent: Agent) -> Self {
            Self { agent }
        }

        fn prepare<B>(builder: RequestBuilder<B>, request: &HttpRequest) -> RequestBuilder<B> {
            let mut builder = builder;
            for (key, value) in &request.query {
                builder = builder.query(key, value);
            }
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(auth) = &request.auth {
                builder = builder.header("Authorization", authorization(auth).as_str());
            }
            if let Some(timeout) = request_timeout(request) {
                builder = builder.config().timeout_global(Some(timeout)).build();
            }
            builder
        }

        fn without_body(
            builder: RequestBuilder<WithoutBody>,
            request: &HttpRequest,
        ) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
            Self::prepare(builder, request).call()
        }

        fn with_body(
            builder: RequestBuilder<WithBody>,
            request: &HttpRequest,
        ) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
            Self::prepare(builder, request).send(request.body.as_bytes())
        }
    }

    impl Transport for UreqTransport {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            let uri = request.uri.as_str();
            let result = match request.method {
                HttpMethod::Get => Self::without_body(self.agent.get(uri), request),
                HttpMethod::Delete => Self::without_body(self.agent.delete(uri), request),
                HttpMethod::Post => Self::with_body(self.agent.post(uri), request),
                HttpMethod::Patch => Self::with_body(self.agent.patch(uri), request),
            };
            let mut response = result.map_err(send_failure)?;

            let status = response.status();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            let body = response.body_mut().read_to_string().map_err(read_failure)?;

            let response = HttpResponse {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
                headers,
                body,
            };
            if response.status >= 400 {
                return Err(TransportError::Status {
                    status: response.status,
                    response: Some(response),
                });
            }
            Ok(response)
        }
    }

    fn authorization(auth: &Auth) -> String {
        match auth {
            Auth::Basic { username, password } => {
                let token = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
                format!("Basic {token}")
            }
            Auth::Bearer(token) => format!("Bearer {token}"),
        }
    }

    fn request_timeout(request: &HttpRequest) -> Option<Duration> {
        request
            .client
            .get("timeout")
            .and_then(serde_json::Value::as_f64)
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    fn send_failure(err: ureq::Error) -> TransportError {
        match err {
            ureq::Error::StatusCode(status) => TransportError::Status { status, response: None },
            ureq::Error::HostNotFound
            | ureq::Error::ConnectionFailed
            | ureq::Error::Timeout(_)
            | ureq::Error::Io(_) => TransportError::Connect {
                message: err.to_string(),
            },
            other => TransportError::Other {
                message: other.to_string(),
                code: None,
            },
        }
    }

    /// A response arrived, so nothing here is a connection failure.
    fn read_failure(err: ureq::Error) -> TransportError {
        TransportError::Other {
            message: format!("failed to read response body: {err}"),
            code: None,
        }
    }

}
