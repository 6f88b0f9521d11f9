//! Normalized result of a successful request.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ODataError;
use crate::http::HttpResponse;

/// Status line and raw body of a completed request.
///
/// The body is kept as the raw string and decoded on every access; nothing
/// is cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "error")]
    failed: bool,
    code: u16,
    message: String,
    #[serde(rename = "body")]
    raw_body: String,
}

impl Response {
    pub fn new(failed: bool, code: u16, message: &str, raw_body: &str) -> Self {
        Self {
            failed,
            code,
            message: message.to_string(),
            raw_body: raw_body.to_string(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    /// Reason phrase of the response.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn raw_body(&self) -> &str {
        &self.raw_body
    }

    /// Decode the whole body as JSON.
    pub fn body(&self) -> Result<serde_json::Value, ODataError> {
        serde_json::from_str(&self.raw_body).map_err(|e| ODataError::Deserialization(e.to_string()))
    }

    /// Decode the body and return the value under `key`.
    pub fn body_key(&self, key: &str) -> Result<serde_json::Value, ODataError> {
        let mut body = self.body()?;
        body.as_object_mut()
            .and_then(|fields| fields.remove(key))
            .ok_or_else(|| ODataError::KeyNotFound {
                key: key.to_string(),
                response: Box::new(self.clone()),
            })
    }

    /// Apply `transform` to the raw body string.
    pub fn body_with<T>(&self, transform: impl FnOnce(&str) -> T) -> T {
        transform(&self.raw_body)
    }

    /// Decode the body into `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, ODataError> {
        serde_json::from_str(&self.raw_body).map_err(|e| ODataError::Deserialization(e.to_string()))
    }
}

impl From<HttpResponse> for Response {
    fn from(raw: HttpResponse) -> Self {
        Self {
            failed: false,
            code: raw.status,
            message: raw.reason,
            raw_body: raw.body,
        }
    }
}
