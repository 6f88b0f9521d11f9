//! Connection configuration: host, credentials, headers and free-form
//! transport parameters.
//!
//! # Design
//! `Config` is owned by the caller and only read by the orchestrator when it
//! compiles a request. Default headers are merged under caller headers once,
//! at construction, so there is no shared default state to mutate.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ODataError;

/// Credentials handed to the transport. Opaque to the query compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Auth {
    Basic { username: String, password: String },
    Bearer(String),
}

/// Headers present on every `Config` unless the caller removes them.
pub fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Accept".to_string(), "application/json".to_string()),
        ("Content-Type".to_string(), "application/json".to_string()),
    ])
}

/// Host, auth, headers and extra transport parameters for an `OData` client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    host: String,
    auth: Option<Auth>,
    #[serde(deserialize_with = "headers_over_defaults")]
    headers: BTreeMap<String, String>,
    client_parameters: serde_json::Map<String, serde_json::Value>,
}

fn headers_over_defaults<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut merged = default_headers();
    merged.extend(BTreeMap::<String, String>::deserialize(deserializer)?);
    Ok(merged)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            auth: None,
            headers: default_headers(),
            client_parameters: serde_json::Map::new(),
        }
    }
}

/// The configuration half of a compiled request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigParameters {
    pub auth: Option<Auth>,
    pub headers: BTreeMap<String, String>,
    /// Client parameters other than `auth` and `headers`.
    pub client: serde_json::Map<String, serde_json::Value>,
}

impl Config {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            ..Self::default()
        }
    }

    /// Build a config with caller headers layered over the defaults.
    pub fn with(
        host: &str,
        auth: Option<Auth>,
        headers: BTreeMap<String, String>,
        client_parameters: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let mut merged = default_headers();
        merged.extend(headers);
        Self {
            host: host.to_string(),
            auth,
            headers: merged,
            client_parameters,
        }
    }

    /// Load a config from JSON. Missing fields take their defaults; a
    /// `headers` object is layered over the default headers.
    pub fn from_json(raw: &str) -> Result<Self, ODataError> {
        serde_json::from_str(raw).map_err(|e| ODataError::Deserialization(e.to_string()))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn set_host(&mut self, host: &str) -> &mut Self {
        self.host = host.to_string();
        self
    }

    pub fn auth(&self) -> Option<&Auth> {
        self.auth.as_ref()
    }

    pub fn set_auth(&mut self, auth: Auth) -> &mut Self {
        self.auth = Some(auth);
        self
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Replace every header, defaults included.
    pub fn set_headers(&mut self, headers: BTreeMap<String, String>) -> &mut Self {
        self.headers = headers;
        self
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn clear_header(&mut self, name: &str) -> &mut Self {
        self.headers.remove(name);
        self
    }

    pub fn client_parameters(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.client_parameters
    }

    pub fn set_client_parameters(
        &mut self,
        params: serde_json::Map<String, serde_json::Value>,
    ) -> &mut Self {
        self.client_parameters = params;
        self
    }

    /// Merge client parameters with auth and headers.
    ///
    /// A `headers` object inside the client parameters is folded in under
    /// the configured headers; an `auth` entry there is dropped in favour of
    /// the configured auth.
    pub fn config_parameters(&self) -> ConfigParameters {
        let mut client = self.client_parameters.clone();
        client.remove("auth");

        let mut headers = BTreeMap::new();
        if let Some(serde_json::Value::Object(extra)) = client.remove("headers") {
            for (name, value) in extra {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                headers.insert(name, value);
            }
        }
        headers.extend(self.headers.clone());

        ConfigParameters {
            auth: self.auth.clone(),
            headers,
            client,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn new_config_has_default_headers() {
        let config = Config::new("");
        assert_eq!(config.headers(), &default_headers());
        assert!(config.auth().is_none());
        assert!(config.client_parameters().is_empty());
    }

    #[test]
    fn caller_headers_override_defaults() {
        let config = Config::with(
            "host",
            None,
            BTreeMap::from([("Accept".to_string(), "atom/xml".to_string())]),
            serde_json::Map::new(),
        );
        assert_eq!(config.host(), "host");
        assert_eq!(config.headers()["Accept"], "atom/xml");
        assert_eq!(config.headers()["Content-Type"], "application/json");
    }

    #[test]
    fn config_parameters_merge_auth_headers_and_client_params() {
        let mut config = Config::new("");
        config
            .set_auth(Auth::Basic {
                username: "login".to_string(),
                password: "password".to_string(),
            })
            .set_header("Content-Encoding", "test value")
            .set_client_parameters(map(json!({"timeout": 10})));

        let params = config.config_parameters();
        assert_eq!(
            params.auth,
            Some(Auth::Basic {
                username: "login".to_string(),
                password: "password".to_string()
            })
        );
        assert_eq!(params.headers.len(), 3);
        assert_eq!(params.headers["Content-Encoding"], "test value");
        assert_eq!(params.client["timeout"], 10);
    }

    #[test]
    fn client_param_headers_fold_under_config_headers() {
        let mut config = Config::new("");
        config.set_client_parameters(map(json!({
            "headers": {"Accept": "text/plain", "X-Trace": "1"},
            "auth": "ignored",
            "verify": false
        })));

        let params = config.config_parameters();
        assert_eq!(params.headers["Accept"], "application/json");
        assert_eq!(params.headers["X-Trace"], "1");
        assert!(!params.client.contains_key("headers"));
        assert!(!params.client.contains_key("auth"));
        assert_eq!(params.client["verify"], false);
    }

    #[test]
    fn clear_header_removes_only_that_header() {
        let mut config = Config::new("");
        config.clear_header("Accept");
        assert_eq!(config.headers().len(), 1);
        assert!(config.headers().contains_key("Content-Type"));
    }

    #[test]
    fn from_json_defaults_missing_fields() {
        let config = Config::from_json(r#"{"host":"https://erp","auth":{"bearer":"t"}}"#).unwrap();
        assert_eq!(config.host(), "https://erp");
        assert_eq!(config.auth(), Some(&Auth::Bearer("t".to_string())));
        assert_eq!(config.headers(), &default_headers());
    }

    #[test]
    fn from_json_layers_headers_over_defaults() {
        let config = Config::from_json(r#"{"headers":{"X-Trace":"1","Accept":"atom/xml"}}"#).unwrap();
        assert_eq!(config.headers().len(), 3);
        assert_eq!(config.headers()["X-Trace"], "1");
        assert_eq!(config.headers()["Accept"], "atom/xml");
        assert_eq!(config.headers()["Content-Type"], "application/json");
    }

    #[test]
    fn from_json_rejects_garbage() {
        let err = Config::from_json("not json").unwrap_err();
        assert!(matches!(err, ODataError::Deserialization(_)));
    }
}
