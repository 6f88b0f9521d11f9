//! Fluent OData client: query state, configuration and a transport.
//!
//! # Design
//! `OData` owns a `QueryState` that callers shape through fluent mutators.
//! Terminal actions (`get`, `create`, `update`, ...) first apply their own
//! resets to that state, then compile a URI and an `HttpRequest`, send it
//! through the `Transport` and wrap the answer in a `Response`. Any failure
//! is routed through the `RequestErrorHandler`.
//!
//! The state is not rolled back when a request fails: resets performed by
//! a terminal action stay applied.

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::config::{Auth, Config};
use crate::error::ODataError;
use crate::error_handler::{DebugContext, ODataRequestErrorHandler, RequestErrorHandler};
use crate::http::{HttpMethod, HttpRequest};
use crate::query::{FieldList, InlineCount, MetadataLevel, QueryAndBody, QueryField, QueryState};
use crate::response::Response;
use crate::transport::Transport;

/// Fixed path between the host and the resource name.
pub const SERVICE_PATH: &str = "odata/standard.odata";

/// Literal appended to a collection URI for count-only requests.
pub const COUNT_MARKER: &str = "$count";

/// Property set by `mark_deleted` when no key is given.
pub const DEFAULT_DELETION_MARK: &str = "DeletionMark";

/// Request builder for one OData service.
///
/// Not meant to be shared between threads while being mutated; each
/// logical client owns its own instance.
pub struct OData<T: Transport> {
    config: Config,
    parameters: QueryState,
    transport: T,
    error_handler: Box<dyn RequestErrorHandler>,
}

#[cfg(feature = "ureq")]
impl OData<crate::transport::UreqTransport> {
    /// Client backed by the blocking `ureq` transport.
    pub fn blocking(config: Config) -> Self {
        Self::new(config, crate::transport::UreqTransport::new())
    }
}

impl<T: Transport> OData<T> {
    pub fn new(config: Config, transport: T) -> Self {
        Self::with_parts(config, transport, QueryState::new(), Box::new(ODataRequestErrorHandler))
    }

    pub fn with_parts(
        config: Config,
        transport: T,
        parameters: QueryState,
        error_handler: Box<dyn RequestErrorHandler>,
    ) -> Self {
        Self {
            config,
            parameters,
            transport,
            error_handler,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn parameters(&self) -> &QueryState {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut QueryState {
        &mut self.parameters
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn set_request_error_handler(&mut self, handler: impl RequestErrorHandler + 'static) -> &mut Self {
        self.error_handler = Box::new(handler);
        self
    }

    pub fn auth_as(&mut self, auth: Auth) -> &mut Self {
        self.config.set_auth(auth);
        self
    }

    pub fn set_host(&mut self, host: &str) -> &mut Self {
        self.config.set_host(host);
        self
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.config.set_header(name, value);
        self
    }

    pub fn clear_header(&mut self, name: &str) -> &mut Self {
        self.config.clear_header(name);
        self
    }

    pub fn set_additional_client_params(&mut self, params: Map<String, Value>) -> &mut Self {
        self.config.set_client_parameters(params);
        self
    }

    pub fn from(&mut self, resource: &str) -> &mut Self {
        self.parameters.set_resource(resource);
        self
    }

    /// Alias of `from`.
    pub fn resource(&mut self, resource: &str) -> &mut Self {
        self.from(resource)
    }

    pub fn filter(&mut self, filter: &str) -> &mut Self {
        self.parameters.set_filter(filter);
        self
    }

    pub fn select(&mut self, select: impl Into<FieldList>) -> &mut Self {
        self.parameters.set_select(select);
        self
    }

    pub fn expand(&mut self, expand: impl Into<FieldList>) -> &mut Self {
        self.parameters.set_expand(expand);
        self
    }

    pub fn order_by(&mut self, order_by: impl Into<FieldList>) -> &mut Self {
        self.parameters.set_order_by(order_by);
        self
    }

    pub fn top(&mut self, value: i64) -> &mut Self {
        self.parameters.set_top(value);
        self
    }

    /// Alias of `top`.
    pub fn limit(&mut self, value: i64) -> &mut Self {
        self.top(value)
    }

    pub fn skip(&mut self, value: i64) -> &mut Self {
        self.parameters.set_skip(value);
        self
    }

    pub fn metadata_level(&mut self, level: MetadataLevel) -> &mut Self {
        self.parameters.set_metadata_level(level);
        self
    }

    pub fn no_metadata(&mut self) -> &mut Self {
        self.metadata_level(MetadataLevel::None)
    }

    pub fn inline_count_all_pages(&mut self) -> &mut Self {
        self.parameters.set_inline_count(InlineCount::AllPages);
        self
    }

    pub fn inline_count_none(&mut self) -> &mut Self {
        self.parameters.set_inline_count(InlineCount::None);
        self
    }

    /// Read the collection with the current query state.
    pub fn get(&mut self) -> Result<Response, ODataError> {
        self.request(HttpMethod::Get)
    }

    /// Read a single entity. Clears any filter and payload first.
    pub fn get_one(&mut self, guid: &str) -> Result<Response, ODataError> {
        self.parameters.reset_only(&[QueryField::Filter, QueryField::Data]);
        self.parameters.set_guid(guid)?;
        self.request(HttpMethod::Get)
    }

    /// Ask for the record count only. The flag stays set until a reset.
    pub fn get_only_count(&mut self) -> Result<Response, ODataError> {
        self.parameters.set_true_is_only_count();
        self.get()
    }

    pub fn create(&mut self, data: Map<String, Value>) -> Result<Response, ODataError> {
        self.parameters.reset_exclude(&[QueryField::Resource]);
        self.parameters.clear_guid();
        self.parameters.set_data(data);
        self.request(HttpMethod::Post)
    }

    pub fn update(&mut self, guid: &str, data: Map<String, Value>) -> Result<Response, ODataError> {
        self.parameters.reset_exclude(&[QueryField::Resource]);
        self.parameters.set_guid(guid)?;
        self.parameters.set_data(data);
        self.request(HttpMethod::Patch)
    }

    /// Set the deletion mark property (`DeletionMark` unless `key` names
    /// another one) to `true`.
    pub fn mark_deleted(&mut self, guid: &str, key: Option<&str>) -> Result<Response, ODataError> {
        let key = key.filter(|k| !k.is_empty()).unwrap_or(DEFAULT_DELETION_MARK);
        self.parameters.reset_exclude(&[QueryField::Resource]);
        self.parameters.set_guid(guid)?;
        self.parameters.set_data(Map::from_iter([(key.to_string(), Value::Bool(true))]));
        self.request(HttpMethod::Patch)
    }

    pub fn force_delete(&mut self, guid: &str) -> Result<Response, ODataError> {
        self.parameters.reset_exclude(&[QueryField::Resource]);
        self.parameters.set_guid(guid)?;
        self.request(HttpMethod::Delete)
    }

    /// `{host}/odata/standard.odata/{resource}{guid}/{count}`.
    ///
    /// The count marker is only added when no GUID is set. The trailing
    /// slash is always present.
    pub fn compile_uri(&self) -> Result<String, ODataError> {
        let host = self.config.host();
        if host.is_empty() {
            return Err(ODataError::InvalidParameter("Host URI is empty.".to_string()));
        }
        let resource = self.parameters.resource();
        let guid = self.parameters.guid();
        let count = if guid.is_empty() && self.parameters.is_only_count() {
            COUNT_MARKER
        } else {
            ""
        };
        Ok(format!("{host}/{SERVICE_PATH}/{resource}{guid}/{count}"))
    }

    /// The request the client would send right now.
    pub fn debug(&self) -> Result<DebugContext, ODataError> {
        self.compile_request(HttpMethod::Get).map(|request| DebugContext::from(&request))
    }

    fn compile_request(&self, method: HttpMethod) -> Result<HttpRequest, ODataError> {
        let uri = self.compile_uri()?;
        let config = self.config.config_parameters();
        let QueryAndBody { query, body } = self.parameters.get_query_and_body()?;

        let mut client = config.client;
        client.remove("query");
        client.remove("body");

        Ok(HttpRequest {
            method,
            uri,
            query,
            body,
            headers: config.headers,
            auth: config.auth,
            client,
        })
    }

    fn request(&self, method: HttpMethod) -> Result<Response, ODataError> {
        let request = match self.compile_request(method) {
            Ok(request) => request,
            Err(err) => return Err(self.error_handler.handle(err.into(), None)),
        };
        debug!(target: "odata_core::client", %method, uri = %request.uri, "sending request");
        trace!(target: "odata_core::client", query = ?request.query, body = %request.body, "compiled parameters");

        match self.transport.send(&request) {
            Ok(raw) => {
                debug!(target: "odata_core::client", status = raw.status, "request completed");
                Ok(Response::from(raw))
            }
            Err(err) => Err(self.error_handler.handle(err.into(), Some(DebugContext::from(&request)))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use serde_json::json;

    use super::*;
    use crate::error_handler::RequestFailure;
    use crate::http::HttpResponse;
    use crate::transport::TransportError;

    const GUID: &str = "0a1b2c3d-4e5f-6789-abcd-ef0123456789";

    /// Records every request and replays queued outcomes (200 OK by default).
    #[derive(Default)]
    struct RecordingTransport {
        sent: RefCell<Vec<HttpRequest>>,
        outcomes: RefCell<VecDeque<Result<HttpResponse, TransportError>>>,
    }

    impl RecordingTransport {
        fn failing_with(err: TransportError) -> Self {
            let transport = Self::default();
            transport.outcomes.borrow_mut().push_back(Err(err));
            transport
        }

        fn last(&self) -> HttpRequest {
            self.sent.borrow().last().cloned().expect("no request sent")
        }

        fn count(&self) -> usize {
            self.sent.borrow().len()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.sent.borrow_mut().push(request.clone());
            self.outcomes.borrow_mut().pop_front().unwrap_or_else(|| {
                Ok(HttpResponse {
                    status: 200,
                    reason: "OK".to_string(),
                    headers: Vec::new(),
                    body: r#"{"value":[]}"#.to_string(),
                })
            })
        }
    }

    fn client() -> OData<RecordingTransport> {
        OData::new(Config::new("https://host"), RecordingTransport::default())
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn compile_uri_for_collection() {
        let mut c = client();
        c.from("Catalog_X");
        assert_eq!(c.compile_uri().unwrap(), "https://host/odata/standard.odata/Catalog_X/");
    }

    #[test]
    fn compile_uri_with_count_marker() {
        let mut c = OData::new(Config::new("h"), RecordingTransport::default());
        c.from("R");
        c.parameters_mut().set_true_is_only_count();
        assert_eq!(c.compile_uri().unwrap(), "h/odata/standard.odata/R/$count");
    }

    #[test]
    fn guid_suppresses_count_marker() {
        let mut c = OData::new(Config::new("h"), RecordingTransport::default());
        c.from("R");
        c.parameters_mut().set_true_is_only_count().set_guid(GUID).unwrap();
        assert_eq!(c.compile_uri().unwrap(), format!("h/odata/standard.odata/R(guid'{GUID}')/"));
    }

    #[test]
    fn empty_host_is_invalid() {
        let mut c = OData::new(Config::new(""), RecordingTransport::default());
        c.from("R");
        assert!(matches!(c.compile_uri(), Err(ODataError::InvalidParameter(_))));

        let err = c.get().unwrap_err();
        assert!(matches!(err, ODataError::InvalidParameter(ref m) if m == "Host URI is empty."));
        assert_eq!(c.transport().count(), 0);
    }

    #[test]
    fn get_sends_current_query() {
        let mut c = client();
        c.from("Catalog_X")
            .filter("Code eq '001'")
            .select(["Ref_Key", "Code"])
            .top(5)
            .skip(0)
            .no_metadata();
        let response = c.get().unwrap();
        assert_eq!(response.code(), 200);
        assert!(!response.is_failed());

        let sent = c.transport().last();
        assert_eq!(sent.method, HttpMethod::Get);
        assert_eq!(sent.uri, "https://host/odata/standard.odata/Catalog_X/");
        assert_eq!(sent.query.len(), 4);
        assert_eq!(sent.query["$filter"], "Code eq '001'");
        assert_eq!(sent.query["$select"], "Ref_Key,Code");
        assert_eq!(sent.query["$top"], "5");
        assert_eq!(sent.query["$format"], "application/json;odata=nometadata");
        assert_eq!(sent.body, "{}");
    }

    #[test]
    fn get_one_resets_filter_and_data_only() {
        let mut c = client();
        c.from("Catalog_X").filter("Code eq '001'").select("Code");
        c.parameters_mut().set_data(object(json!({"a": 1})));

        c.get_one(GUID).unwrap();
        let sent = c.transport().last();
        assert_eq!(sent.uri, format!("https://host/odata/standard.odata/Catalog_X(guid'{GUID}')/"));
        assert!(!sent.query.contains_key("$filter"));
        assert_eq!(sent.query["$select"], "Code");
        assert_eq!(sent.body, "{}");
    }

    #[test]
    fn get_one_with_bad_guid_fails_before_transport() {
        let mut c = client();
        c.from("Catalog_X").filter("Code eq '001'");
        let err = c.get_one("not-a-guid").unwrap_err();
        assert!(matches!(err, ODataError::InvalidParameter(_)));
        assert_eq!(c.transport().count(), 0);
        // the reset already happened and is not rolled back
        assert_eq!(c.parameters().filter(), "");
    }

    #[test]
    fn get_only_count_targets_count_endpoint() {
        let mut c = client();
        c.from("Catalog_X").filter("Code eq '001'");
        c.get_only_count().unwrap();
        let sent = c.transport().last();
        assert_eq!(sent.uri, "https://host/odata/standard.odata/Catalog_X/$count");
        assert_eq!(sent.query["$filter"], "Code eq '001'");
        assert!(c.parameters().is_only_count());
    }

    #[test]
    fn create_posts_payload_and_keeps_resource() {
        let mut c = client();
        c.from("Catalog_X").filter("x").top(3);
        c.parameters_mut().set_guid(GUID).unwrap();

        c.create(object(json!({"Description": "New", "Nested": {"a": 1}}))).unwrap();
        let sent = c.transport().last();
        assert_eq!(sent.method, HttpMethod::Post);
        assert_eq!(sent.uri, "https://host/odata/standard.odata/Catalog_X/");
        assert!(sent.query.is_empty());
        let body: Value = serde_json::from_str(&sent.body).unwrap();
        assert_eq!(body, json!({"Description": "New"}));
    }

    #[test]
    fn create_clears_count_flag() {
        let mut c = client();
        c.from("R");
        c.get_only_count().unwrap();
        c.create(Map::new()).unwrap();
        assert_eq!(c.transport().last().uri, "https://host/odata/standard.odata/R/");
    }

    #[test]
    fn update_patches_entity() {
        let mut c = client();
        c.from("Catalog_X").select("Code");
        c.update(GUID, object(json!({"Code": "002"}))).unwrap();
        let sent = c.transport().last();
        assert_eq!(sent.method, HttpMethod::Patch);
        assert_eq!(sent.uri, format!("https://host/odata/standard.odata/Catalog_X(guid'{GUID}')/"));
        assert!(sent.query.is_empty());
        assert_eq!(sent.body, r#"{"Code":"002"}"#);
    }

    #[test]
    fn mark_deleted_uses_default_key() {
        let mut c = client();
        c.from("Catalog_X");
        c.mark_deleted(GUID, None).unwrap();
        let sent = c.transport().last();
        assert_eq!(sent.method, HttpMethod::Patch);
        assert_eq!(sent.body, r#"{"DeletionMark":true}"#);

        c.mark_deleted(GUID, Some("")).unwrap();
        assert_eq!(c.transport().last().body, r#"{"DeletionMark":true}"#);
    }

    #[test]
    fn mark_deleted_with_custom_key() {
        let mut c = client();
        c.from("Document_Y");
        c.mark_deleted(GUID, Some("Archived")).unwrap();
        assert_eq!(c.transport().last().body, r#"{"Archived":true}"#);
    }

    #[test]
    fn force_delete_sends_delete() {
        let mut c = client();
        c.from("Catalog_X").filter("x");
        c.force_delete(GUID).unwrap();
        let sent = c.transport().last();
        assert_eq!(sent.method, HttpMethod::Delete);
        assert_eq!(sent.uri, format!("https://host/odata/standard.odata/Catalog_X(guid'{GUID}')/"));
        assert!(sent.query.is_empty());
    }

    #[test]
    fn config_is_merged_into_request() {
        let mut c = client();
        c.from("R")
            .auth_as(Auth::Basic {
                username: "admin".to_string(),
                password: "secret".to_string(),
            })
            .set_header("X-Trace", "1")
            .clear_header("Accept")
            .set_additional_client_params(object(json!({"timeout": 5, "query": "dropped"})));
        c.get().unwrap();

        let sent = c.transport().last();
        assert_eq!(
            sent.auth,
            Some(Auth::Basic {
                username: "admin".to_string(),
                password: "secret".to_string()
            })
        );
        assert_eq!(sent.headers["X-Trace"], "1");
        assert!(!sent.headers.contains_key("Accept"));
        assert_eq!(sent.client["timeout"], 5);
        assert!(!sent.client.contains_key("query"));
    }

    #[test]
    fn status_errors_are_classified() {
        let transport = RecordingTransport::failing_with(TransportError::Status {
            status: 401,
            response: Some(HttpResponse {
                status: 401,
                reason: "Unauthorized".to_string(),
                headers: Vec::new(),
                body: String::new(),
            }),
        });
        let mut c = OData::new(Config::new("h"), transport);
        c.from("R");
        assert!(matches!(c.get().unwrap_err(), ODataError::Auth { .. }));
    }

    #[test]
    fn connect_errors_carry_compiled_request() {
        let transport = RecordingTransport::failing_with(TransportError::Connect {
            message: "refused".to_string(),
        });
        let mut c = OData::new(Config::new("h"), transport);
        c.from("R").top(2);
        match c.get().unwrap_err() {
            ODataError::Connection { message, debug } => {
                assert_eq!(message, "refused");
                assert_eq!(debug.uri, "h/odata/standard.odata/R/");
                assert_eq!(debug.query["$top"], "2");
                assert_eq!(debug.config.headers["Accept"], "application/json");
            }
            other => panic!("expected Connection, got {other:?}"),
        }
    }

    #[test]
    fn failed_request_keeps_mutated_state() {
        let transport = RecordingTransport::failing_with(TransportError::Other {
            message: "boom".to_string(),
            code: None,
        });
        let mut c = OData::new(Config::new("h"), transport);
        c.from("R").filter("x");
        let err = c.update(GUID, object(json!({"a": 1}))).unwrap_err();
        assert!(matches!(err, ODataError::Service { .. }));
        assert_eq!(c.parameters().filter(), "");
        assert_eq!(c.parameters().guid(), format!("(guid'{GUID}')"));
    }

    #[test]
    fn custom_error_handler_is_used() {
        struct AlwaysService;

        impl RequestErrorHandler for AlwaysService {
            fn handle(&self, _failure: RequestFailure, _debug: Option<DebugContext>) -> ODataError {
                ODataError::Service {
                    message: "custom".to_string(),
                    code: Some(1),
                }
            }
        }

        let transport = RecordingTransport::failing_with(TransportError::Status {
            status: 404,
            response: None,
        });
        let mut c = OData::new(Config::new("h"), transport);
        c.set_request_error_handler(AlwaysService).from("R");
        let err = c.get().unwrap_err();
        assert!(matches!(err, ODataError::Service { ref message, .. } if message == "custom"));
    }

    #[test]
    fn debug_reports_current_request() {
        let mut c = client();
        c.from("R").expand("Owner");
        let debug = c.debug().unwrap();
        assert_eq!(debug.uri, "https://host/odata/standard.odata/R/");
        assert_eq!(debug.query["$expand"], "Owner");
        assert_eq!(debug.body, "{}");
    }
}
