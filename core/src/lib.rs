//! Client-side query builder and request orchestration for OData services
//! published under `/odata/standard.odata`.
//!
//! # Overview
//! `OData` accumulates query intent (resource, GUID key, `$filter`,
//! `$select`, `$expand`, paging, ordering, inline count, metadata level,
//! count-only) in a `QueryState`, compiles it into a URI, query parameters
//! and a JSON body, and executes the result through a `Transport`.
//!
//! # Design
//! - `QueryState` is a plain mutable builder with explicit resets to its
//!   declared defaults; terminal actions reset the fields they must not
//!   inherit from earlier calls.
//! - The network lives behind the `Transport` trait. `UreqTransport` (the
//!   default `ureq` feature) is a blocking implementation; tests plug in an
//!   in-memory one.
//! - Transport failures are turned into `ODataError` in exactly one place,
//!   the `RequestErrorHandler`.
//! - Successful answers become a `Response` whose body is decoded on demand.
//!
//! ```no_run
//! use odata_core::{Auth, Config, OData};
//!
//! # fn main() -> Result<(), odata_core::ODataError> {
//! let mut client = OData::blocking(Config::new("https://erp.example.com/base"));
//! client.auth_as(Auth::Basic {
//!     username: "admin".to_string(),
//!     password: "secret".to_string(),
//! });
//! let response = client
//!     .from("Catalog_Products")
//!     .filter("DeletionMark eq false")
//!     .select(["Ref_Key", "Description"])
//!     .top(10)
//!     .get()?;
//! let rows = response.body_key("value")?;
//! # let _ = rows;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod error_handler;
pub mod http;
pub mod query;
pub mod response;
pub mod transport;

pub use client::OData;
pub use config::{Auth, Config, ConfigParameters};
pub use error::ODataError;
pub use error_handler::{DebugContext, ODataRequestErrorHandler, RequestErrorHandler, RequestFailure};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use query::{FieldList, InlineCount, MetadataLevel, QueryAndBody, QueryField, QueryState};
pub use response::Response;
pub use transport::{Transport, TransportError};

#[cfg(feature = "ureq")]
pub use transport::UreqTransport;
