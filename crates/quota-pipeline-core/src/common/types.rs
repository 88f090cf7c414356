//! # Request and Response Types
//!
//! This module defines the records exchanged between callers, the pipeline,
//! and a [`QuotaStore`](crate::QuotaStore).
//!
//! ## Overview
//!
//! - [`Request`] - an immutable, typed request addressed to a bucket
//! - [`Method`] - the operation a request asks for
//! - [`Response`] - a success payload or a typed error payload
//! - [`BucketState`] / [`StatusResult`] - what a store returns
//!
//! Field names follow the wire naming used by callers (`type`,
//! `skipResponse`, `request_id`) so the types can be decoded from and encoded
//! to JSON without an intermediate layer.

use core::fmt;
use serde::{Deserialize, Serialize};

/// The operation a [`Request`] asks for.
///
/// Serialized as the uppercase literal (`"TAKE"`, `"PING"`, ...). Any literal
/// outside the known set decodes into [`Method::Other`], so an unrecognized
/// method is rejected by the pipeline rather than by the decoder.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Method {
    Ping,
    Take,
    Wait,
    Put,
    Get,
    Status,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ping => "PING",
            Self::Take => "TAKE",
            Self::Wait => "WAIT",
            Self::Put => "PUT",
            Self::Get => "GET",
            Self::Status => "STATUS",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for Method {
    fn from(value: &str) -> Self {
        match value {
            "PING" => Self::Ping,
            "TAKE" => Self::Take,
            "WAIT" => Self::Wait,
            "PUT" => Self::Put,
            "GET" => Self::Get,
            "STATUS" => Self::Status,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for Method {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<Method> for String {
    fn from(value: Method) -> Self {
        match value {
            Method::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const fn is_false(value: &bool) -> bool {
    !*value
}

/// A request addressed to the bucket identified by `bucket_type` and `key`.
///
/// `count` and `all` are method-specific and passed through to the store
/// untouched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: u64,
    pub method: Method,
    #[serde(rename = "type", default)]
    pub bucket_type: String,
    #[serde(default)]
    pub key: String,
    /// When set, successful results and recoverable errors produce no
    /// response. `STATUS` ignores it.
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_response: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub all: bool,
}

impl Request {
    pub fn new(
        id: u64,
        method: impl Into<Method>,
        bucket_type: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            id,
            method: method.into(),
            bucket_type: bucket_type.into(),
            key: key.into(),
            skip_response: false,
            count: None,
            all: false,
        }
    }

    /// Shorthand for a `PING` carrying only an id.
    pub fn ping(id: u64) -> Self {
        Self::new(id, Method::Ping, "", "")
    }

    #[must_use]
    pub const fn with_skip_response(mut self, skip: bool) -> Self {
        self.skip_response = skip;
        self
    }

    #[must_use]
    pub const fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    #[must_use]
    pub const fn with_all(mut self, all: bool) -> Self {
        self.all = all;
        self
    }
}

/// State of a single bucket as reported by `TAKE`, `WAIT`, `PUT` and `GET`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketState {
    /// Whether the requested consumption fit in the bucket. Only operations
    /// that consume tokens report it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conformant: Option<bool>,
    /// Whether a `WAIT` had to sleep before it could take.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delayed: Option<bool>,
    pub remaining: u64,
    /// Unix timestamp (seconds) at which the bucket is full again.
    pub reset: u64,
    pub limit: u64,
}

/// Selects the buckets a `STATUS` request reports on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusQuery {
    pub bucket_type: String,
    pub prefix: String,
}

impl From<&Request> for StatusQuery {
    fn from(request: &Request) -> Self {
        Self {
            bucket_type: request.bucket_type.clone(),
            prefix: request.key.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketStatus {
    pub instance: String,
    pub remaining: u64,
    pub reset: u64,
    pub limit: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResult {
    pub items: Vec<BucketStatus>,
}

/// Typed error kinds a caller can receive in place of a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    UnknownBucketType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
}

/// A response correlated with the request that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Pong { request_id: u64 },
    Error { error: ErrorPayload },
    Status(StatusResult),
    Bucket(BucketState),
}

impl Response {
    pub const fn pong(request_id: u64) -> Self {
        Self::Pong { request_id }
    }

    pub const fn error(kind: ErrorKind) -> Self {
        Self::Error {
            error: ErrorPayload { kind },
        }
    }
}

impl From<BucketState> for Response {
    fn from(state: BucketState) -> Self {
        Self::Bucket(state)
    }
}

impl From<StatusResult> for Response {
    fn from(result: StatusResult) -> Self {
        Self::Status(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wire_request() {
        let raw = r#"{"id":7,"method":"TAKE","type":"ip","key":"1.2.3.4","skipResponse":true,"count":3}"#;
        let request: Request = serde_json::from_str(raw).unwrap();

        assert_eq!(request.id, 7);
        assert_eq!(request.method, Method::Take);
        assert_eq!(request.bucket_type, "ip");
        assert_eq!(request.key, "1.2.3.4");
        assert!(request.skip_response);
        assert_eq!(request.count, Some(3));
        assert!(!request.all);
    }

    #[test]
    fn unknown_method_survives_decoding() {
        let raw = r#"{"id":1,"method":"FROB","type":"ip","key":"k"}"#;
        let request: Request = serde_json::from_str(raw).unwrap();

        assert_eq!(request.method, Method::Other("FROB".to_string()));
        assert_eq!(request.method.to_string(), "FROB");
    }

    #[test]
    fn ping_needs_only_an_id() {
        let request: Request = serde_json::from_str(r#"{"id":3,"method":"PING"}"#).unwrap();
        assert_eq!(request, Request::ping(3));
    }

    #[test]
    fn encodes_error_response() {
        let response = Response::error(ErrorKind::UnknownBucketType);
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"error":{"kind":"UNKNOWN_BUCKET_TYPE"}}"#
        );
    }

    #[test]
    fn encodes_bucket_response_without_absent_flags() {
        let response = Response::from(BucketState {
            conformant: Some(true),
            delayed: None,
            remaining: 5,
            reset: 1_700_000_000,
            limit: 10,
        });
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"conformant":true,"remaining":5,"reset":1700000000,"limit":10}"#
        );
    }

    #[test]
    fn status_query_uses_key_as_prefix() {
        let request = Request::new(1, Method::Status, "ip", "10.0.");
        let query = StatusQuery::from(&request);
        assert_eq!(query.bucket_type, "ip");
        assert_eq!(query.prefix, "10.0.");
    }
}
