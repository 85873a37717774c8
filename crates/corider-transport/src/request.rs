//! REST request and response values

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

use crate::error::CallError;

/// HTTP methods used by the dispatch API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read
    Get,
    /// Create or act
    Post,
    /// Update in place
    Put,
    /// Remove or cancel
    Delete,
}

impl Method {
    /// Wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Safe to resend after a timeout
    pub const fn is_idempotent_read(self) -> bool {
        matches!(self, Self::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One REST call relative to the API base URL
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Path below the base URL, starting with `/`
    pub path: String,
    /// JSON body, if any
    pub body: Option<serde_json::Value>,
    /// Bearer token attached by the authorizer
    pub bearer: Option<String>,
}

impl ApiRequest {
    /// Request without body or bearer
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            bearer: None,
        }
    }

    /// `GET path`
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// `POST path`
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// `PUT path`
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    /// `DELETE path`
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Attach a JSON body
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, CallError> {
        let value = serde_json::to_value(body).map_err(|e| CallError::decode(e.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Attach an already encoded JSON body
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a bearer token
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

impl fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Successful (2xx) response
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Decoded JSON body; `Null` for empty bodies
    pub body: serde_json::Value,
}

impl ApiResponse {
    /// Response with a decoded body
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self { status, body }
    }

    /// Response without a body, e.g. 204
    pub fn empty(status: u16) -> Self {
        Self::new(status, serde_json::Value::Null)
    }

    /// Decode the body into `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, CallError> {
        T::deserialize(&self.body).map_err(|e| CallError::decode(e.to_string()))
    }
}
