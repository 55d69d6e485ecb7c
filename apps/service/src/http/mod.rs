//! Request capability shared by checks, pull feeds and push feeds.
//!
//! Everything that talks to a read endpoint goes through [`HttpCaller`], so
//! the probing logic can be exercised against a scripted caller in tests.

mod client;
pub mod testing;

pub use client::ReqwestCaller;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::environments::Credentials;
use crate::error::HttpError;

/// Header carrying the optional per-check API key.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// A GET request against a read endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub url: String,
    pub credentials: Option<Credentials>,
    pub headers: Vec<(String, String)>,
}

impl CallRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self { url: url.into(), credentials: None, headers: Vec::new() }
    }

    /// Attach basic-auth credentials, skipped when the username is empty.
    pub fn with_credentials(mut self, credentials: &Credentials) -> Self {
        if !credentials.is_empty() {
            self.credentials = Some(credentials.clone());
        }
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_api_key(self, api_key: Option<&str>) -> Self {
        match api_key {
            Some(key) if !key.is_empty() => self.with_header(API_KEY_HEADER, key),
            _ => self,
        }
    }
}

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl CallResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Line-oriented reader over a long-lived response body.
#[async_trait]
pub trait LineStream: Send {
    /// Next line without its terminator, `None` once the server closes the stream.
    async fn next_line(&mut self) -> Result<Option<String>, HttpError>;
}

/// An opened streaming response.
pub struct StreamResponse {
    pub status: u16,
    pub lines: Box<dyn LineStream>,
}

/// The "perform request, get status and body" capability.
#[async_trait]
pub trait HttpCaller: Send + Sync {
    async fn do_call(&self, request: &CallRequest) -> Result<CallResponse, HttpError>;

    /// Open a response whose body is consumed line by line.
    async fn open_stream(&self, request: &CallRequest) -> Result<StreamResponse, HttpError>;
}
