//! One-shot wrapper over a received response.
//!
//! # Design
//! The body is a single-consumption resource: the first of `bytes`, `text`
//! or `json` takes it, reads it to the end and drops the stream. Later calls
//! return `Error::BodyConsumed` instead of empty data. Status, headers, URL
//! and version are copied out up front so they stay readable afterwards.

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Url, Version};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

pub struct Response {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    url: Url,
    content_length: Option<u64>,
    body: Option<reqwest::Response>,
}

impl Response {
    pub(crate) fn new(inner: reqwest::Response) -> Self {
        Self {
            status: inner.status(),
            version: inner.version(),
            headers: inner.headers().clone(),
            url: inner.url().clone(),
            content_length: inner.content_length(),
            body: Some(inner),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Final URL after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// The underlying response, until the body has been consumed.
    pub fn raw(&self) -> Option<&reqwest::Response> {
        self.body.as_ref()
    }

    pub fn is_consumed(&self) -> bool {
        self.body.is_none()
    }

    /// Give up the wrapper and take the unread response, if any.
    pub fn into_inner(self) -> Option<reqwest::Response> {
        self.body
    }

    fn take_body(&mut self) -> Result<reqwest::Response> {
        self.body.take().ok_or(Error::BodyConsumed)
    }

    /// Read the whole body.
    pub async fn bytes(&mut self) -> Result<Bytes> {
        let body = self.take_body()?;
        body.bytes().await.map_err(|source| Error::ReadBody { source })
    }

    /// Read the whole body as UTF-8 text.
    pub async fn text(&mut self) -> Result<String> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|source| Error::Utf8 { source })
    }

    /// Read the whole body and decode it as JSON.
    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|source| Error::Decode { source })
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("consumed", &self.is_consumed())
            .finish()
    }
}
