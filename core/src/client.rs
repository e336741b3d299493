//! Public request API.
//!
//! # Design
//! `Client` is a cheap-to-clone handle over an immutable `ClientConfig` and
//! the dispatcher it started. Every convenience method is an arrangement of
//! method, body and content type that funnels into [`Client::send`], which
//! merges configuration, submits the call under the caller's `Context` and
//! wraps the result.
//!
//! There is no process-wide instance; build one at the application's entry
//! point and pass it around.

use std::sync::Arc;

use reqwest::{Body, Method};
use serde::Serialize;
use tokio::runtime::Handle;

use crate::config::{ClientBuilder, ClientConfig};
use crate::context::Context;
use crate::dispatch::{DispatchStats, Dispatcher};
use crate::error::{Error, Result};
use crate::request::{build_request, RequestOptions, CONTENT_TYPE_FORM, CONTENT_TYPE_JSON};
use crate::response::Response;
use crate::values::Values;

#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: ClientConfig,
    dispatcher: Dispatcher,
}

impl Client {
    /// Client with default settings. Must be called within a Tokio runtime.
    pub fn new() -> Result<Self> {
        ClientBuilder::default().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub(crate) fn start(config: ClientConfig, runtime: &Handle) -> Self {
        let dispatcher = Dispatcher::start(config.http.clone(), config.max_worker, config.max_queue, runtime);
        Self {
            inner: Arc::new(Inner { config, dispatcher }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> DispatchStats {
        self.inner.dispatcher.stats()
    }

    pub async fn get(
        &self,
        ctx: &Context,
        path: &str,
        query: Option<&Values>,
        options: RequestOptions,
    ) -> Result<Response> {
        self.call(ctx, Method::GET, path, query, None, options).await
    }

    pub async fn head(
        &self,
        ctx: &Context,
        path: &str,
        query: Option<&Values>,
        options: RequestOptions,
    ) -> Result<Response> {
        self.call(ctx, Method::HEAD, path, query, None, options).await
    }

    pub async fn delete(
        &self,
        ctx: &Context,
        path: &str,
        query: Option<&Values>,
        options: RequestOptions,
    ) -> Result<Response> {
        self.call(ctx, Method::DELETE, path, query, None, options).await
    }

    pub async fn patch(
        &self,
        ctx: &Context,
        path: &str,
        query: Option<&Values>,
        options: RequestOptions,
    ) -> Result<Response> {
        self.call(ctx, Method::PATCH, path, query, None, options).await
    }

    pub async fn post(
        &self,
        ctx: &Context,
        path: &str,
        body: impl Into<Body>,
        options: RequestOptions,
    ) -> Result<Response> {
        self.send(ctx, path, Method::POST, Some(body.into()), options).await
    }

    pub async fn put(
        &self,
        ctx: &Context,
        path: &str,
        body: impl Into<Body>,
        options: RequestOptions,
    ) -> Result<Response> {
        self.send(ctx, path, Method::PUT, Some(body.into()), options).await
    }

    /// POST `value` as JSON. Content type defaults to
    /// `application/json; charset=UTF-8`.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        ctx: &Context,
        path: &str,
        value: &T,
        options: RequestOptions,
    ) -> Result<Response> {
        let body = json_body(value)?;
        self.send(ctx, path, Method::POST, Some(body), options.content_type_or(CONTENT_TYPE_JSON))
            .await
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        ctx: &Context,
        path: &str,
        value: &T,
        options: RequestOptions,
    ) -> Result<Response> {
        let body = json_body(value)?;
        self.send(ctx, path, Method::PUT, Some(body), options.content_type_or(CONTENT_TYPE_JSON))
            .await
    }

    /// POST `form` as `application/x-www-form-urlencoded`.
    pub async fn post_form(&self, ctx: &Context, path: &str, form: &Values, options: RequestOptions) -> Result<Response> {
        let body = Body::from(form.encode());
        self.send(ctx, path, Method::POST, Some(body), options.content_type_or(CONTENT_TYPE_FORM))
            .await
    }

    pub async fn put_form(&self, ctx: &Context, path: &str, form: &Values, options: RequestOptions) -> Result<Response> {
        let body = Body::from(form.encode());
        self.send(ctx, path, Method::PUT, Some(body), options.content_type_or(CONTENT_TYPE_FORM))
            .await
    }

    /// Build, dispatch and await one call. Every other method ends up here.
    pub async fn send(
        &self,
        ctx: &Context,
        path: &str,
        method: Method,
        body: Option<Body>,
        options: RequestOptions,
    ) -> Result<Response> {
        self.call(ctx, method, path, None, body, options).await
    }

    async fn call(
        &self,
        ctx: &Context,
        method: Method,
        path: &str,
        query: Option<&Values>,
        body: Option<Body>,
        options: RequestOptions,
    ) -> Result<Response> {
        let request = build_request(&self.inner.config, method, path, query, body, options)?;
        let response = self.inner.dispatcher.submit(ctx, request).await?;
        Ok(Response::new(response))
    }
}

fn json_body<T: Serialize + ?Sized>(value: &T) -> Result<Body> {
    serde_json::to_vec(value)
        .map(Body::from)
        .map_err(|source| Error::Serialize { source })
}
