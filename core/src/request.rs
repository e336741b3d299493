//! Per-call options and the merge that turns a call into a `reqwest::Request`.
//!
//! # Design
//! Three layers, applied in order and never mutated in place:
//! 1. the client's default headers,
//! 2. the call's header overlay, which replaces every default value for a
//!    name it sets,
//! 3. the optional request hook, which sees the finished request and may
//!    rewrite or reject it.
//!
//! Nothing here touches the network.

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Body, Method, Url};

use crate::config::{parse_header, ClientConfig};
use crate::error::{BoxError, Error, Result};
use crate::values::Values;

pub const CONTENT_TYPE_JSON: &str = "application/json; charset=UTF-8";
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

type RequestHook = Box<dyn FnOnce(reqwest::Request) -> std::result::Result<reqwest::Request, BoxError> + Send>;

/// Options for a single call.
#[derive(Default)]
pub struct RequestOptions {
    headers: Vec<(String, String)>,
    basic_auth: Option<(String, Option<String>)>,
    timeout: Option<Duration>,
    hook: Option<RequestHook>,
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("headers", &self.headers)
            .field("basic_auth", &self.basic_auth.as_ref().map(|(user, _)| user))
            .field("timeout", &self.timeout)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header for this call. Any client default with the same name is
    /// replaced; repeating a name here keeps every value.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: Option<impl Into<String>>) -> Self {
        self.basic_auth = Some((username.into(), password.map(Into::into)));
        self
    }

    /// Transport-level deadline for this call only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run `hook` on the fully built request before it is dispatched. An error
    /// aborts the call.
    pub fn hook<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(reqwest::Request) -> std::result::Result<reqwest::Request, BoxError> + Send + 'static,
    {
        self.hook = Some(Box::new(hook));
        self
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Set `Content-Type` unless the caller already chose one.
    pub(crate) fn content_type_or(mut self, content_type: &str) -> Self {
        if !self.has_header(CONTENT_TYPE.as_str()) {
            self.headers
                .insert(0, (CONTENT_TYPE.as_str().to_string(), content_type.to_string()));
        }
        self
    }
}

/// Join a base URL and a path with exactly one `/` between them. An empty
/// base leaves the path untouched; an empty path leaves the base without its
/// trailing slashes.
pub fn join_url(base: &str, path: &str) -> String {
    if base.is_empty() {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    format!("{base}/{}", path.trim_start_matches('/'))
}

/// Append encoded query parameters, using `&` if the URL already has a query.
pub fn append_query(url: &str, query: &Values) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{}", query.encode())
}

pub(crate) fn build_request(
    config: &ClientConfig,
    method: Method,
    path: &str,
    query: Option<&Values>,
    body: Option<Body>,
    options: RequestOptions,
) -> Result<reqwest::Request> {
    let mut target = join_url(&config.base_url, path);
    if let Some(query) = query {
        target = append_query(&target, query);
    }
    let url = Url::parse(&target).map_err(|source| Error::InvalidUrl { url: target, source })?;

    let mut request = reqwest::Request::new(method, url);
    *request.headers_mut() = merge_headers(&config.default_headers, &options)?;
    *request.body_mut() = body;
    *request.timeout_mut() = options.timeout;

    match options.hook {
        Some(hook) => hook(request).map_err(|source| Error::Hook { source }),
        None => Ok(request),
    }
}

fn merge_headers(defaults: &HeaderMap, options: &RequestOptions) -> Result<HeaderMap> {
    let mut overlay = HeaderMap::new();
    for (name, value) in &options.headers {
        let (name, value) = parse_header(name, value)?;
        overlay.append(name, value);
    }
    if let Some((username, password)) = &options.basic_auth {
        overlay.insert(AUTHORIZATION, basic_auth_value(username, password.as_deref()));
    }

    let mut merged = defaults.clone();
    for name in overlay.keys() {
        merged.remove(name);
    }
    for (name, value) in &overlay {
        merged.append(name.clone(), value.clone());
    }
    Ok(merged)
}

fn basic_auth_value(username: &str, password: Option<&str>) -> HeaderValue {
    let credentials = format!("{username}:{}", password.unwrap_or_default());
    let encoded = format!("Basic {}", STANDARD.encode(credentials));
    // Base64 output is always a valid header value.
    let mut value = HeaderValue::from_str(&encoded).unwrap_or_else(|_| HeaderValue::from_static("Basic"));
    value.set_sensitive(true);
    value
}
