//! Client-wide configuration.
//!
//! # Design
//! `ClientBuilder` collects construction options and `build()` turns them
//! into an immutable `ClientConfig` plus a running dispatcher. Nothing on the
//! config changes after that point; every in-flight call reads the same
//! `Arc<ClientConfig>`.
//!
//! The transport handle is a single `reqwest::Client` combining the
//! connection settings in [`Transport`] with the cookie store, redirect
//! policy and timeout. A caller may hand over a prebuilt `reqwest::Client`
//! instead, in which case those three options have nowhere to go.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use tracing::{debug, warn};

use crate::client::Client;
use crate::error::{Error, Result};

pub const DEFAULT_MAX_QUEUE: usize = 64;
pub const DEFAULT_MAX_WORKER: usize = 8;

/// Connection-level settings for the underlying HTTP stack.
#[derive(Debug, Clone)]
pub struct Transport {
    pub connect_timeout: Duration,
    pub tcp_keepalive: Option<Duration>,
    pub pool_idle_timeout: Option<Duration>,
    pub pool_max_idle_per_host: usize,
    /// Honor `HTTP_PROXY` / `HTTPS_PROXY` / `NO_PROXY`.
    pub proxy_from_env: bool,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            tcp_keepalive: Some(Duration::from_secs(30)),
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 100,
            proxy_from_env: true,
        }
    }
}

impl Transport {
    fn builder(&self) -> reqwest::ClientBuilder {
        let builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .tcp_keepalive(self.tcp_keepalive)
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host);
        if self.proxy_from_env {
            builder
        } else {
            builder.no_proxy()
        }
    }
}

/// Immutable settings shared by every call from one client.
#[derive(Debug)]
pub struct ClientConfig {
    pub(crate) http: reqwest::Client,
    pub(crate) base_url: String,
    pub(crate) default_headers: HeaderMap,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cookie_store: Option<Arc<Jar>>,
    pub(crate) max_worker: usize,
    pub(crate) max_queue: usize,
}

impl ClientConfig {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cookie_store(&self) -> Option<&Arc<Jar>> {
        self.cookie_store.as_ref()
    }

    pub fn max_worker(&self) -> usize {
        self.max_worker
    }

    pub fn max_queue(&self) -> usize {
        self.max_queue
    }

    /// The transport handle calls are executed on.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }
}

pub struct ClientBuilder {
    max_queue: usize,
    max_worker: usize,
    transport: Transport,
    http_client: Option<reqwest::Client>,
    cookie_store: Option<Arc<Jar>>,
    redirect: Option<Policy>,
    timeout: Option<Duration>,
    base_url: String,
    default_headers: Vec<(String, String)>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            max_queue: DEFAULT_MAX_QUEUE,
            max_worker: DEFAULT_MAX_WORKER,
            transport: Transport::default(),
            http_client: None,
            cookie_store: None,
            redirect: None,
            timeout: None,
            base_url: String::new(),
            default_headers: Vec::new(),
        }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capacity of the pending-call queue. Clamped to at least 1.
    pub fn max_queue(mut self, n: usize) -> Self {
        self.max_queue = n;
        self
    }

    /// Number of calls allowed on the network at once. Clamped to at least 1.
    pub fn max_worker(mut self, n: usize) -> Self {
        self.max_worker = n;
        self
    }

    pub fn base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = base.into();
        self
    }

    /// Add a header sent on every call. Repeating a name keeps every value.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Use a fully configured transport. Overrides `transport`,
    /// `cookie_store`, `redirect` and `timeout`.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn cookie_store(mut self, jar: Arc<Jar>) -> Self {
        self.cookie_store = Some(jar);
        self
    }

    pub fn redirect(mut self, policy: Policy) -> Self {
        self.redirect = Some(policy);
        self
    }

    /// Time limit for a whole call, enforced by the transport.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validate the options, start the dispatcher and return the client.
    ///
    /// Must be called from within a Tokio runtime; the dispatcher's workers
    /// are spawned onto it.
    pub fn build(self) -> Result<Client> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let mut default_headers = HeaderMap::new();
        for (name, value) in &self.default_headers {
            let (name, value) = parse_header(name, value)?;
            default_headers.append(name, value);
        }

        let (http, timeout, cookie_store) = match self.http_client {
            Some(client) => {
                if self.cookie_store.is_some() || self.redirect.is_some() || self.timeout.is_some() {
                    warn!("cookie store, redirect policy and timeout are ignored when a prebuilt HTTP client is supplied");
                }
                (client, None, None)
            }
            None => {
                let mut builder = self.transport.builder();
                if let Some(jar) = &self.cookie_store {
                    builder = builder.cookie_provider(Arc::clone(jar));
                }
                if let Some(policy) = self.redirect {
                    builder = builder.redirect(policy);
                }
                if let Some(timeout) = self.timeout {
                    builder = builder.timeout(timeout);
                }
                let client = builder
                    .build()
                    .map_err(|source| Error::BuildTransport { source })?;
                (client, self.timeout, self.cookie_store)
            }
        };

        let config = ClientConfig {
            http,
            base_url: self.base_url,
            default_headers,
            timeout,
            cookie_store,
            max_worker: self.max_worker.max(1),
            max_queue: self.max_queue.max(1),
        };
        debug!(
            max_worker = config.max_worker,
            max_queue = config.max_queue,
            base_url = %config.base_url,
            "starting request client"
        );
        Ok(Client::start(config, &runtime))
    }
}

pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|source| Error::InvalidHeaderName {
        name: name.to_string(),
        source,
    })?;
    let header_value = HeaderValue::from_str(value).map_err(|source| Error::InvalidHeaderValue {
        name: name.to_string(),
        source,
    })?;
    Ok((header_name, header_value))
}
