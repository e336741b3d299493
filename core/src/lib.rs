//! Concurrency-bounded HTTP request client.
//!
//! # Overview
//! Layers three things over `reqwest`: immutable client-wide configuration
//! merged with per-call options, cancellation of a single round trip through
//! a caller-supplied [`Context`], and a fixed-size worker pool that caps how
//! many calls are on the network at once.
//!
//! # Design
//! - `Client` holds an immutable `ClientConfig` and a dispatcher behind one
//!   `Arc`; clones share both.
//! - Calls flow: `request` merges config and options into a
//!   `reqwest::Request` -> `dispatch` queues it in a pooled `job` slot -> a
//!   worker runs `invoke`, which races the call against the context ->
//!   `response` wraps the result for single-use body consumption.
//! - Every failure is returned to the caller, classified by [`ErrorKind`];
//!   nothing is retried.

pub mod client;
pub mod config;
pub mod context;
mod dispatch;
pub mod error;
mod invoke;
mod job;
pub mod request;
pub mod response;
pub mod values;

pub use client::Client;
pub use config::{ClientBuilder, ClientConfig, Transport};
pub use context::{CancelHandle, Cancellation, Context};
pub use dispatch::DispatchStats;
pub use error::{BoxError, Error, ErrorKind, Result};
pub use request::{append_query, join_url, RequestOptions, CONTENT_TYPE_FORM, CONTENT_TYPE_JSON};
pub use response::Response;
pub use values::Values;

pub use reqwest::{cookie::Jar, redirect::Policy, Body, Method, StatusCode};
