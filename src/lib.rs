//! Client-side data access layer for the ESG dashboard API.
//!
//! Requests go through a [`request::RequestManager`] that keeps one request in
//! flight per endpoint, retries transient failures and supports cancellation.
//! Reads are served from a [`cache::ResponseCache`] with stale-while-revalidate
//! semantics. [`pagination::Paginator`] and [`debounce::Debouncer`] cover the
//! presentation-side helpers.

pub mod api;
pub mod cache;
pub mod config;
pub mod debounce;
pub mod error;
pub mod pagination;
pub mod query;
pub mod request;
