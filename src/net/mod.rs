//! Network side of the worker: the request/response model, canonical request
//! identity, and the fetch capability.

mod client;
mod types;

pub use client::{FetchError, Fetcher, HttpFetcher};
pub use types::{Request, RequestKey, RequestMode, Response, ResponseType};
