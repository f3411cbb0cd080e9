//! Per-request context handed to route handlers and middleware.

use std::collections::HashMap;

use crate::Request;

/// Named path captures from the matched route, e.g. `id` for `/coin/:id`.
#[derive(Default, Debug, Clone)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A request together with the parameters the router captured for it.
#[derive(Debug)]
pub struct Context {
    request: Request,
    params: PathParams,
}

impl Context {
    /// Wraps a request that has not been routed yet.
    pub fn new(request: Request) -> Self {
        Self::with_params(request, PathParams::new())
    }

    pub fn with_params(request: Request, params: PathParams) -> Self {
        Self { request, params }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Shorthand for a decoded query parameter of the underlying request.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.request.query_param(key)
    }

    /// Consumes the context and returns the request, e.g. to re-route it.
    pub fn into_request(self) -> Request {
        self.request
    }
}
