//! HTTP handler contract: one method per accepted verb at a single route.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use axum::http::{HeaderMap, Method, Uri};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::codec::{Payload, Reply};
use crate::error::{HandlerError, StartupError};
use crate::handler::InitContext;

pub(crate) type HttpFuture = BoxFuture<'static, Result<Reply, HandlerError>>;
type MethodFn<H> = Arc<dyn Fn(Arc<H>, HttpRequest) -> HttpFuture + Send + Sync>;

/// A request handler served over HTTP.
///
/// `new` runs exactly once, on the blocking pool, before the listener is
/// bound. Methods are called concurrently on the shared instance, so any
/// mutable state needs its own synchronisation.
pub trait HttpHandler: Sized + Send + Sync + 'static {
    fn new(ctx: InitContext) -> Result<Self, HandlerError>;

    /// Register one method per verb the handler serves.
    fn methods(methods: &mut HttpMethods<Self>);
}

/// Per-request input for an HTTP method.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Decoded body; `None` when neither a content type nor a body was sent.
    pub payload: Option<Payload>,
    pub request_id: Option<String>,
}

impl HttpRequest {
    /// First value of a query parameter.
    pub fn query(&self, name: &str) -> Option<String> {
        self.query_pairs().into_iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// All query parameters in order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Method table an [`HttpHandler`] fills in at startup.
pub struct HttpMethods<H> {
    table: BTreeMap<String, MethodFn<H>>,
}

impl<H: Send + Sync + 'static> HttpMethods<H> {
    pub(crate) fn new() -> Self {
        Self {
            table: BTreeMap::new(),
        }
    }

    /// Register an async method for `verb`. A later registration for the same
    /// verb replaces the earlier one.
    pub fn route<F, Fut, R>(&mut self, verb: Method, f: F) -> &mut Self
    where
        F: Fn(Arc<H>, HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        R: Into<Reply>,
    {
        let method: MethodFn<H> = Arc::new(move |handler: Arc<H>, request: HttpRequest| {
            f(handler, request)
                .map(|result| result.map(Into::<Reply>::into))
                .boxed()
        });
        self.table.insert(verb.as_str().to_string(), method);
        self
    }

    /// Register a synchronous method for `verb`. It runs on the blocking
    /// pool, so it may do CPU-heavy or blocking work.
    pub fn blocking<F, R>(&mut self, verb: Method, f: F) -> &mut Self
    where
        F: Fn(&H, HttpRequest) -> Result<R, HandlerError> + Send + Sync + 'static,
        R: Into<Reply> + Send + 'static,
    {
        let f = Arc::new(f);
        self.route(verb, move |handler, request| {
            let f = Arc::clone(&f);
            async move {
                tokio::task::spawn_blocking(move || f(&handler, request))
                    .await
                    .map_err(|e| HandlerError::from_error("blocking handler method panicked", e))?
            }
        })
    }

    pub fn post<F, Fut, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Arc<H>, HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        R: Into<Reply>,
    {
        self.route(Method::POST, f)
    }

    pub fn get<F, Fut, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Arc<H>, HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        R: Into<Reply>,
    {
        self.route(Method::GET, f)
    }

    pub fn put<F, Fut, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Arc<H>, HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        R: Into<Reply>,
    {
        self.route(Method::PUT, f)
    }

    pub fn patch<F, Fut, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Arc<H>, HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        R: Into<Reply>,
    {
        self.route(Method::PATCH, f)
    }

    pub fn delete<F, Fut, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Arc<H>, HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        R: Into<Reply>,
    {
        self.route(Method::DELETE, f)
    }

    /// Check the table against the declared verbs. Every declared verb must
    /// be implemented.
    pub(crate) fn validate(&self, declared: &[String]) -> Result<(), StartupError> {
        let missing: Vec<&str> = declared
            .iter()
            .map(String::as_str)
            .filter(|verb| !self.table.contains_key(*verb))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(StartupError::Contract(format!(
                "handler does not implement declared verb(s): {}",
                missing.join(", ")
            )))
        }
    }

    /// Validate, then bind the table to the constructed `handler`.
    /// Implemented verbs that were not declared are not served.
    pub(crate) fn bind(self, handler: Arc<H>, declared: &[String]) -> Result<HttpRoutes, StartupError> {
        self.validate(declared)?;

        let mut routes = BTreeMap::new();
        for (verb, method) in self.table {
            if !declared.contains(&verb) {
                tracing::warn!(verb = %verb, "Handler implements an undeclared verb, not serving it");
                continue;
            }
            let handler = Arc::clone(&handler);
            let bound: BoundHttpMethod = Arc::new(move |request: HttpRequest| method(Arc::clone(&handler), request));
            routes.insert(verb, bound);
        }
        Ok(HttpRoutes {
            routes,
            allowed: declared.to_vec(),
        })
    }
}

pub(crate) type BoundHttpMethod = Arc<dyn Fn(HttpRequest) -> HttpFuture + Send + Sync>;

/// Verb → bound method, built once at startup.
#[derive(Clone)]
pub(crate) struct HttpRoutes {
    routes: BTreeMap<String, BoundHttpMethod>,
    allowed: Vec<String>,
}

impl HttpRoutes {
    pub(crate) fn resolve(&self, verb: &Method) -> Option<&BoundHttpMethod> {
        self.routes.get(verb.as_str())
    }

    pub(crate) fn allowed(&self) -> &[String] {
        &self.allowed
    }
}
