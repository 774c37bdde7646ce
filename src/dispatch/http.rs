//! HTTP-mode dispatch.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, request::Parts, Request};
use axum::response::{IntoResponse, Response};

use crate::callback::CallbackScheduler;
use crate::codec::{self, encode_http};
use crate::dispatch::{deliver, invoke, Admission, Lease};
use crate::error::DispatchError;
use crate::handler::{HttpRequest, HttpRoutes};
use crate::http::request::request_id;
use crate::observability::metrics;

/// Turns HTTP requests into handler invocations.
pub struct HttpDispatcher {
    api: Arc<str>,
    routes: HttpRoutes,
    admission: Admission,
    scheduler: CallbackScheduler,
    max_body_bytes: usize,
}

impl HttpDispatcher {
    pub(crate) fn new(
        api: Arc<str>,
        routes: HttpRoutes,
        admission: Admission,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            scheduler: CallbackScheduler::new(Arc::clone(&api)),
            api,
            routes,
            admission,
            max_body_bytes,
        }
    }

    pub async fn dispatch(&self, request: Request<Body>) -> Response {
        let started = Instant::now();
        let (parts, body) = request.into_parts();
        let operation = parts.method.as_str().to_string();

        let response = match self.run(parts, body).await {
            Ok(response) => response,
            Err((err, lease)) => {
                err.log(&self.api, &operation);
                deliver(err.into_response(), lease, None, &self.scheduler)
            }
        };

        metrics::record_request(&self.api, &operation, response.status().as_str(), started);
        response
    }

    async fn run(&self, parts: Parts, body: Body) -> Result<Response, (DispatchError, Option<Lease>)> {
        let method = self.routes.resolve(&parts.method).cloned().ok_or_else(|| {
            let err = DispatchError::MethodNotAllowed {
                operation: parts.method.to_string(),
                allowed: self.routes.allowed().to_vec(),
            };
            (err, None)
        })?;

        let lease = self.admission.admit().await.map_err(|e| (e, None))?;
        let fail = |err: DispatchError| (err, Some(lease.clone()));

        let bytes = axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|e| fail(DispatchError::Decode(format!("failed to read request body: {}", e))))?;
        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let payload = codec::decode(bytes, content_type.as_deref()).await.map_err(fail)?;

        let request_id = request_id(&parts.headers);
        tracing::debug!(
            api = %self.api,
            method = %parts.method,
            request_id = ?request_id,
            has_payload = payload.is_some(),
            "Dispatching request"
        );
        let request = HttpRequest {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            payload,
            request_id,
        };

        let reply = invoke(method(request), lease.clone()).await.map_err(fail)?;
        let (output, callback) = reply.into_parts();
        let response = encode_http(output).map_err(fail)?;

        Ok(deliver(response, Some(lease), callback, &self.scheduler))
    }
}

impl std::fmt::Debug for HttpDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDispatcher")
            .field("api", &self.api)
            .field("allowed", &self.routes.allowed())
            .field("admission", &self.admission)
            .finish()
    }
}
