//! Admin / autoscaler interface.
//!
//! # Endpoints
//! - `GET /admin/status`: version, api, protocol mode, served operations
//! - `GET /admin/in-flight`: `{ api → in-flight count }`, polled by the autoscaler
//!
//! Served on its own listener, behind a bearer token.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{middleware, routing::get, Router};
use uuid::Uuid;

use crate::handler::HandlerDescriptor;
use crate::inflight::RequestCounter;

use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    descriptor: Arc<HandlerDescriptor>,
    counter: Arc<dyn RequestCounter>,
    api_key: Arc<str>,
    instance_id: Uuid,
    started: Instant,
}

impl AdminState {
    pub fn new(descriptor: Arc<HandlerDescriptor>, counter: Arc<dyn RequestCounter>, api_key: &str) -> Self {
        Self {
            descriptor,
            counter,
            api_key: Arc::from(api_key),
            instance_id: Uuid::new_v4(),
            started: Instant::now(),
        }
    }

    pub fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    pub fn counter(&self) -> &Arc<dyn RequestCounter> {
        &self.counter
    }

    /// Random id generated when the admin interface starts.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn authorizes(&self, token: &str) -> bool {
        !self.api_key.is_empty() && *self.api_key == *token
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/in-flight", get(get_in_flight))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
