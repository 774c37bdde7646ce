use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde::Serialize;
use uuid::Uuid;

use crate::admin::AdminState;
use crate::config::ProtocolMode;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub instance_id: Uuid,
    pub api: String,
    pub mode: ProtocolMode,
    pub operations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub uptime_secs: u64,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let descriptor = state.descriptor();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "serving",
        instance_id: state.instance_id(),
        api: descriptor.api.clone(),
        mode: descriptor.mode,
        operations: descriptor.operations.clone(),
        service: descriptor.service.clone(),
        uptime_secs: state.uptime().as_secs(),
    })
}

/// The autoscaler's view: in-flight requests per logical API.
pub async fn get_in_flight(State(state): State<AdminState>) -> Json<BTreeMap<String, u64>> {
    Json(state.counter().snapshot())
}
