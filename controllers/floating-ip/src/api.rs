//! # Admin API
//!
//! JSON facade over the allocator and the pool queries, plus probes:
//!
//! /v1/floating-ips/...            inventory and allocation by address
//! /v1/projects/{project_id}/...   project reservations
//! /v1/vms/{vm_id}/floating-ips    the address bound to a VM
//! /health
//! /metrics

use crate::allocator::Allocator;
use crate::error::{ControllerError, ErrorKind};
use crate::metrics::Metrics;
use crate::query::PoolQuery;
use crate::scheduler::{ReconcileHandle, SharedStatus};
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

#[derive(Clone)]
pub struct AppState {
    pub allocator: Arc<Allocator>,
    pub query: Arc<PoolQuery>,
    pub reconcile: ReconcileHandle,
    pub status: SharedStatus,
    pub metrics: Metrics,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/v1/floating-ips/sync", post(handlers::sync))
        .route("/v1/floating-ips/available", get(handlers::available))
        .route("/v1/floating-ips/summary", get(handlers::summary))
        .route("/v1/floating-ips/{address}", get(handlers::get_address))
        .route("/v1/floating-ips/{address}/assign", post(handlers::assign))
        .route("/v1/floating-ips/{address}/release", post(handlers::release))
        .route(
            "/v1/projects/{project_id}/floating-ips",
            get(handlers::project_addresses).post(handlers::assign_to_project),
        )
        .route("/v1/projects/{project_id}/floating-ips/reserve", post(handlers::reserve))
        .route("/v1/vms/{vm_id}/floating-ips", get(handlers::vm_address))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub vm_id: String,
    pub project_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub vm_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ProjectAssignRequest {
    pub ip_address: String,
}

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub count: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: ErrorKind,
    detail: String,
}

impl ErrorKind {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict
            | ErrorKind::AlreadyAllocated
            | ErrorKind::NotAllocated
            | ErrorKind::NotEnoughAvailable => StatusCode::CONFLICT,
            ErrorKind::CloudUnavailable => StatusCode::BAD_GATEWAY,
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            // request-time config errors are the operator's, not the caller's
            ErrorKind::InvalidConfig | ErrorKind::InconsistentState | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = kind.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            debug!("Request rejected: {}", self);
        }
        (status, Json(ErrorBody { kind, detail: self.to_string() })).into_response()
    }
}

type ApiResult<T> = Result<T, ControllerError>;

fn parse_address(raw: &str) -> ApiResult<IpAddr> {
    raw.parse()
        .map_err(|_| ControllerError::InvalidRequest(format!("'{}' is not an IP address", raw)))
}

mod handlers {
    use super::*;
    use crate::query::PoolSummary;
    use fip_inventory::FloatingIp;
    use serde_json::{Value, json};

    pub(super) async fn health(State(state): State<AppState>) -> Json<Value> {
        let status = state.status.read().clone();
        Json(json!({ "status": "ok", "reconcile": status }))
    }

    pub(super) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
        (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            state.metrics.render(),
        )
    }

    pub(super) async fn sync(State(state): State<AppState>) -> ApiResult<StatusCode> {
        if state.reconcile.trigger() {
            Ok(StatusCode::ACCEPTED)
        } else {
            Err(ControllerError::InconsistentState(
                "reconciliation scheduler is not running".to_string(),
            ))
        }
    }

    pub(super) async fn available(State(state): State<AppState>) -> ApiResult<Json<Vec<FloatingIp>>> {
        Ok(Json(state.query.list_available().await?))
    }

    pub(super) async fn summary(State(state): State<AppState>) -> ApiResult<Json<PoolSummary>> {
        Ok(Json(state.query.summary().await?))
    }

    pub(super) async fn get_address(
        State(state): State<AppState>,
        Path(address): Path<String>,
    ) -> ApiResult<Json<FloatingIp>> {
        let address = parse_address(&address)?;
        Ok(Json(state.query.get(address).await?))
    }

    pub(super) async fn assign(
        State(state): State<AppState>,
        Path(address): Path<String>,
        Json(req): Json<AssignRequest>,
    ) -> ApiResult<Json<FloatingIp>> {
        let address = parse_address(&address)?;
        let result = state
            .allocator
            .assign_or_replace(address, &req.vm_id, &req.project_id)
            .await;
        state.metrics.observe_op("assign_or_replace", &result);
        Ok(Json(result?))
    }

    pub(super) async fn release(
        State(state): State<AppState>,
        Path(address): Path<String>,
        Json(req): Json<ReleaseRequest>,
    ) -> ApiResult<Json<FloatingIp>> {
        let address = parse_address(&address)?;
        let result = state.allocator.release(address, &req.vm_id).await;
        state.metrics.observe_op("release", &result);
        Ok(Json(result?))
    }

    pub(super) async fn project_addresses(
        State(state): State<AppState>,
        Path(project_id): Path<String>,
    ) -> ApiResult<Json<Vec<FloatingIp>>> {
        Ok(Json(state.query.list_for_project(&project_id).await?))
    }

    pub(super) async fn assign_to_project(
        State(state): State<AppState>,
        Path(project_id): Path<String>,
        Json(req): Json<ProjectAssignRequest>,
    ) -> ApiResult<Json<FloatingIp>> {
        let address = parse_address(&req.ip_address)?;
        let result = state.allocator.assign_to_project(address, &project_id).await;
        state.metrics.observe_op("assign_to_project", &result);
        Ok(Json(result?))
    }

    pub(super) async fn reserve(
        State(state): State<AppState>,
        Path(project_id): Path<String>,
        Json(req): Json<ReserveRequest>,
    ) -> ApiResult<Json<Vec<FloatingIp>>> {
        let result = state.allocator.reserve_for_project(&project_id, req.count).await;
        state.metrics.observe_op("reserve_for_project", &result);
        Ok(Json(result?))
    }

    pub(super) async fn vm_address(
        State(state): State<AppState>,
        Path(vm_id): Path<String>,
    ) -> ApiResult<Json<Option<FloatingIp>>> {
        Ok(Json(state.query.list_for_vm(&vm_id).await?))
    }
}
