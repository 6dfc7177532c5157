//! Control Plane API Server
//!
//! Provides REST endpoints for the operator's in-process cluster:
//! - Targets: apply, list, get, delete
//! - Nodes: register, list, get, unregister
//! - Secrets: apply
//! - Jobs: list, status report from the execution facility
//! - Workload sets: list, status report
//! - Status: cluster health

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::{
    controller::ClusterController,
    job::JobStatus,
    node::Node,
    resources::{LabelSelector, OperationStatus, ResourceList, Secret},
    store::StoreError,
    target::Target,
    workload::WorkloadSetStatus,
    ClusterStats,
};

/// Requests served at once before callers queue
const MAX_CONCURRENT_REQUESTS: usize = 256;

/// Shared state for the control plane API
#[derive(Clone)]
pub struct ControlPlaneState {
    pub controller: Arc<ClusterController>,
}

impl ControlPlaneState {
    pub fn new() -> Self {
        Self {
            controller: Arc::new(ClusterController::new()),
        }
    }

    pub fn with_controller(controller: ClusterController) -> Self {
        Self {
            controller: Arc::new(controller),
        }
    }
}

impl Default for ControlPlaneState {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the control plane router
pub fn create_control_plane_router(state: ControlPlaneState) -> Router {
    Router::new()
        // Cluster status
        .route("/v1/status", get(cluster_status))
        // Targets
        .route("/v1/targets", get(list_all_targets).post(apply_target))
        .route(
            "/v1/namespaces/{namespace}/targets",
            get(list_targets_in_namespace),
        )
        .route(
            "/v1/namespaces/{namespace}/targets/{name}",
            get(get_target).delete(delete_target),
        )
        // Nodes
        .route("/v1/nodes", get(list_nodes).post(register_node))
        .route("/v1/nodes/{name}", get(get_node).delete(unregister_node))
        // Secrets
        .route("/v1/secrets", post(apply_secret))
        // Jobs
        .route("/v1/namespaces/{namespace}/jobs", get(list_jobs))
        .route(
            "/v1/namespaces/{namespace}/jobs/{name}/status",
            put(report_job_status),
        )
        // Workload sets
        .route(
            "/v1/namespaces/{namespace}/workloadsets",
            get(list_workload_sets),
        )
        .route(
            "/v1/namespaces/{namespace}/workloadsets/{name}/status",
            put(report_workload_set_status),
        )
        // Health check
        .route("/health", get(health_check))
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn store_error_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists { .. } => StatusCode::CONFLICT,
        StoreError::Invalid { .. } => StatusCode::BAD_REQUEST,
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn failure(e: StoreError) -> (StatusCode, Json<OperationStatus>) {
    (
        store_error_status(&e),
        Json(OperationStatus::failure(e.to_string())),
    )
}

// ============================================================================
// Health & Status
// ============================================================================

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

async fn cluster_status(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    let stats = state.controller.cluster_stats();
    Json(ClusterStatusResponse {
        status: "ok".to_string(),
        stats,
    })
}

#[derive(Serialize)]
struct ClusterStatusResponse {
    status: String,
    stats: ClusterStats,
}

// ============================================================================
// Target Endpoints
// ============================================================================

async fn apply_target(
    State(state): State<ControlPlaneState>,
    Json(target): Json<Target>,
) -> impl IntoResponse {
    let namespace = match target.metadata.namespace.as_str() {
        "" => "default",
        ns => ns,
    };
    let existed = state
        .controller
        .get_target(namespace, &target.metadata.name)
        .is_some();
    match state.controller.apply_target(target) {
        Ok(applied) => {
            let code = if existed {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            (code, Json(ApplyResponse::success(applied)))
        }
        Err(e) => (
            store_error_status(&e),
            Json(ApplyResponse::error(e.to_string())),
        ),
    }
}

#[derive(Serialize)]
struct ApplyResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<Target>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApplyResponse {
    fn success(target: Target) -> Self {
        Self {
            success: true,
            target: Some(target),
            error: None,
        }
    }

    fn error(msg: String) -> Self {
        Self {
            success: false,
            target: None,
            error: Some(msg),
        }
    }
}

async fn list_all_targets(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    let targets = state.controller.list_all_targets();
    Json(ResourceList::new("TargetList", targets))
}

async fn list_targets_in_namespace(
    State(state): State<ControlPlaneState>,
    Path(namespace): Path<String>,
) -> impl IntoResponse {
    let targets = state.controller.list_targets(&namespace);
    Json(ResourceList::new("TargetList", targets))
}

async fn get_target(
    State(state): State<ControlPlaneState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.controller.get_target(&namespace, &name) {
        Some(target) => (StatusCode::OK, Json(Some(target))).into_response(),
        None => (StatusCode::NOT_FOUND, Json::<Option<Target>>(None)).into_response(),
    }
}

async fn delete_target(
    State(state): State<ControlPlaneState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.controller.delete_target(&namespace, &name) {
        Ok(_) => (
            StatusCode::OK,
            Json(OperationStatus::success("Target deleted")),
        ),
        Err(e) => failure(e),
    }
}

// ============================================================================
// Node Endpoints
// ============================================================================

async fn list_nodes(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    let nodes = state.controller.list_all_nodes();
    Json(ResourceList::new("NodeList", nodes))
}

async fn register_node(
    State(state): State<ControlPlaneState>,
    Json(node): Json<Node>,
) -> impl IntoResponse {
    let known = state.controller.get_node(node.name()).is_some();
    match state.controller.apply_node(node) {
        Ok(node) => {
            let code = if known {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            (code, Json(Some(node))).into_response()
        }
        Err(e) => failure(e).into_response(),
    }
}

async fn get_node(
    State(state): State<ControlPlaneState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.controller.get_node(&name) {
        Some(node) => (StatusCode::OK, Json(Some(node))).into_response(),
        None => (StatusCode::NOT_FOUND, Json::<Option<Node>>(None)).into_response(),
    }
}

async fn unregister_node(
    State(state): State<ControlPlaneState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.controller.delete_node(&name) {
        Ok(_) => (
            StatusCode::OK,
            Json(OperationStatus::success("Node unregistered")),
        ),
        Err(e) => failure(e),
    }
}

// ============================================================================
// Secret Endpoints
// ============================================================================

async fn apply_secret(
    State(state): State<ControlPlaneState>,
    Json(secret): Json<Secret>,
) -> impl IntoResponse {
    let name = secret.metadata.name.clone();
    match state.controller.apply_secret(secret) {
        // Secret values are never echoed back
        Ok(()) => (
            StatusCode::OK,
            Json(OperationStatus::success(format!("Secret '{}' applied", name))),
        ),
        Err(e) => failure(e),
    }
}

// ============================================================================
// Job & Workload Set Endpoints
// ============================================================================

async fn list_jobs(
    State(state): State<ControlPlaneState>,
    Path(namespace): Path<String>,
) -> impl IntoResponse {
    let jobs = state
        .controller
        .list_jobs(&namespace, &LabelSelector::default());
    Json(ResourceList::new("JobList", jobs))
}

async fn report_job_status(
    State(state): State<ControlPlaneState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(status): Json<JobStatus>,
) -> impl IntoResponse {
    match state.controller.update_job_status(&namespace, &name, status) {
        Ok(job) => (StatusCode::OK, Json(Some(job))).into_response(),
        Err(e) => {
            warn!(job = %name, namespace = %namespace, error = %e, "Rejected job status report");
            failure(e).into_response()
        }
    }
}

async fn list_workload_sets(
    State(state): State<ControlPlaneState>,
    Path(namespace): Path<String>,
) -> impl IntoResponse {
    let sets = state
        .controller
        .list_workload_sets(&namespace, &LabelSelector::default());
    Json(ResourceList::new("WorkloadSetList", sets))
}

async fn report_workload_set_status(
    State(state): State<ControlPlaneState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(status): Json<WorkloadSetStatus>,
) -> impl IntoResponse {
    match state
        .controller
        .update_workload_set_status(&namespace, &name, status)
    {
        Ok(()) => (
            StatusCode::OK,
            Json(OperationStatus::success("Workload set status recorded")),
        ),
        Err(e) => failure(e),
    }
}
