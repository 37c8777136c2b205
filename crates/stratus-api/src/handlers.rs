//! Route handler functions for all API endpoints.
//!
//! Each handler extracts query/path parameters via axum extractors, calls
//! into the repository, and returns JSON. Identity validation lives in the
//! repository; handlers only translate its errors into HTTP responses.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use stratus_core::types::{
    Customer, Entity, GroupFilter, GroupView, Instance, InstanceFilter,
};
use stratus_ingest::DiscoveryEvent;

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Query parameter and response types
// =============================================================================

/// Common query parameters for entity reads. `customer_id` is required by
/// the repository; absence surfaces as a 400.
#[derive(Debug, Default, Deserialize)]
pub struct EntityParams {
    pub customer_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub group_id: Option<String>,
}

impl EntityParams {
    fn instance_filter(&self) -> InstanceFilter {
        InstanceFilter {
            customer_id: self.customer_id.clone().unwrap_or_default(),
            kind: self.kind.clone(),
            group_id: self.group_id.clone(),
        }
    }

    fn group_filter(&self) -> GroupFilter {
        GroupFilter {
            customer_id: self.customer_id.clone().unwrap_or_default(),
            kind: self.kind.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /instances
pub async fn list_instances(
    State(state): State<AppState>,
    Query(params): Query<EntityParams>,
) -> Result<Json<Vec<Instance>>, ApiError> {
    let instances = state.repository.list_instances(&params.instance_filter())?;
    Ok(Json(instances))
}

/// GET /instances/count
pub async fn count_instances(
    State(state): State<AppState>,
    Query(params): Query<EntityParams>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.repository.count_instances(&params.instance_filter())?;
    Ok(Json(CountResponse { count }))
}

/// GET /instances/{id}
pub async fn get_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Query(params): Query<EntityParams>,
) -> Result<Json<Instance>, ApiError> {
    let customer_id = params.customer_id.unwrap_or_default();
    let instance = state
        .repository
        .get_instance(&customer_id, &instance_id)?
        .ok_or_else(|| ApiError::NotFound(format!("no instance {}", instance_id)))?;
    Ok(Json(instance))
}

/// GET /groups
pub async fn list_groups(
    State(state): State<AppState>,
    Query(params): Query<EntityParams>,
) -> Result<Json<Vec<GroupView>>, ApiError> {
    let groups = state.repository.list_groups(&params.group_filter())?;
    Ok(Json(groups))
}

/// GET /groups/count
pub async fn count_groups(
    State(state): State<AppState>,
    Query(params): Query<EntityParams>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.repository.count_groups(&params.group_filter())?;
    Ok(Json(CountResponse { count }))
}

/// GET /groups/{name}
pub async fn get_group(
    State(state): State<AppState>,
    Path(group_name): Path<String>,
    Query(params): Query<EntityParams>,
) -> Result<Json<GroupView>, ApiError> {
    let customer_id = params.customer_id.unwrap_or_default();
    let view = state
        .repository
        .get_group(&customer_id, &group_name, params.kind.as_deref())?
        .ok_or_else(|| ApiError::NotFound(format!("no group {}", group_name)))?;
    Ok(Json(view))
}

/// GET /customers/{id}
pub async fn get_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
) -> Result<Json<Customer>, ApiError> {
    let customer = state
        .repository
        .get_customer(&customer_id)?
        .ok_or_else(|| ApiError::NotFound(format!("no customer {}", customer_id)))?;
    Ok(Json(customer))
}

/// POST /events
///
/// Accepts one discovery envelope and writes the normalized entity through
/// the ingest pipeline. Returns the persisted entity.
pub async fn ingest_event(
    State(state): State<AppState>,
    Json(event): Json<DiscoveryEvent>,
) -> Result<(StatusCode, Json<Entity>), ApiError> {
    let entity = state.consumer.handle(&event)?;
    Ok((StatusCode::ACCEPTED, Json(entity)))
}
