use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::errors::AppResult;
use crate::models::{ServiceDefinition, VehicleType};
use crate::services::catalog::ServiceFilter;
use crate::state::AppState;

// GET /api/services
#[derive(Deserialize)]
pub struct ServicesQuery {
    pub category: Option<String>,
    pub vehicle_type: Option<VehicleType>,
}

pub async fn list_services(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ServicesQuery>,
) -> AppResult<Json<Vec<ServiceDefinition>>> {
    let filter = ServiceFilter {
        category: query.category,
        vehicle_type: query.vehicle_type,
    };
    Ok(Json(state.scheduler.list_active_services(&filter).await?))
}
