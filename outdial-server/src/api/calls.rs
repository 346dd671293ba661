use crate::error::AppError;
use crate::model::{Call, CallEvent};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;

pub async fn get_call(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Json<Call>, AppError> {
    Ok(Json(state.call_store.get(&sid)?))
}

/// Timeline reconstruction from the append-only event log.
pub async fn get_call_events(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Json<Vec<CallEvent>>, AppError> {
    state.call_store.get(&sid)?;
    Ok(Json(state.call_store.events_for(&sid)))
}
