use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use common::{Ack, JobId, MapperTask, RunReducerRequest, TaskId};
use tracing::debug;

use crate::mapper::partition_path;
use crate::worker::SharedState;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/mapper/run", post(run_mapper))
        .route("/api/v1/reducer/run", post(run_reducer))
        .route(
            "/api/v1/partitions/:job/:task/:attempt/:partition",
            get(get_partition),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

// El master sólo espera la aceptación; el resultado llega por los reportes
async fn run_mapper(State(state): State<SharedState>, Json(task): Json<MapperTask>) -> Json<Ack> {
    debug!(
        "recibí mapper {} del job {} (attempt={})",
        task.header.task_id, task.header.job_id, task.header.attempt
    );
    tokio::spawn(Arc::clone(&state).run_mapper(task));
    Json(Ack { ok: true })
}

async fn run_reducer(
    State(state): State<SharedState>,
    Json(req): Json<RunReducerRequest>,
) -> Json<Ack> {
    debug!(
        "recibí salida del mapper {} del job {} para {} reducers",
        req.mapper.header.task_id,
        req.mapper.header.job_id,
        req.reducers.len()
    );
    tokio::spawn(Arc::clone(&state).run_reducer_batch(req.mapper, req.reducers));
    Json(Ack { ok: true })
}

// Sirve un archivo de partición a un reducer de otro (o del mismo) worker
async fn get_partition(
    State(state): State<SharedState>,
    Path((job, task, attempt, partition)): Path<(JobId, TaskId, u32, u32)>,
) -> Result<String, StatusCode> {
    let path = partition_path(&state.config.tmp_dir, job, task, attempt, partition);
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)
}
