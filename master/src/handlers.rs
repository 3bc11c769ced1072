use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use common::{
    Ack, FileServerInfo, HeartbeatRequest, HeartbeatResponse, JobConfig, JobId, JobInfo,
    MapperTask, MrError, ReducerFailedOnMapperRequest, ReducerTask, SubmitJobResponse,
    WorkerMetrics,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::tracker::JobTracker;

pub type AppState = Arc<JobTracker>;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/jobs", post(submit_job).get(describe_jobs))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/file-server", get(file_server_info))
        .route("/api/v1/workers", get(list_workers))
        .route("/api/v1/workers/heartbeat", post(worker_heartbeat))
        .route("/api/v1/tasks/mapper/succeed", post(mapper_succeed))
        .route("/api/v1/tasks/mapper/failed", post(mapper_failed))
        .route("/api/v1/tasks/reducer/succeed", post(reducer_succeed))
        .route("/api/v1/tasks/reducer/failed", post(reducer_failed))
        .route(
            "/api/v1/tasks/reducer/failed-on-mapper",
            post(reducer_failed_on_mapper),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Admite el job y responde enseguida; el arranque sigue en segundo plano
async fn submit_job(
    State(tracker): State<AppState>,
    Json(config): Json<JobConfig>,
) -> Result<Json<SubmitJobResponse>, (StatusCode, String)> {
    match tracker.submit_job(config) {
        Ok(job_id) => Ok(Json(SubmitJobResponse { job_id })),
        Err(e @ MrError::InvalidConfig(_)) => Err((StatusCode::BAD_REQUEST, e.to_string())),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn describe_jobs(State(tracker): State<AppState>) -> String {
    tracker.describe_jobs()
}

async fn get_job(
    State(tracker): State<AppState>,
    Path(id): Path<JobId>,
) -> Result<Json<JobInfo>, StatusCode> {
    tracker.job_info(id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn file_server_info(State(tracker): State<AppState>) -> Json<FileServerInfo> {
    Json(tracker.file_server_info())
}

async fn list_workers(State(tracker): State<AppState>) -> Json<Vec<WorkerMetrics>> {
    Json(tracker.workers())
}

async fn worker_heartbeat(
    State(tracker): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Json<HeartbeatResponse> {
    tracker.heartbeat(&req);
    Json(HeartbeatResponse { ok: true })
}

/* ---------------- reportes de tareas ----------------
 * Se confirma la recepción enseguida y la transición (más los envíos a
 * reducers que genere) corre aparte, para no dejar al worker esperando
 * una cadena de RPCs.
 */

async fn mapper_succeed(State(tracker): State<AppState>, Json(task): Json<MapperTask>) -> Json<Ack> {
    info!(
        "mapper {} del job {} reporta SUCCEED desde {}",
        task.header.task_id, task.header.job_id, task.header.worker
    );
    tokio::spawn(async move { tracker.mapper_task_succeed(task).await });
    Json(Ack { ok: true })
}

async fn mapper_failed(State(tracker): State<AppState>, Json(task): Json<MapperTask>) -> Json<Ack> {
    tokio::spawn(async move { tracker.mapper_task_failed(&task) });
    Json(Ack { ok: true })
}

async fn reducer_succeed(
    State(tracker): State<AppState>,
    Json(task): Json<ReducerTask>,
) -> Json<Ack> {
    tokio::spawn(async move { tracker.reducer_task_succeed(&task) });
    Json(Ack { ok: true })
}

async fn reducer_failed(
    State(tracker): State<AppState>,
    Json(task): Json<ReducerTask>,
) -> Json<Ack> {
    tokio::spawn(async move { tracker.reducer_task_failed(task).await });
    Json(Ack { ok: true })
}

async fn reducer_failed_on_mapper(
    State(tracker): State<AppState>,
    Json(req): Json<ReducerFailedOnMapperRequest>,
) -> Json<Ack> {
    tokio::spawn(async move {
        tracker.reducer_task_failed_on_mapper(&req.reducer, &req.mapper);
    });
    Json(Ack { ok: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use tower::ServiceExt;

    use crate::testing::{job_config, tracker_with, FakeRpc};

    fn app() -> (AppState, Router) {
        let rpc = Arc::new(FakeRpc::default());
        let tracker = tracker_with(&rpc, 1);
        (Arc::clone(&tracker), build_router(tracker))
    }

    fn post_json(uri: &str, body: &impl serde::Serialize) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_string(resp: axum::response::Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_says_ok() {
        let (_, app) = app();
        let resp = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "ok");
    }

    #[tokio::test]
    async fn invalid_job_is_rejected_with_400() {
        let (tracker, app) = app();
        let mut config = job_config(1, 1, 3);
        config.output_path = config.input_path.clone();

        let resp = app.oneshot(post_json("/api/v1/jobs", &config)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(tracker.describe_jobs(), "--- no hay jobs ---");
    }

    #[tokio::test]
    async fn submitted_job_shows_up_in_listing() {
        let (tracker, app) = app();
        let resp = app
            .clone()
            .oneshot(post_json("/api/v1/jobs", &job_config(1, 1, 3)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let submitted: SubmitJobResponse =
            serde_json::from_str(&body_string(resp).await).unwrap();
        assert!(tracker.job_info(submitted.job_id).is_some());

        let resp = app.clone().oneshot(get("/api/v1/jobs")).await.unwrap();
        let text = body_string(resp).await;
        assert!(text.starts_with(&format!("Job {} [", submitted.job_id)));

        let resp = app
            .oneshot(get(&format!("/api/v1/jobs/{}", submitted.job_id)))
            .await
            .unwrap();
        let info: JobInfo = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(info.config.program, "wordcount");
    }

    #[tokio::test]
    async fn unknown_job_is_404() {
        let (_, app) = app();
        let resp = app.oneshot(get("/api/v1/jobs/42")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn heartbeat_registers_worker() {
        let (_, app) = app();
        let req = crate::registry::heartbeat_req("w1", 2, 1);
        let resp = app
            .clone()
            .oneshot(post_json("/api/v1/workers/heartbeat", &req))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app.oneshot(get("/api/v1/workers")).await.unwrap();
        let workers: Vec<WorkerMetrics> =
            serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].name, "w1");
        assert_eq!(workers[0].mapper_load, 2);
        assert!(workers[0].valid);
    }

    #[tokio::test]
    async fn file_server_info_comes_from_config() {
        let (tracker, app) = app();
        let resp = app.oneshot(get("/api/v1/file-server")).await.unwrap();
        let info: FileServerInfo = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(info, tracker.file_server_info());
    }
}
