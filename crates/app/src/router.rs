use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};

use herdbook_core::cascade::SaveOutcome;
use herdbook_core::types::{
    Animal, Barn, CullingRecord, FlockInspection, Insemination, MilkRecord, Movement, Pen,
    Pregnancy, QuarantineRecord,
};
use herdbook_storage::Database;

use crate::cascade::{CascadeDispatcher, Saved};
use crate::problem::ProblemResponse;
use crate::reconcile::Reconciler;
use crate::{state, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    dispatcher: CascadeDispatcher,
    reconciler: Reconciler,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, storage: Database) -> Self {
        let clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> = Arc::new(Utc::now);
        Self {
            metrics,
            dispatcher: CascadeDispatcher::new(storage.clone(), clock.clone()),
            reconciler: Reconciler::new(storage.clone(), clock.clone()),
            storage,
            clock,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.dispatcher = CascadeDispatcher::new(self.storage.clone(), clock.clone());
        self.reconciler = Reconciler::new(self.storage.clone(), clock.clone());
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn dispatcher(&self) -> &CascadeDispatcher {
        &self.dispatcher
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/animals/:id", put(put_animal))
        .route("/animals/:id/lactations", get(animal_lactations))
        .route("/inseminations/:id", put(put_insemination))
        .route("/pregnancies/:id", put(put_pregnancy))
        .route("/milk/:id", put(put_milk_record))
        .route("/cullings/:id", put(put_culling))
        .route("/quarantines/:id", put(put_quarantine))
        .route("/barns/:id", put(put_barn))
        .route("/barns/:id/history", get(barn_history))
        .route("/pens/:id", put(put_pen))
        .route("/pens/:id/history", get(pen_history))
        .route("/movements/:id", put(put_movement))
        .route("/flock-inspections/:id", put(put_flock_inspection))
        .route("/inventory", get(inventory))
        .route("/reconcile", post(reconcile))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap()
}

macro_rules! put_handler {
    ($name:ident, $ty:ty, $save:ident) => {
        async fn $name(
            State(state): State<AppState>,
            Path(id): Path<String>,
            Json(record): Json<$ty>,
        ) -> Result<Response, ProblemResponse> {
            ensure_path_id(&id, &record.id)?;
            let saved = state.dispatcher().$save(record).await?;
            Ok(saved_response(saved))
        }
    };
}

put_handler!(put_animal, Animal, save_animal);
put_handler!(put_insemination, Insemination, save_insemination);
put_handler!(put_pregnancy, Pregnancy, save_pregnancy);
put_handler!(put_milk_record, MilkRecord, save_milk_record);
put_handler!(put_culling, CullingRecord, save_culling);
put_handler!(put_quarantine, QuarantineRecord, save_quarantine);
put_handler!(put_barn, Barn, save_barn);
put_handler!(put_pen, Pen, save_pen);
put_handler!(put_movement, Movement, save_movement);
put_handler!(put_flock_inspection, FlockInspection, save_flock_inspection);

fn ensure_path_id(path_id: &str, body_id: &str) -> Result<(), ProblemResponse> {
    if path_id == body_id {
        return Ok(());
    }
    Err(ProblemResponse::new(
        StatusCode::BAD_REQUEST,
        "id_mismatch",
        format!("path id {path_id} does not match body id {body_id}"),
    ))
}

fn saved_response<T: Serialize>(saved: Saved<T>) -> Response {
    let status = match saved.outcome {
        SaveOutcome::Created => StatusCode::CREATED,
        SaveOutcome::Updated | SaveOutcome::Unchanged => StatusCode::OK,
    };
    (status, Json(saved)).into_response()
}

async fn inventory(State(state): State<AppState>) -> Result<Response, ProblemResponse> {
    let summary = state::build_inventory_summary(state.storage()).await?;
    Ok(Json(summary).into_response())
}

async fn animal_lactations(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ProblemResponse> {
    let today = state.now().date_naive();
    let views = state::lactations_for_animal(state.storage(), &id, today).await?;
    Ok(Json(views).into_response())
}

async fn pen_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ProblemResponse> {
    let history = state::pen_history(state.storage(), &id).await?;
    Ok(Json(history).into_response())
}

async fn barn_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ProblemResponse> {
    let history = state::barn_history(state.storage(), &id).await?;
    Ok(Json(history).into_response())
}

#[derive(Debug, Deserialize)]
struct ReconcileQuery {
    #[serde(default)]
    repair: bool,
}

async fn reconcile(
    State(state): State<AppState>,
    Query(query): Query<ReconcileQuery>,
) -> Result<Response, ProblemResponse> {
    let report = state.reconciler().run_once(query.repair).await?;
    Ok(Json(report).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::cascade::tests::fixed_clock;

    async fn setup_app() -> Router {
        let metrics = telemetry::init_metrics().expect("metrics init");

        let database = Database::connect("sqlite::memory:?cache=shared")
            .await
            .expect("connect");
        database.run_migrations().await.expect("migrations");

        app_router(AppState::new(metrics, database).with_clock(fixed_clock()))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .expect("handler should respond");

        let status = response.status();
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let bytes = collected.to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    fn cow_body(id: &str) -> Value {
        json!({
            "id": id,
            "species": "cattle",
            "name": "Daisy",
            "breed": "Friesian",
            "sex": "female",
            "birth_date": "2020-01-01",
            "status": "alive",
            "reproductive_status": "open"
        })
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = setup_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        let app = setup_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let body = String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8");
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }

    #[tokio::test]
    async fn put_reports_created_then_unchanged() {
        let app = setup_app().await;

        let (status, body) = send(&app, Method::PUT, "/animals/a-1", Some(cow_body("a-1"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["outcome"], "created");
        assert_eq!(body["record"]["head_count"], 1);

        let (status, body) = send(&app, Method::PUT, "/animals/a-1", Some(cow_body("a-1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "unchanged");

        let (status, body) = send(&app, Method::GET, "/inventory", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["herds"][0]["species"], "cattle");
        assert_eq!(body["herds"][0]["alive"], 1);
    }

    #[tokio::test]
    async fn mismatched_path_id_is_rejected() {
        let app = setup_app().await;
        let (status, body) = send(&app, Method::PUT, "/animals/a-2", Some(cow_body("a-1"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "id_mismatch");
    }

    #[tokio::test]
    async fn cascade_errors_map_to_problem_responses() {
        let app = setup_app().await;
        send(&app, Method::PUT, "/animals/a-1", Some(cow_body("a-1"))).await;

        let request = Request::builder()
            .method(Method::PUT)
            .uri("/milk/m-1")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "id": "m-1",
                    "animal_id": "a-1",
                    "amount_kg": 12.5,
                    "milked_on": "2024-03-01"
                })
                .to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(request).await.expect("respond");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );

        let (status, body) = send(
            &app,
            Method::PUT,
            "/movements/mv-1",
            Some(json!({
                "id": "mv-1",
                "animal_id": "a-9",
                "to_pen_id": "pen-1",
                "moved_at": "2024-03-01T07:00:00Z"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["type"], "unknown_reference");

        let (status, _) = send(&app, Method::GET, "/animals/a-9/lactations", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = send(&app, Method::GET, "/animals/a-1/lactations", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn movement_history_and_reconcile_endpoints() {
        let app = setup_app().await;
        send(&app, Method::PUT, "/animals/a-1", Some(cow_body("a-1"))).await;
        send(
            &app,
            Method::PUT,
            "/barns/barn-1",
            Some(json!({"id": "barn-1", "name": "North", "capacity": 10})),
        )
        .await;
        let (status, _) = send(
            &app,
            Method::PUT,
            "/pens/pen-1",
            Some(json!({
                "id": "pen-1",
                "barn_id": "barn-1",
                "category": "dairy",
                "pen_type": "freestall",
                "capacity": 1
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let placement = json!({
            "id": "mv-1",
            "animal_id": "a-1",
            "to_pen_id": "pen-1",
            "moved_at": "2024-03-01T07:00:00Z"
        });
        let (status, _) = send(&app, Method::PUT, "/movements/mv-1", Some(placement)).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&app, Method::GET, "/pens/pen-1/history", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["occupancy"], 1);
        assert_eq!(body[0]["movement_id"], "mv-1");

        let (status, body) = send(&app, Method::GET, "/barns/barn-1/history", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["occupancy"], 1);
        assert_eq!(body[0]["delta"], 1);
        let (status, _) = send(&app, Method::GET, "/barns/barn-9/history", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, Method::POST, "/reconcile?repair=true", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["repaired"], true);
        assert_eq!(body["drifts"], json!([]));
    }
}
