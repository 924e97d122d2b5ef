//! HTTP route handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::error::LedgerError;
use crate::ledger::types::{Application, NewUser, Review, Task, TaskStatus, User};
use crate::ledger::{LedgerStats, LedgerStore};
use crate::lifecycle::TaskLifecycleEngine;
use crate::matching::{MatchingEngine, Recommendation};
use crate::moderation::{RiskAssessment, RiskClassifier};

use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<LedgerStore>,
    pub engine: Arc<TaskLifecycleEngine>,
    pub matcher: MatchingEngine,
    pub classifier: Arc<RiskClassifier>,
}

/// Start the HTTP server and the background expiry sweep.
pub async fn serve(
    config: Config,
    store: Arc<LedgerStore>,
    classifier: Arc<RiskClassifier>,
) -> anyhow::Result<()> {
    let engine = Arc::new(TaskLifecycleEngine::new(
        Arc::clone(&store),
        Arc::clone(&classifier),
        config.grace_days,
        config.stake_min,
        config.stake_max,
    ));

    // The sweep is an explicit scheduled job, never a side effect of reads.
    {
        let engine = Arc::clone(&engine);
        let mut interval =
            tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));
        tokio::spawn(async move {
            loop {
                interval.tick().await;
                match engine.expiry_sweep(Utc::now()) {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("expiry sweep settled {n} task(s)"),
                    Err(e) => tracing::error!("expiry sweep failed: {e}"),
                }
            }
        });
    }

    let matcher = MatchingEngine::new(config.match_weights, config.cross_campus_credit);
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState {
        config,
        store,
        engine,
        matcher,
        classifier,
    });

    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/stats", get(get_stats))
        .route("/api/users", post(create_user).get(list_users))
        .route("/api/users/:id", get(get_user))
        .route("/api/users/:id/skills", put(update_skills))
        .route("/api/users/:id/busy-dates", put(update_busy_dates))
        .route("/api/users/:id/reviews", get(user_reviews))
        .route("/api/users/:id/tasks", get(user_tasks))
        .route("/api/users/:id/applications", get(user_applications))
        .route("/api/tasks", post(publish_task).get(list_tasks))
        .route("/api/tasks/:id", get(get_task))
        .route("/api/tasks/:id/applications", get(task_applications))
        .route("/api/tasks/:id/apply", post(apply_for_task))
        .route("/api/tasks/:id/accept", post(accept_applicant))
        .route("/api/tasks/:id/notify", post(notify_completion))
        .route("/api/tasks/:id/confirm", post(confirm_completion))
        .route("/api/tasks/:id/cancel", post(cancel_task))
        .route("/api/tasks/:id/reviews", post(submit_review))
        .route("/api/recommendations/:user_id", get(recommendations))
        .route("/api/moderation/classify", post(classify))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on {bind_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Map a ledger error to an HTTP status, keeping the exact reason visible.
fn error_response(err: LedgerError) -> (StatusCode, String) {
    use LedgerError::*;
    let status = match &err {
        InsufficientFunds { .. } | InvalidStake { .. } | InvalidRating => StatusCode::BAD_REQUEST,
        RiskRejected { .. } | HeldForReview { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SelfApplication | NotAuthorized => StatusCode::FORBIDDEN,
        DuplicateApplication | DuplicateReview | TaskNotOpen | AlreadyAccepted | NotInProgress
        | NotCompleted | EmailTaken => StatusCode::CONFLICT,
        UserNotFound(_) | TaskNotFound(_) | ApplicationNotFound => StatusCode::NOT_FOUND,
        Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("storage error: {err}");
    }
    (status, err.to_string())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LedgerStats>, (StatusCode, String)> {
    state.store.stats().map(Json).map_err(error_response)
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewUser>,
) -> Result<Json<User>, (StatusCode, String)> {
    state
        .store
        .create_user(new, state.config.starting_points)
        .map(Json)
        .map_err(error_response)
}

async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<User>>, (StatusCode, String)> {
    state.store.list_users().map(Json).map_err(error_response)
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, (StatusCode, String)> {
    state.store.user(id).map(Json).map_err(error_response)
}

async fn update_skills(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<SkillsRequest>,
) -> Result<Json<User>, (StatusCode, String)> {
    state
        .store
        .update_skills(id, &req.skills)
        .map_err(error_response)?;
    state.store.user(id).map(Json).map_err(error_response)
}

async fn update_busy_dates(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<BusyDatesRequest>,
) -> Result<Json<User>, (StatusCode, String)> {
    state
        .store
        .update_busy_dates(id, &req.busy_dates)
        .map_err(error_response)?;
    state.store.user(id).map(Json).map_err(error_response)
}

async fn user_reviews(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Review>>, (StatusCode, String)> {
    state
        .store
        .reviews_for_user(id)
        .map(Json)
        .map_err(error_response)
}

async fn user_tasks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Task>>, (StatusCode, String)> {
    state
        .store
        .tasks_published_by(id)
        .map(Json)
        .map_err(error_response)
}

async fn user_applications(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Application>>, (StatusCode, String)> {
    state
        .store
        .applications_by_user(id)
        .map(Json)
        .map_err(error_response)
}

async fn publish_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PublishTaskRequest>,
) -> Result<Json<PublishTaskResponse>, (StatusCode, String)> {
    let (task, screening) = state
        .engine
        .publish(req.publisher_id, req.draft)
        .await
        .map_err(error_response)?;
    Ok(Json(PublishTaskResponse { task, screening }))
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<TaskFilter>,
) -> Result<Json<Vec<Task>>, (StatusCode, String)> {
    let status = match filter.status.as_deref() {
        Some(raw) => Some(TaskStatus::parse(raw).ok_or((
            StatusCode::BAD_REQUEST,
            format!("unknown task status: {raw}"),
        ))?),
        None => None,
    };
    state
        .store
        .list_tasks(status, filter.exclude_publisher)
        .map(Json)
        .map_err(error_response)
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, (StatusCode, String)> {
    state.store.task(id).map(Json).map_err(error_response)
}

async fn task_applications(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Application>>, (StatusCode, String)> {
    state
        .store
        .applications_for_task(id)
        .map(Json)
        .map_err(error_response)
}

async fn apply_for_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApplyRequest>,
) -> Result<Json<Application>, (StatusCode, String)> {
    state
        .engine
        .apply(id, req.applicant_id)
        .map(Json)
        .map_err(error_response)
}

async fn accept_applicant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AcceptRequest>,
) -> Result<Json<Task>, (StatusCode, String)> {
    state
        .engine
        .accept(id, req.applicant_id, req.actor_id)
        .map(Json)
        .map_err(error_response)
}

async fn notify_completion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<NotifyRequest>,
) -> Result<Json<Task>, (StatusCode, String)> {
    state
        .engine
        .notify_completion(id, req.helper_id)
        .map_err(error_response)?;
    state.store.task(id).map(Json).map_err(error_response)
}

async fn confirm_completion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<Task>, (StatusCode, String)> {
    state
        .engine
        .confirm_completion(id, req.actor_id)
        .map(Json)
        .map_err(error_response)
}

async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<Task>, (StatusCode, String)> {
    state
        .engine
        .cancel(id, req.actor_id)
        .map(Json)
        .map_err(error_response)
}

async fn submit_review(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<Review>, (StatusCode, String)> {
    state
        .engine
        .submit_review(id, req.reviewer_id, req.rating, req.comment)
        .map(Json)
        .map_err(error_response)
}

async fn recommendations(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Recommendation>>, (StatusCode, String)> {
    let user = state.store.user(user_id).map_err(error_response)?;
    let listings = state
        .store
        .open_task_listings(Some(user_id))
        .map_err(error_response)?;
    Ok(Json(state.matcher.rank(&user, &listings)))
}

async fn classify(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClassifyRequest>,
) -> Json<RiskAssessment> {
    Json(
        state
            .classifier
            .classify(&req.description, &req.category)
            .await,
    )
}
