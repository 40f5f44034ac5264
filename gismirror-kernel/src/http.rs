/**
 * API HTTP - Point d'entrée push et routes d'inspection
 *
 * RÔLE :
 * Reçoit les enveloppes push du flux de supervision et expose l'état du
 * miroir (hosts, events, santé) pour l'exploitation.
 *
 * FONCTIONNEMENT :
 * - POST /         : enveloppe push -> lot -> réconciliation entrée par entrée
 *                    204 une fois le lot traité, 500 "Error" si l'enveloppe
 *                    est indéchiffrable
 * - GET /health, /system/health : liveness et compteurs
 * - GET /hosts, /hosts/{key}, /hosts/{key}/events : lecture du store
 * - POST /sweep    : balayage des features orphelines à la demande
 */

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::SubscriptionsConf;
use crate::envelope::PushEnvelope;
use crate::health::KernelHealth;
use crate::models::{EventRecord, HostKey, HostRecord};
use crate::reconcile::{Outcome, Reconciler};
use crate::sweep::{sweep_orphans, SweepReport};

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub subscriptions: SubscriptionsConf,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", post(push))
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/hosts", get(get_hosts))
        .route("/hosts/{key}", get(get_host))
        .route("/hosts/{key}/events", get(get_host_events))
        .route("/sweep", post(run_sweep))
        .with_state(app_state)
}

// POST / (enveloppe push)
async fn push(State(app): State<AppState>, body: Bytes) -> Response {
    let batch = match PushEnvelope::from_slice(&body).and_then(|env| env.into_batch(&app.subscriptions)) {
        Ok(batch) => batch,
        Err(e) => {
            error!("undecodable push envelope: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Error").into_response();
        }
    };

    let report = app.reconciler.process_batch(batch).await;
    info!(
        batch = %report.batch_id,
        "batch done: {} applied, {} unchanged, {} rejected, {} failed",
        report.count(|o| matches!(o, Outcome::Created | Outcome::Updated | Outcome::Closed)),
        report.count(|o| *o == Outcome::Unchanged),
        report.count(|o| matches!(o, Outcome::Rejected(_))),
        report.count(|o| matches!(o, Outcome::Failed(_))),
    );
    StatusCode::NO_CONTENT.into_response()
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.reconciler.health().get_health())
}

// GET /hosts (liste)
async fn get_hosts(State(app): State<AppState>) -> Result<Json<Vec<HostRecord>>, StatusCode> {
    app.reconciler.store().list_hosts().await.map(Json).map_err(internal)
}

// GET /hosts/{key} (détail, clé "{site}_{host}")
async fn get_host(
    State(app): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<HostRecord>, StatusCode> {
    let key = HostKey::from_raw(&key);
    let record = app.reconciler.store().get_host(&key).await.map_err(internal)?;
    record.map(Json).ok_or(StatusCode::NOT_FOUND)
}

// GET /hosts/{key}/events
async fn get_host_events(
    State(app): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Vec<EventRecord>>, StatusCode> {
    let key = HostKey::from_raw(&key);
    let store = app.reconciler.store();
    if store.get_host(&key).await.map_err(internal)?.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    store.events_for_host(&key).await.map(Json).map_err(internal)
}

// POST /sweep
async fn run_sweep(State(app): State<AppState>) -> Result<Json<SweepReport>, StatusCode> {
    sweep_orphans(&app.reconciler).await.map(Json).map_err(internal)
}

fn internal<E: std::fmt::Display>(e: E) -> StatusCode {
    error!("request failed: {e}");
    StatusCode::INTERNAL_SERVER_ERROR
}
