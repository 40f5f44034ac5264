/**
 * GISMIRROR KERNEL - Point d'entrée du miroir supervision -> SIG
 *
 * RÔLE : Orchestration des modules : config, token, client SIG, store,
 * réconciliation, balayage des orphelins, HTTP.
 *
 * ARCHITECTURE : enveloppes push entrantes -> réconciliation par entrée ->
 * FeatureServer ArcGIS + store documentaire.
 */

use anyhow::Context;
use gismirror_kernel::config::load_config;
use gismirror_kernel::featureservice::{ArcGisFeatureClient, FeatureService, RetryPolicy};
use gismirror_kernel::health::HealthTracker;
use gismirror_kernel::http::{self, AppState};
use gismirror_kernel::reconcile::{ReconcileSettings, Reconciler};
use gismirror_kernel::store::{DocumentStore, JsonFileStore, MemoryStore};
use gismirror_kernel::sweep::spawn_sweeper;
use gismirror_kernel::token::{ArcGisTokenProvider, StaticToken, TokenCredentials, TokenProvider};

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gismirror_kernel=info")),
        )
        .init();

    let cfg = load_config().await;
    cfg.validate().context("invalid configuration")?;

    // token : statique si fourni, sinon échange username/password
    let tokens: Arc<dyn TokenProvider> = match &cfg.arcgis.token {
        Some(token) => Arc::new(StaticToken::new(token.clone())),
        None => Arc::new(ArcGisTokenProvider::new(
            TokenCredentials {
                token_url: cfg.arcgis.token_url.clone(),
                username: cfg.arcgis.username.clone(),
                password: cfg.arcgis.password.clone(),
                referer: cfg.arcgis.referer.clone(),
                expiration_minutes: cfg.arcgis.token_expiration_minutes,
            },
            cfg.arcgis.request_timeout(),
        )?),
    };

    let features: Arc<dyn FeatureService> = Arc::new(ArcGisFeatureClient::new(
        &cfg.arcgis.service_url,
        tokens,
        cfg.arcgis.request_timeout(),
        RetryPolicy { max_retries: cfg.arcgis.max_retries, backoff: cfg.arcgis.retry_backoff() },
    )?);

    let store: Arc<dyn DocumentStore> = match &cfg.store.data_dir {
        Some(dir) => Arc::new(JsonFileStore::open(dir).await.context("cannot open store")?),
        None => {
            info!("no store.data_dir, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let health_tracker = HealthTracker::new();
    let reconciler = Arc::new(Reconciler::new(
        store,
        features,
        ReconcileSettings::from(&cfg),
        health_tracker,
    ));

    spawn_sweeper(reconciler.clone(), cfg.sweep.interval_secs);

    let app = http::build_router(AppState {
        reconciler,
        subscriptions: cfg.subscriptions.clone(),
    });

    let addr: SocketAddr = cfg.http.bind.parse().context("invalid http.bind")?;
    info!("listening on http://{addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
