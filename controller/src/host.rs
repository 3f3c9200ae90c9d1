use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use chrono_tz::Tz;
use serde::Serialize;
use tokio::{
    net::TcpListener,
    sync::{watch, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{info, warn};

use regulator_common::DiffMapper;

use crate::{
    adapters::{
        ecowitt::{EcowittCredentials, DEFAULT_BASE_URL},
        EcowittAdapter, EtaAdapter,
    },
    cycle::{ControlCycle, CycleReport, CycleStatus},
    resilient::ResilientCache,
    store::AppStore,
};

const DEFAULT_CONFIG_PATH: &str = "./.regulator/f_etacfg.json";
const DEFAULT_CYCLE_SECS: u64 = 10;
const DEFAULT_CACHE_TTL_MS: u64 = 3000;
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Berlin;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub config_path: PathBuf,
    pub cycle_interval: Duration,
    pub cache_ttl: Duration,
    pub timezone: Tz,
    pub http_port: u16,
    pub ecowitt_base_url: String,
    pub ecowitt: EcowittCredentials,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str| lookup(key).and_then(|value| value.trim().parse::<u64>().ok());

        let timezone = match lookup("REGULATOR_TIMEZONE") {
            Some(name) => name.parse::<Tz>().unwrap_or_else(|_| {
                warn!("unknown timezone '{name}', using {DEFAULT_TIMEZONE}");
                DEFAULT_TIMEZONE
            }),
            None => DEFAULT_TIMEZONE,
        };

        Self {
            config_path: lookup("REGULATOR_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            cycle_interval: Duration::from_secs(
                number("REGULATOR_CYCLE_SECS")
                    .filter(|secs| *secs > 0)
                    .unwrap_or(DEFAULT_CYCLE_SECS),
            ),
            cache_ttl: Duration::from_millis(
                number("REGULATOR_CACHE_TTL_MS").unwrap_or(DEFAULT_CACHE_TTL_MS),
            ),
            timezone,
            http_port: lookup("REGULATOR_HTTP_PORT")
                .and_then(|value| value.trim().parse::<u16>().ok())
                .unwrap_or(DEFAULT_HTTP_PORT),
            ecowitt_base_url: lookup("ECOWITT_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            ecowitt: EcowittCredentials {
                application_key: lookup("ECOWITT_APPLICATION_KEY").unwrap_or_default(),
                api_key: lookup("ECOWITT_API_KEY").unwrap_or_default(),
                mac: lookup("ECOWITT_MAC").unwrap_or_default(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
struct CycleStats {
    cycles: u64,
    #[serde(rename = "actionsTaken")]
    actions_taken: u64,
    #[serde(rename = "noActions")]
    no_actions: u64,
    failures: u64,
    #[serde(rename = "lastRunEpochMs")]
    last_run_epoch_ms: Option<i64>,
    #[serde(rename = "lastReport")]
    last_report: Option<CycleReport>,
}

impl CycleStats {
    fn record(&mut self, report: CycleReport, at_ms: i64) {
        self.cycles += 1;
        match report.status {
            CycleStatus::ActionTaken => self.actions_taken += 1,
            CycleStatus::NoAction => self.no_actions += 1,
            CycleStatus::Failed => self.failures += 1,
        }
        self.last_run_epoch_ms = Some(at_ms);
        self.last_report = Some(report);
    }
}

#[derive(Debug, Serialize)]
struct StatusView {
    #[serde(flatten)]
    stats: CycleStats,
    #[serde(rename = "refreshInFlight")]
    refresh_in_flight: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Clone)]
struct AppState {
    cycle: Arc<ControlCycle>,
    stats: Arc<Mutex<CycleStats>>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = Settings::from_env();
    if settings.ecowitt.application_key.is_empty() || settings.ecowitt.api_key.is_empty() {
        warn!("weather service credentials not set, relying on weather snapshots");
    }

    let store = AppStore::new(settings.config_path.clone(), settings.timezone);
    let actuator = Arc::new(EtaAdapter::new()?);
    let weather = Arc::new(EcowittAdapter::new(
        settings.ecowitt_base_url.clone(),
        settings.ecowitt.clone(),
    )?);
    let cycle = Arc::new(ControlCycle::new(
        store,
        actuator,
        weather,
        ResilientCache::new("actuator", settings.cache_ttl),
        ResilientCache::new("weather", settings.cache_ttl),
        DiffMapper::default(),
    ));

    let app_state = AppState {
        cycle: Arc::clone(&cycle),
        stats: Arc::new(Mutex::new(CycleStats::default())),
    };
    let (stop_tx, stop_rx) = watch::channel(false);
    let cycle_loop = spawn_cycle_loop(app_state.clone(), settings.cycle_interval, stop_rx);

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/refresh", post(handle_post_refresh))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status server at {addr}"))?;

    info!(
        config = %settings.config_path.display(),
        interval_secs = settings.cycle_interval.as_secs(),
        "regulator listening on http://{addr}"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down, waiting for the running cycle");
    // The loop only exits after a cycle has completed.
    let _ = stop_tx.send(true);
    if let Err(err) = cycle_loop.await {
        warn!("cycle loop ended abnormally: {err}");
    }
    cycle.shutdown().await;
    Ok(())
}

fn spawn_cycle_loop(
    app_state: AppState,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = stop.changed() => break,
            }

            let report = app_state.cycle.run().await;
            info!(
                status = ?report.status,
                reason = ?report.reason,
                "cycle finished"
            );
            app_state
                .stats
                .lock()
                .await
                .record(report, Utc::now().timestamp_millis());
        }
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.stats.lock().await.clone();
    Json(StatusView {
        stats,
        refresh_in_flight: state.cycle.refresh_in_flight().await,
    })
}

async fn handle_post_refresh(State(state): State<AppState>) -> axum::response::Response {
    match state.cycle.refresh().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            warn!("manual refresh failed: {err}");
            error_response(StatusCode::BAD_GATEWAY, &err.to_string())
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
