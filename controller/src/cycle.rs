use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use regulator_common::{
    format_position, round1, types::parse_reading, ActuatorReading, ActuatorSnapshot,
    ControlDecision, DecodeError, DiffMapper, NameIdMap, RegulatorConfig, ResolveError,
    SnapshotPaths, WeatherReading, NAME_SLIDER_POSITION,
};

use crate::{
    adapters::{ActuatorAdapter, FetchError, WeatherAdapter},
    resilient::{CacheError, CacheSource, ResilientCache, Upstream},
    store::AppStore,
};

pub const ACTUATOR_KEY: &str = "actuator";
pub const WEATHER_KEY: &str = "weather";

// Flag and index arguments of a plain value write.
const WRITE_FLAGS: &str = "0";
const WRITE_INDEX: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStage {
    Init,
    Fetch,
    Compute,
    Write,
    Verify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStatus {
    ActionTaken,
    NoAction,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoActionReason {
    WeatherMissing,
    NonNumericError,
    PositionUnchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "result")]
pub enum Verification {
    Confirmed,
    Mismatch { read: f64 },
    Unreadable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub status: CycleStatus,
    pub reason: Option<NoActionReason>,
    pub decision: Option<ControlDecision>,
    pub verification: Option<Verification>,
    #[serde(rename = "failedStage")]
    pub failed_stage: Option<CycleStage>,
    pub error: Option<String>,
}

impl CycleReport {
    fn no_action(reason: NoActionReason, decision: Option<ControlDecision>) -> Self {
        Self {
            status: CycleStatus::NoAction,
            reason: Some(reason),
            decision,
            verification: None,
            failed_stage: None,
            error: None,
        }
    }

    fn action(decision: ControlDecision, verification: Verification) -> Self {
        Self {
            status: CycleStatus::ActionTaken,
            reason: None,
            decision: Some(decision),
            verification: Some(verification),
            failed_stage: None,
            error: None,
        }
    }

    fn failed(stage: CycleStage, err: &CycleError) -> Self {
        Self {
            status: CycleStatus::Failed,
            reason: None,
            decision: None,
            verification: None,
            failed_stage: Some(stage),
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("name map unavailable: {0:#}")]
    NameMap(anyhow::Error),
    #[error(transparent)]
    Mapping(#[from] ResolveError),
    #[error(transparent)]
    Fetch(#[from] CacheError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("failed to persist snapshots: {0:#}")]
    Persist(anyhow::Error),
    #[error("slider write failed: {0}")]
    Write(FetchError),
}

struct CycleContext {
    config: RegulatorConfig,
    names: Arc<NameIdMap>,
    paths: SnapshotPaths,
}

pub struct ControlCycle {
    store: AppStore,
    actuator: Arc<dyn ActuatorAdapter>,
    weather: Arc<dyn WeatherAdapter>,
    actuator_cache: ResilientCache<ActuatorSnapshot>,
    weather_cache: ResilientCache<Value>,
    mapper: DiffMapper,
}

impl ControlCycle {
    pub fn new(
        store: AppStore,
        actuator: Arc<dyn ActuatorAdapter>,
        weather: Arc<dyn WeatherAdapter>,
        actuator_cache: ResilientCache<ActuatorSnapshot>,
        weather_cache: ResilientCache<Value>,
        mapper: DiffMapper,
    ) -> Self {
        Self {
            store,
            actuator,
            weather,
            actuator_cache,
            weather_cache,
            mapper,
        }
    }

    pub async fn run(&self) -> CycleReport {
        let mut stage = CycleStage::Init;
        match self.execute(&mut stage).await {
            Ok(report) => report,
            Err(err) => {
                error!(stage = ?stage, "cycle failed: {err}");
                CycleReport::failed(stage, &err)
            }
        }
    }

    pub async fn refresh(&self) -> Result<(), CycleError> {
        let ctx = self.init().await?;
        let actuator_source = self.actuator_source(&ctx);
        let weather_source = self.weather_source(&ctx);
        tokio::try_join!(
            self.actuator_cache.fetch_now(ACTUATOR_KEY, &actuator_source),
            self.weather_cache.fetch_now(WEATHER_KEY, &weather_source),
        )?;
        info!("caches refreshed on request");
        Ok(())
    }

    pub async fn refresh_in_flight(&self) -> bool {
        self.actuator_cache.refresh_in_flight().await || self.weather_cache.refresh_in_flight().await
    }

    pub async fn shutdown(&self) {
        tokio::join!(self.actuator_cache.settle(), self.weather_cache.settle());
    }

    async fn execute(&self, stage: &mut CycleStage) -> Result<CycleReport, CycleError> {
        let ctx = self.init().await?;

        *stage = CycleStage::Fetch;
        let actuator_source = self.actuator_source(&ctx);
        let weather_source = self.weather_source(&ctx);
        let (snapshot, payload) = tokio::try_join!(
            self.actuator_cache.get(ACTUATOR_KEY, &actuator_source),
            self.weather_cache.get(WEATHER_KEY, &weather_source),
        )?;

        *stage = CycleStage::Compute;
        let Some(weather) = WeatherReading::decode(&payload)? else {
            info!("no station data in weather payload, nothing to do");
            return Ok(CycleReport::no_action(NoActionReason::WeatherMissing, None));
        };
        let reading = ActuatorReading::from_snapshot(&ctx.names, &snapshot)?;
        let slider_id = ctx.names.id_of(NAME_SLIDER_POSITION)?.to_string();

        let Some(temperature_error) = self.temperature_error(&ctx.config, &weather) else {
            warn!(
                target_temp = %ctx.config.target_temp,
                delta_temp = %ctx.config.delta_temp,
                indoor = ?weather.indoor_temp,
                "temperature error is not numeric, nothing to do"
            );
            return Ok(CycleReport::no_action(NoActionReason::NonNumericError, None));
        };
        let decision = self.mapper.decide(temperature_error, &reading);

        info!(
            controller_outdoor = ?reading.controller_outdoor_temp,
            station_outdoor = ?weather.outdoor_temp,
            indoor = ?weather.indoor_temp,
            target_temp = %ctx.config.target_temp,
            delta_temp = %ctx.config.delta_temp,
            current = ?reading.current_position,
            desired = decision.desired_position,
            error = decision.temperature_error,
            "cycle computed"
        );

        // A refresh started by this cycle's hit must not overwrite the persisted slider.
        self.actuator_cache.supersede().await;
        self.persist(&ctx, &snapshot, &slider_id, &payload, &decision)
            .await
            .map_err(CycleError::Persist)?;

        if !decision.should_write {
            info!(
                position = decision.desired_position,
                "slider unchanged, write skipped"
            );
            return Ok(CycleReport::no_action(
                NoActionReason::PositionUnchanged,
                Some(decision),
            ));
        }

        *stage = CycleStage::Write;
        let value = self.mapper.device_value(decision.desired_position);
        self.actuator
            .write_variable(&ctx.config, &slider_id, &value, WRITE_FLAGS, WRITE_INDEX)
            .await
            .map_err(CycleError::Write)?;
        info!(
            position = decision.desired_position,
            device_value = %value,
            "slider written"
        );

        *stage = CycleStage::Verify;
        let verification = self
            .verify(&ctx, &slider_id, decision.desired_position)
            .await;

        let applied = match verification {
            Verification::Mismatch { read } => read,
            _ => decision.desired_position,
        };
        let mut updated = snapshot;
        updated.set(slider_id, format_position(applied));
        self.actuator_cache.set(ACTUATOR_KEY, updated).await;

        Ok(CycleReport::action(decision, verification))
    }

    async fn init(&self) -> Result<CycleContext, CycleError> {
        let config = self.store.load_config().await;
        let paths = config.snapshot_paths(&self.store.base_dir());
        let names = self
            .store
            .load_name_map(&paths.name_map)
            .await
            .map_err(CycleError::NameMap)?;

        Ok(CycleContext {
            config,
            names: Arc::new(names),
            paths,
        })
    }

    fn actuator_source(&self, ctx: &CycleContext) -> CacheSource<ActuatorSnapshot> {
        CacheSource {
            upstream: Arc::new(ActuatorUpstream {
                adapter: Arc::clone(&self.actuator),
                config: ctx.config.clone(),
                names: Arc::clone(&ctx.names),
            }),
            snapshot: Arc::new(self.store.actuator_snapshot(ctx.paths.actuator.clone())),
        }
    }

    fn weather_source(&self, ctx: &CycleContext) -> CacheSource<Value> {
        CacheSource {
            upstream: Arc::new(WeatherUpstream {
                adapter: Arc::clone(&self.weather),
            }),
            snapshot: Arc::new(self.store.weather_snapshot(ctx.paths.weather.clone())),
        }
    }

    fn temperature_error(&self, config: &RegulatorConfig, weather: &WeatherReading) -> Option<f64> {
        let target = config.target_temp()?;
        let delta = config.delta_temp()?;
        let indoor = weather.indoor_temp?;
        self.mapper.temperature_error(target, delta, indoor)
    }

    async fn persist(
        &self,
        ctx: &CycleContext,
        snapshot: &ActuatorSnapshot,
        slider_id: &str,
        payload: &Value,
        decision: &ControlDecision,
    ) -> anyhow::Result<()> {
        let mut actuator = snapshot.clone();
        actuator.set(slider_id, format_position(decision.desired_position));

        tokio::try_join!(
            self.store.save_actuator(&ctx.paths.actuator, &actuator),
            self.store.save_weather(
                &ctx.paths.weather,
                payload,
                Some(decision.temperature_error)
            ),
        )?;
        Ok(())
    }

    async fn verify(&self, ctx: &CycleContext, slider_id: &str, intended: f64) -> Verification {
        match self.actuator.fetch_variable(&ctx.config, slider_id).await {
            Ok(Some(raw)) => match parse_reading(&raw).map(round1) {
                Some(read) if read == intended => {
                    info!(position = read, "slider verified");
                    Verification::Confirmed
                }
                Some(read) => {
                    warn!(intended, read, "slider readback differs from written value");
                    Verification::Mismatch { read }
                }
                None => {
                    warn!("slider readback '{raw}' is not numeric");
                    Verification::Unreadable
                }
            },
            Ok(None) => {
                warn!("slider readback returned no value");
                Verification::Unreadable
            }
            Err(err) => {
                warn!("slider readback failed: {err}");
                Verification::Unreadable
            }
        }
    }
}

struct ActuatorUpstream {
    adapter: Arc<dyn ActuatorAdapter>,
    config: RegulatorConfig,
    names: Arc<NameIdMap>,
}

#[async_trait]
impl Upstream<ActuatorSnapshot> for ActuatorUpstream {
    async fn fetch(&self) -> Result<ActuatorSnapshot, FetchError> {
        self.adapter.fetch_snapshot(&self.config, &self.names).await
    }
}

struct WeatherUpstream {
    adapter: Arc<dyn WeatherAdapter>,
}

#[async_trait]
impl Upstream<Value> for WeatherUpstream {
    async fn fetch(&self) -> Result<Value, FetchError> {
        let response = self.adapter.fetch_snapshot().await?;
        if response.code != 0 {
            return Err(FetchError::Unavailable(format!(
                "weather service code {}: {}",
                response.code, response.msg
            )));
        }
        response
            .data
            .ok_or_else(|| FetchError::Unavailable("weather response without data".to_string()))
    }
}
