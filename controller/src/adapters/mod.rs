use async_trait::async_trait;
use thiserror::Error;

use regulator_common::{ActuatorSnapshot, NameIdMap, RegulatorConfig, WeatherResponse};

pub mod ecowitt;
pub mod eta;

pub use ecowitt::EcowittAdapter;
pub use eta::EtaAdapter;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected payload: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            Self::RateLimited(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
pub trait ActuatorAdapter: Send + Sync {
    async fn fetch_snapshot(
        &self,
        config: &RegulatorConfig,
        names: &NameIdMap,
    ) -> Result<ActuatorSnapshot, FetchError>;

    async fn write_variable(
        &self,
        config: &RegulatorConfig,
        id: &str,
        value: &str,
        flags: &str,
        index: &str,
    ) -> Result<(), FetchError>;

    async fn fetch_variable(
        &self,
        config: &RegulatorConfig,
        id: &str,
    ) -> Result<Option<String>, FetchError>;
}

#[async_trait]
pub trait WeatherAdapter: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<WeatherResponse, FetchError>;
}
