use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;

use regulator_common::WeatherResponse;

use super::{FetchError, WeatherAdapter};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BASE_URL: &str = "https://api.ecowitt.net";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcowittCredentials {
    pub application_key: String,
    pub api_key: String,
    pub mac: String,
}

pub struct EcowittAdapter {
    http: Client,
    base_url: String,
    credentials: EcowittCredentials,
}

impl EcowittAdapter {
    pub fn new(base_url: impl Into<String>, credentials: EcowittCredentials) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build weather http client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            credentials,
        })
    }

    fn real_time_url(&self) -> String {
        format!(
            "{}/api/v3/device/real_time",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl WeatherAdapter for EcowittAdapter {
    async fn fetch_snapshot(&self) -> Result<WeatherResponse, FetchError> {
        let response: WeatherResponse = self
            .http
            .get(self.real_time_url())
            .query(&[
                ("application_key", self.credentials.application_key.as_str()),
                ("api_key", self.credentials.api_key.as_str()),
                ("mac", self.credentials.mac.as_str()),
                ("call_back", "all"),
                ("temp_unitid", "1"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        classify(response)
    }
}

pub fn classify(response: WeatherResponse) -> Result<WeatherResponse, FetchError> {
    if response.code == 0 {
        return Ok(response);
    }

    let message = format!("code {}: {}", response.code, response.msg);
    let msg = response.msg.to_lowercase();
    if msg.contains("too frequent") || msg.contains("rate limit") {
        Err(FetchError::RateLimited(message))
    } else {
        Err(FetchError::Unavailable(message))
    }
}
