use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{error::DecodeError, types::parse_reading};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherResponse {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MeasuredValue {
    Number(f64),
    Text(String),
}

impl MeasuredValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value).filter(|value| value.is_finite()),
            Self::Text(raw) => parse_reading(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Measurement {
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    pub value: MeasuredValue,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub temperature: Option<Measurement>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StationData {
    pub indoor: Channel,
    pub outdoor: Channel,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeatherReading {
    #[serde(rename = "indoorTemp")]
    pub indoor_temp: Option<f64>,
    #[serde(rename = "outdoorTemp")]
    pub outdoor_temp: Option<f64>,
    pub timestamp: Option<i64>,
}

impl WeatherReading {
    // The service reports "no station data" as an empty array.
    pub fn decode(payload: &Value) -> Result<Option<Self>, DecodeError> {
        let Some(object) = payload.as_object() else {
            return Ok(None);
        };
        if !object.contains_key("indoor") || !object.contains_key("outdoor") {
            return Ok(None);
        }

        let station: StationData =
            serde_json::from_value(payload.clone()).map_err(DecodeError::Weather)?;
        let indoor = station.indoor.temperature.as_ref();
        let outdoor = station.outdoor.temperature.as_ref();

        Ok(Some(Self {
            indoor_temp: indoor.and_then(|m| m.value.as_f64()),
            outdoor_temp: outdoor.and_then(|m| m.value.as_f64()),
            timestamp: indoor
                .or(outdoor)
                .and_then(|m| m.time.as_deref())
                .and_then(|time| time.trim().parse::<i64>().ok()),
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherFile {
    pub code: i64,
    pub msg: String,
    pub time: String,
    pub data: Value,
    pub datestring: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub diff: f64,
}

impl WeatherFile {
    pub fn new(data: Value, unix_secs: i64, datestring: String, diff: f64) -> Self {
        Self {
            code: 0,
            msg: "success".to_string(),
            time: unix_secs.to_string(),
            data,
            datestring,
            diff,
        }
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(raw).map_err(DecodeError::Weather)
    }
}

// Older snapshots stored `diff` as a string.
fn lenient_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<MeasuredValue>::deserialize(deserializer)?;
    Ok(value.and_then(|value| value.as_f64()).unwrap_or(0.0))
}
