use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegulatorConfig {
    #[serde(rename = "T_SOLL", default = "default_target_temp")]
    pub target_temp: String,
    #[serde(rename = "T_DELTA", default = "default_delta_temp")]
    pub delta_temp: String,
    #[serde(rename = "F_ETA", default = "default_actuator_path")]
    pub actuator_snapshot_path: String,
    #[serde(rename = "S_ETA", default = "default_controller_address")]
    pub controller_address: String,
    #[serde(rename = "F_WIFIAF83", default = "default_weather_path")]
    pub weather_snapshot_path: String,
    #[serde(rename = "F_NAMES2ID", default = "default_names_path")]
    pub name_map_path: String,
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        Self {
            target_temp: default_target_temp(),
            delta_temp: default_delta_temp(),
            actuator_snapshot_path: default_actuator_path(),
            controller_address: default_controller_address(),
            weather_snapshot_path: default_weather_path(),
            name_map_path: default_names_path(),
        }
    }
}

impl RegulatorConfig {
    pub fn target_temp(&self) -> Option<f64> {
        parse_number(&self.target_temp)
    }

    pub fn delta_temp(&self) -> Option<f64> {
        parse_number(&self.delta_temp)
    }

    pub fn snapshot_paths(&self, base: &Path) -> SnapshotPaths {
        SnapshotPaths {
            actuator: resolve_path(base, &self.actuator_snapshot_path),
            weather: resolve_path(base, &self.weather_snapshot_path),
            name_map: resolve_path(base, &self.name_map_path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPaths {
    pub actuator: PathBuf,
    pub weather: PathBuf,
    pub name_map: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlTuning {
    pub error_low: f64,
    pub error_high: f64,
    pub max_error: f64,
    pub position_min: f64,
    pub position_max: f64,
    pub device_scale: f64,
}

impl Default for ControlTuning {
    fn default() -> Self {
        Self {
            error_low: 1.25,
            error_high: 5.0,
            max_error: 5.0,
            position_min: 0.0,
            position_max: 100.0,
            device_scale: 10.0,
        }
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

fn resolve_path(base: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn default_target_temp() -> String {
    "22".to_string()
}

fn default_delta_temp() -> String {
    "0".to_string()
}

fn default_actuator_path() -> String {
    "f_eta.json".to_string()
}

fn default_controller_address() -> String {
    "192.168.8.100:8080".to_string()
}

fn default_weather_path() -> String {
    "f_wifiaf89.json".to_string()
}

fn default_names_path() -> String {
    "f_names2id.json".to_string()
}
