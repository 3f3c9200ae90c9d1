use serde::Serialize;

use crate::{
    config::ControlTuning,
    types::{ActuatorReading, SwitchState},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControlDecision {
    #[serde(rename = "temperatureError")]
    pub temperature_error: f64,
    #[serde(rename = "desiredPosition")]
    pub desired_position: f64,
    #[serde(rename = "currentPosition")]
    pub current_position: Option<f64>,
    #[serde(rename = "shouldWrite")]
    pub should_write: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiffMapper {
    pub tuning: ControlTuning,
}

impl DiffMapper {
    pub fn new(tuning: ControlTuning) -> Self {
        Self { tuning }
    }

    // Unbounded below.
    pub fn temperature_error(&self, target: f64, delta: f64, indoor: f64) -> Option<f64> {
        let error = (target + delta - indoor).min(self.tuning.max_error);
        error.is_finite().then(|| round1(error))
    }

    pub fn position(&self, error: f64, reading: &ActuatorReading) -> f64 {
        if is_disabled(reading) {
            return self.tuning.position_min;
        }
        round1(interpolate(
            error,
            self.tuning.error_low,
            self.tuning.error_high,
            self.tuning.position_min,
            self.tuning.position_max,
        ))
    }

    pub fn decide(&self, error: f64, reading: &ActuatorReading) -> ControlDecision {
        let desired_position = self.position(error, reading);
        ControlDecision {
            temperature_error: error,
            desired_position,
            current_position: reading.current_position,
            // Exact comparison: both sides carry one decimal place.
            should_write: reading.current_position != Some(desired_position),
        }
    }

    pub fn device_value(&self, position: f64) -> String {
        format!("{:.0}", position * self.tuning.device_scale)
    }
}

pub fn interpolate(value: f64, low: f64, high: f64, out_min: f64, out_max: f64) -> f64 {
    if value <= low {
        out_min
    } else if value >= high {
        out_max
    } else {
        out_min + (value - low) / (high - low) * (out_max - out_min)
    }
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn format_position(position: f64) -> String {
    format!("{position:.1}")
}

// A manual or global disable on the controller always wins over the loop.
fn is_disabled(reading: &ActuatorReading) -> bool {
    reading.on_off == Some(SwitchState::Off)
        || (reading.switch_state == Some(SwitchState::Off)
            && reading.manual_override == Some(SwitchState::Off))
}
