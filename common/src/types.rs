use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::{DecodeError, ResolveError},
    name_map::NameIdMap,
    names::{
        LABEL_OFF, NAME_MANUAL_OVERRIDE, NAME_ON_OFF, NAME_OUTDOOR_TEMP, NAME_SLIDER_POSITION,
        NAME_SWITCH_STATE,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarValue {
    #[serde(rename = "strValue")]
    pub str_value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActuatorSnapshot(BTreeMap<String, VarValue>);

impl ActuatorSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(raw).map_err(DecodeError::Actuator)
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.0.get(id).map(|value| value.str_value.as_str())
    }

    pub fn set(&mut self, id: impl Into<String>, str_value: impl Into<String>) {
        self.0.insert(
            id.into(),
            VarValue {
                str_value: str_value.into(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn from_label(label: &str) -> Self {
        if label.trim() == LABEL_OFF {
            Self::Off
        } else {
            Self::On
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActuatorReading {
    pub on_off: Option<SwitchState>,
    pub switch_state: Option<SwitchState>,
    pub manual_override: Option<SwitchState>,
    pub current_position: Option<f64>,
    pub controller_outdoor_temp: Option<f64>,
}

impl ActuatorReading {
    // A mapped id without a reading is absent.
    pub fn from_snapshot(
        names: &NameIdMap,
        snapshot: &ActuatorSnapshot,
    ) -> Result<Self, ResolveError> {
        let switch = |name: &str| -> Result<Option<SwitchState>, ResolveError> {
            Ok(names.reading(name, snapshot)?.map(SwitchState::from_label))
        };
        let number = |name: &str| -> Result<Option<f64>, ResolveError> {
            Ok(names.reading(name, snapshot)?.and_then(parse_reading))
        };

        Ok(Self {
            on_off: switch(NAME_ON_OFF)?,
            switch_state: switch(NAME_SWITCH_STATE)?,
            manual_override: switch(NAME_MANUAL_OVERRIDE)?,
            current_position: number(NAME_SLIDER_POSITION)?.map(crate::diff::round1),
            controller_outdoor_temp: number(NAME_OUTDOOR_TEMP)?,
        })
    }
}

pub fn parse_reading(raw: &str) -> Option<f64> {
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}
