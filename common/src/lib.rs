pub mod cache;
pub mod config;
pub mod diff;
pub mod error;
pub mod name_map;
pub mod names;
pub mod types;
pub mod weather;

pub use cache::{CacheEntry, TtlCache};
pub use config::{ControlTuning, RegulatorConfig, SnapshotPaths};
pub use diff::{format_position, round1, ControlDecision, DiffMapper};
pub use error::{DecodeError, ResolveError};
pub use name_map::{NameEntry, NameIdMap};
pub use names::*;
pub use types::{ActuatorReading, ActuatorSnapshot, SwitchState, VarValue};
pub use weather::{WeatherFile, WeatherReading, WeatherResponse};
