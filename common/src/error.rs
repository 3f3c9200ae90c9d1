use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no id mapped for variable '{name}'")]
    MappingMissing { name: String },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed weather payload: {0}")]
    Weather(#[source] serde_json::Error),
    #[error("malformed actuator snapshot: {0}")]
    Actuator(#[source] serde_json::Error),
    #[error("malformed name map: {0}")]
    NameMap(#[source] serde_json::Error),
}
