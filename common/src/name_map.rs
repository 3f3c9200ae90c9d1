use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::{DecodeError, ResolveError},
    types::ActuatorSnapshot,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameEntry {
    pub id: String,
    #[serde(default)]
    pub unit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameIdMap(BTreeMap<String, NameEntry>);

impl NameIdMap {
    pub fn from_slice(raw: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(raw).map_err(DecodeError::NameMap)
    }

    pub fn insert(&mut self, name: impl Into<String>, id: impl Into<String>, unit: &str) {
        self.0.insert(
            name.into(),
            NameEntry {
                id: id.into(),
                unit: unit.to_string(),
            },
        );
    }

    pub fn resolve(&self, name: &str) -> Result<&NameEntry, ResolveError> {
        self.0.get(name).ok_or_else(|| ResolveError::MappingMissing {
            name: name.to_string(),
        })
    }

    pub fn id_of(&self, name: &str) -> Result<&str, ResolveError> {
        self.resolve(name).map(|entry| entry.id.as_str())
    }

    pub fn reading<'a>(
        &self,
        name: &str,
        snapshot: &'a ActuatorSnapshot,
    ) -> Result<Option<&'a str>, ResolveError> {
        let id = self.id_of(name)?;
        Ok(snapshot.get(id))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &NameEntry)> {
        self.0.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
