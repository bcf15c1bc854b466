//! Public model table
//!
//! Maps the model names clients see to the backend model and pipeline mode.
//! Built once at startup and read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::config::ModelEntry;
use crate::error::{BridgeError, Result};
use crate::proxy::ProxyError;

/// Backend pipeline selected by a public model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Web search with a search trace and cited sources
    Search,
    /// Plain chat
    Chat,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Search => "search",
            Mode::Chat => "chat",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved public model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub upstream_model: String,
    pub mode: Mode,
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    specs: Vec<ModelSpec>,
    index: HashMap<String, usize>,
    default_model: String,
}

impl ModelRegistry {
    /// Build the registry, rejecting empty or duplicate names
    pub fn new(entries: &[ModelEntry], default_model: &str) -> Result<Self> {
        let mut specs = Vec::with_capacity(entries.len());
        let mut index = HashMap::with_capacity(entries.len());

        for entry in entries {
            if entry.name.is_empty() {
                return Err(BridgeError::Config("Model names cannot be empty".to_string()));
            }
            if index.insert(entry.name.clone(), specs.len()).is_some() {
                return Err(BridgeError::Config(format!(
                    "Duplicate model name '{}'",
                    entry.name
                )));
            }
            specs.push(ModelSpec {
                name: entry.name.clone(),
                upstream_model: entry.upstream_model.clone(),
                mode: entry.mode,
            });
        }

        if !index.contains_key(default_model) {
            return Err(BridgeError::Config(format!(
                "Default model '{default_model}' is not in the model table"
            )));
        }

        Ok(Self {
            specs,
            index,
            default_model: default_model.to_string(),
        })
    }

    pub fn resolve(&self, public_name: &str) -> std::result::Result<&ModelSpec, ProxyError> {
        self.index
            .get(public_name)
            .map(|&i| &self.specs[i])
            .ok_or_else(|| ProxyError::UnknownModel(public_name.to_string()))
    }

    /// Public names in configuration order
    pub fn list(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|spec| spec.name.as_str())
    }

    pub fn specs(&self) -> impl Iterator<Item = &ModelSpec> {
        self.specs.iter()
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
