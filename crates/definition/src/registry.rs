//! Process-wide registry of published workflow definitions.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::definition::WorkflowDefinition;
use crate::error::{DefinitionError, Result};
use crate::validate::validate_definition;

/// Registry of versioned, immutable workflow definitions.
///
/// Definitions are validated and published once; after registration they
/// are only ever read, so lookups hand out `Arc`s to the shared copy.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    definitions: RwLock<HashMap<String, BTreeMap<u32, Arc<WorkflowDefinition>>>>,
}

impl DefinitionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and publishes a definition.
    ///
    /// Fails with `DuplicateVersion` if the (name, version) pair is
    /// already registered, or `InvalidDefinition` naming the violated
    /// rule.
    pub fn register(&self, definition: WorkflowDefinition) -> Result<()> {
        validate_definition(&definition).map_err(DefinitionError::InvalidDefinition)?;

        let mut definitions = self.definitions.write().expect("registry lock poisoned");
        let versions = definitions.entry(definition.name.clone()).or_default();
        if versions.contains_key(&definition.version) {
            return Err(DefinitionError::DuplicateVersion {
                name: definition.name,
                version: definition.version,
            });
        }

        tracing::info!(
            workflow = %definition.name,
            version = definition.version,
            steps = definition.steps.len(),
            "workflow definition registered"
        );
        versions.insert(definition.version, Arc::new(definition));
        Ok(())
    }

    /// Returns the definition registered under (name, version).
    pub fn get(&self, name: &str, version: u32) -> Result<Arc<WorkflowDefinition>> {
        let definitions = self.definitions.read().expect("registry lock poisoned");
        definitions
            .get(name)
            .and_then(|versions| versions.get(&version))
            .cloned()
            .ok_or_else(|| DefinitionError::NotFound(format!("{name}@v{version}")))
    }

    /// Returns the highest registered version of a workflow.
    pub fn latest(&self, name: &str) -> Result<Arc<WorkflowDefinition>> {
        let definitions = self.definitions.read().expect("registry lock poisoned");
        definitions
            .get(name)
            .and_then(|versions| versions.last_key_value())
            .map(|(_, def)| def.clone())
            .ok_or_else(|| DefinitionError::NotFound(name.to_string()))
    }

    /// Returns the names of all registered workflows.
    pub fn workflow_names(&self) -> Vec<String> {
        let definitions = self.definitions.read().expect("registry lock poisoned");
        definitions.keys().cloned().collect()
    }
}
