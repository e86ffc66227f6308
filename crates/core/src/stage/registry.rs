//! Static catalogue of pipeline stages.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use super::error::RegistryError;
use super::traits::{BatchStage, ProjectStage};
use super::types::StageKind;

/// The invocation contract of a registered stage.
#[derive(Clone)]
pub enum StageHandler {
    /// Run once per orchestrator run.
    Batch(Arc<dyn BatchStage>),
    /// Run once per project whose status equals `prerequisite`.
    PerProject {
        prerequisite: String,
        stage: Arc<dyn ProjectStage>,
    },
}

/// One registered stage.
#[derive(Clone)]
pub struct StageDefinition {
    name: String,
    handler: StageHandler,
}

impl StageDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StageKind {
        match self.handler {
            StageHandler::Batch(_) => StageKind::Batch,
            StageHandler::PerProject { .. } => StageKind::PerProject,
        }
    }

    /// Status a project must have to enter this stage.
    pub fn prerequisite(&self) -> Option<&str> {
        match &self.handler {
            StageHandler::Batch(_) => None,
            StageHandler::PerProject { prerequisite, .. } => Some(prerequisite),
        }
    }

    pub fn handler(&self) -> &StageHandler {
        &self.handler
    }
}

impl fmt::Debug for StageDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("prerequisite", &self.prerequisite())
            .finish()
    }
}

/// Validated mapping from stage name to its definition.
///
/// Built once at startup; lookups never mutate it.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: Vec<StageDefinition>,
    index: HashMap<String, usize>,
}

impl StageRegistry {
    pub fn builder() -> StageRegistryBuilder {
        StageRegistryBuilder::default()
    }

    /// Look up a stage by name.
    pub fn resolve(&self, name: &str) -> Result<&StageDefinition, RegistryError> {
        self.index
            .get(name)
            .map(|&i| &self.stages[i])
            .ok_or_else(|| RegistryError::UnknownStage {
                name: name.to_string(),
                valid: self.names(),
            })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stages.iter().map(|s| s.name.clone()).collect();
        names.sort();
        names
    }

    /// Definitions in registration order.
    pub fn stages(&self) -> impl Iterator<Item = &StageDefinition> {
        self.stages.iter()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Builder for [`StageRegistry`]. All validation happens in [`build`](Self::build).
#[derive(Default)]
pub struct StageRegistryBuilder {
    stages: Vec<StageDefinition>,
}

impl StageRegistryBuilder {
    /// Register a batch stage.
    pub fn batch(mut self, name: impl Into<String>, stage: impl BatchStage + 'static) -> Self {
        self.stages.push(StageDefinition {
            name: name.into(),
            handler: StageHandler::Batch(Arc::new(stage)),
        });
        self
    }

    /// Register a per-project stage that runs on projects with status `prerequisite`.
    pub fn per_project(
        mut self,
        name: impl Into<String>,
        prerequisite: impl Into<String>,
        stage: impl ProjectStage + 'static,
    ) -> Self {
        self.stages.push(StageDefinition {
            name: name.into(),
            handler: StageHandler::PerProject {
                prerequisite: prerequisite.into(),
                stage: Arc::new(stage),
            },
        });
        self
    }

    /// Validate and freeze the registry.
    pub fn build(self) -> Result<StageRegistry, RegistryError> {
        let mut index = HashMap::with_capacity(self.stages.len());
        for (i, def) in self.stages.iter().enumerate() {
            if def.name.is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if index.insert(def.name.clone(), i).is_some() {
                return Err(RegistryError::DuplicateStage(def.name.clone()));
            }
        }

        for def in &self.stages {
            if let Some(prerequisite) = def.prerequisite() {
                if prerequisite == def.name {
                    return Err(RegistryError::SelfPrerequisite(def.name.clone()));
                }
                if !index.contains_key(prerequisite) {
                    return Err(RegistryError::UnknownPrerequisite {
                        stage: def.name.clone(),
                        prerequisite: prerequisite.to_string(),
                    });
                }
            }
        }

        for def in &self.stages {
            let mut seen = HashSet::new();
            let mut chain = vec![def.name.clone()];
            let mut current = def;
            seen.insert(def.name.as_str());
            while let Some(prerequisite) = current.prerequisite() {
                chain.push(prerequisite.to_string());
                if !seen.insert(prerequisite) {
                    return Err(RegistryError::PrerequisiteCycle(chain));
                }
                current = &self.stages[index[prerequisite]];
            }
        }

        Ok(StageRegistry {
            stages: self.stages,
            index,
        })
    }
}
