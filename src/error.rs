use std::io;
use std::path::PathBuf;

use bevy_ecs::entity::Entity;
use thiserror::Error;

use crate::diagnostics::Diagnostics;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read script {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("compilation failed with {} error(s){}", diagnostics.error_count(), first_error_suffix(diagnostics))]
    Compile { diagnostics: Diagnostics },
    #[error("marker type '{marker}' could not be resolved: {reason}")]
    MarkerUnresolved { marker: String, reason: String },
    #[error("compiled unit does not define a behaviour type")]
    NoBehaviourType,
    #[error("compiled unit defines more than one behaviour type: {}", candidates.join(", "))]
    AmbiguousBehaviour { candidates: Vec<String> },
    #[error(transparent)]
    Host(#[from] HostEntityError),
}

impl ScriptError {
    /// Compile and extraction failures share one propagation policy.
    pub fn is_compile_failure(&self) -> bool {
        matches!(
            self,
            ScriptError::Compile { .. }
                | ScriptError::MarkerUnresolved { .. }
                | ScriptError::NoBehaviourType
                | ScriptError::AmbiguousBehaviour { .. }
        )
    }

    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            ScriptError::Compile { diagnostics } => Some(diagnostics),
            _ => None,
        }
    }
}

fn first_error_suffix(diagnostics: &Diagnostics) -> String {
    diagnostics.first_error().map(|d| format!(": {} {}", d.location(), d.text)).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostEntityError {
    #[error("entity {0:?} does not exist")]
    EntityNotFound(Entity),
    #[error("no entity named '{0}'")]
    NamedEntityNotFound(String),
    #[error("entity {entity:?} refused behaviour '{type_name}': {reason}")]
    InstantiationRefused { entity: Entity, type_name: String, reason: String },
}
