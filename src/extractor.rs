//! Finds the behaviour type a source unit defines.
//!
//! The compiler service keeps every assembly it has produced and always adds an evaluation
//! wrapper type, so "the type that was just compiled" cannot be read off its output. Before each
//! compile an empty marker type with a process-unique name is appended to the unit. The marker is
//! resolved through the evaluator afterwards, and its assembly is exactly the output of that one
//! compile: excluding the wrapper and the marker leaves the behaviour type.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::compiler::{BehaviourType, TypeRef, EVAL_WRAPPER_TYPE};
use crate::context::CompilationContext;
use crate::diagnostics::Diagnostics;
use crate::error::ScriptError;

pub const MARKER_PREFIX: &str = "ReloadMarker_";

static NEXT_MARKER: AtomicU64 = AtomicU64::new(1);

/// Mints a marker name that is never handed out twice in this process.
pub fn next_marker_name() -> String {
    format!("{MARKER_PREFIX}{}", NEXT_MARKER.fetch_add(1, Ordering::Relaxed))
}

pub fn marker_declaration(marker: &str) -> String {
    format!("\nclass {marker} {{}}\n")
}

#[derive(Debug, Clone)]
pub struct Extracted {
    pub behaviour: Arc<BehaviourType>,
    pub marker: String,
    pub diagnostics: Diagnostics,
}

pub struct TypeExtractor;

impl TypeExtractor {
    pub fn compile(ctx: &mut CompilationContext, source: &str) -> Result<Extracted, ScriptError> {
        let marker = next_marker_name();
        let mut unit = String::with_capacity(source.len() + marker.len() + 16);
        unit.push_str(source);
        unit.push_str(&marker_declaration(&marker));

        let diagnostics = ctx.compile(&unit)?;
        let resolved = ctx
            .evaluate(&format!("type_ref(\"{marker}\")"))
            .map_err(|reason| ScriptError::MarkerUnresolved { marker: marker.clone(), reason })?;
        let marker_ref = resolved.try_cast::<TypeRef>().ok_or_else(|| ScriptError::MarkerUnresolved {
            marker: marker.clone(),
            reason: "evaluator did not return a type".to_string(),
        })?;

        let behaviour = Self::pick(&marker_ref, &marker)?;
        Ok(Extracted { behaviour, marker, diagnostics })
    }

    fn pick(marker_ref: &TypeRef, marker: &str) -> Result<Arc<BehaviourType>, ScriptError> {
        let mut candidates = marker_ref
            .assembly()
            .types()
            .iter()
            .filter(|ty| ty.name() != EVAL_WRAPPER_TYPE && ty.name() != marker);
        let Some(first) = candidates.next() else {
            return Err(ScriptError::NoBehaviourType);
        };
        let rest: Vec<_> = candidates.collect();
        if !rest.is_empty() {
            let mut names = vec![first.name().to_string()];
            names.extend(rest.iter().map(|ty| ty.name().to_string()));
            return Err(ScriptError::AmbiguousBehaviour { candidates: names });
        }
        Ok(Arc::clone(first))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_names_are_unique_and_prefixed() {
        let a = next_marker_name();
        let b = next_marker_name();
        assert_ne!(a, b);
        assert!(a.starts_with(MARKER_PREFIX));
        let n_a: u64 = a[MARKER_PREFIX.len()..].parse().expect("numeric suffix");
        let n_b: u64 = b[MARKER_PREFIX.len()..].parse().expect("numeric suffix");
        assert!(n_b > n_a);
    }

    #[test]
    fn marker_declaration_is_an_empty_baseless_class() {
        let decls = crate::compiler::scan_unit(&marker_declaration("ReloadMarker_9")).expect("scan");
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "ReloadMarker_9");
        assert_eq!(decls[0].base, None);
        assert!(decls[0].body.is_empty());
    }
}
