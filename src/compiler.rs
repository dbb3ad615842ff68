//! Embedded compiler service.
//!
//! A compilation unit is a list of `class Name : Base { ... }` declarations whose bodies are Rhai
//! source. Every successful compile emits a new [`Assembly`] holding the implicit evaluation
//! wrapper plus the declared types. Assemblies accumulate for the lifetime of the service and the
//! service offers no handle to "the type just added"; see [`crate::extractor`] for how callers
//! recover it.

mod declarations;
mod rhai_service;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use rhai::{Dynamic, Engine, AST};

use crate::diagnostics::Diagnostics;

pub use declarations::{scan_unit, TypeDeclaration};
pub use rhai_service::RhaiCompiler;

/// Synthetic type the service emits into every assembly.
pub const EVAL_WRAPPER_TYPE: &str = "<InteractiveExpressionClass>";

/// Base types a behaviour declaration is expected to name.
pub const BEHAVIOUR_BASES: &[&str] = &["Behaviour", "Behavior"];

#[derive(Debug)]
pub struct BehaviourType {
    name: String,
    base: Option<String>,
    assembly: u64,
    ast: AST,
}

impl BehaviourType {
    pub fn new(name: impl Into<String>, base: Option<String>, assembly: u64, ast: AST) -> Self {
        Self { name: name.into(), base, assembly, ast }
    }

    pub(crate) fn eval_wrapper(assembly: u64) -> Self {
        Self::new(EVAL_WRAPPER_TYPE, None, assembly, AST::empty())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// Id of the assembly this type was compiled into. Distinguishes generations of a type that
    /// keeps its name across recompiles.
    pub fn assembly_id(&self) -> u64 {
        self.assembly
    }

    pub fn ast(&self) -> &AST {
        &self.ast
    }

    pub fn is_eval_wrapper(&self) -> bool {
        self.name == EVAL_WRAPPER_TYPE
    }
}

#[derive(Debug)]
pub struct Assembly {
    id: u64,
    types: Vec<Arc<BehaviourType>>,
}

impl Assembly {
    pub(crate) fn new(id: u64, types: Vec<Arc<BehaviourType>>) -> Self {
        Self { id, types }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn types(&self) -> &[Arc<BehaviourType>] {
        &self.types
    }

    pub fn type_named(&self, name: &str) -> Option<&Arc<BehaviourType>> {
        self.types.iter().find(|ty| ty.name() == name)
    }
}

/// Value produced by the evaluator for a resolved type name.
#[derive(Debug, Clone)]
pub struct TypeRef {
    ty: Arc<BehaviourType>,
    assembly: Arc<Assembly>,
}

impl TypeRef {
    pub fn new(ty: Arc<BehaviourType>, assembly: Arc<Assembly>) -> Self {
        Self { ty, assembly }
    }

    pub fn behaviour_type(&self) -> &Arc<BehaviourType> {
        &self.ty
    }

    pub fn assembly(&self) -> &Arc<Assembly> {
        &self.assembly
    }

    pub fn name(&self) -> &str {
        self.ty.name()
    }
}

type ModuleInstaller = dyn Fn(&mut Engine) + Send + Sync;

/// A named set of host functions that compiled source may call.
#[derive(Clone)]
pub struct HostModule {
    name: String,
    install: Arc<ModuleInstaller>,
}

impl HostModule {
    pub fn new(name: impl Into<String>, install: impl Fn(&mut Engine) + Send + Sync + 'static) -> Self {
        Self { name: name.into(), install: Arc::new(install) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn install(&self, engine: &mut Engine) {
        (self.install)(engine);
    }
}

impl fmt::Debug for HostModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostModule").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Host modules shared between the compiler and the runtime that executes compiled code.
///
/// Append-only and deduplicated by name, so a holder can install new modules by index.
#[derive(Debug, Clone, Default)]
pub struct ModuleSet {
    modules: Arc<RwLock<Vec<HostModule>>>,
}

impl ModuleSet {
    pub fn new(modules: impl IntoIterator<Item = HostModule>) -> Self {
        let set = Self::default();
        for module in modules {
            set.add(module);
        }
        set
    }

    /// Returns false when a module with the same name is already present.
    pub fn add(&self, module: HostModule) -> bool {
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        if modules.iter().any(|existing| existing.name() == module.name()) {
            return false;
        }
        modules.push(module);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().iter().any(|module| module.name() == name)
    }

    pub fn len(&self) -> usize {
        self.modules.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<HostModule> {
        self.modules.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompileReport {
    pub success: bool,
    pub diagnostics: Diagnostics,
}

impl CompileReport {
    pub fn succeeded(diagnostics: Diagnostics) -> Self {
        Self { success: true, diagnostics }
    }

    pub fn failed(diagnostics: Diagnostics) -> Self {
        Self { success: false, diagnostics }
    }
}

/// Capability boundary of the compiler service.
pub trait CompilerService {
    /// Makes a host module visible to compiled and evaluated code. Returns false when the module
    /// was already referenced.
    fn reference_module(&mut self, module: &HostModule) -> bool;

    fn compile(&mut self, unit: &str) -> CompileReport;

    fn evaluate(&mut self, expression: &str) -> Result<Dynamic, String>;
}
