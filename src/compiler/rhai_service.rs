use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use rhai::{Dynamic, Engine, EvalAltResult, ParseError, INT};

use super::{
    scan_unit, Assembly, BehaviourType, CompileReport, CompilerService, HostModule, TypeDeclaration, TypeRef,
    BEHAVIOUR_BASES,
};
use crate::diagnostics::{Diagnostic, Diagnostics};

type TypeTable = Arc<RwLock<HashMap<String, TypeRef>>>;

/// Compiler service backed by a Rhai engine. State only grows: every assembly ever emitted stays
/// reachable and type names resolve to their most recent definition.
pub struct RhaiCompiler {
    engine: Engine,
    types: TypeTable,
    assemblies: Vec<Arc<Assembly>>,
    referenced: Vec<String>,
    next_assembly: u64,
}

impl RhaiCompiler {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        let types: TypeTable = Arc::default();
        register_reflection(&mut engine, Arc::clone(&types));
        Self { engine, types, assemblies: Vec::new(), referenced: Vec::new(), next_assembly: 1 }
    }

    pub fn assemblies(&self) -> &[Arc<Assembly>] {
        &self.assemblies
    }

    pub fn referenced_modules(&self) -> &[String] {
        &self.referenced
    }

    pub fn lookup(&self, name: &str) -> Option<TypeRef> {
        self.types.read().unwrap_or_else(PoisonError::into_inner).get(name).cloned()
    }

    fn compile_declaration(
        &self,
        assembly: u64,
        decl: &TypeDeclaration,
        diagnostics: &mut Diagnostics,
    ) -> Option<BehaviourType> {
        if let Some(base) = decl.base.as_deref() {
            if !BEHAVIOUR_BASES.contains(&base) {
                diagnostics.push(Diagnostic::warning(
                    decl.line,
                    decl.column,
                    format!("'{}' derives from unknown base type '{base}'", decl.name),
                ));
            }
        }
        if self.lookup(&decl.name).is_some() {
            diagnostics.push(Diagnostic::warning(
                decl.line,
                decl.column,
                format!("'{}' redefines a type from an earlier compilation", decl.name),
            ));
        }
        match self.engine.compile(&decl.body) {
            Ok(ast) => Some(BehaviourType::new(decl.name.clone(), decl.base.clone(), assembly, ast)),
            Err(err) => {
                diagnostics.push(parse_error_diagnostic(decl, &err));
                None
            }
        }
    }
}

impl Default for RhaiCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl CompilerService for RhaiCompiler {
    fn reference_module(&mut self, module: &HostModule) -> bool {
        if self.referenced.iter().any(|name| name == module.name()) {
            return false;
        }
        module.install(&mut self.engine);
        self.referenced.push(module.name().to_string());
        true
    }

    fn compile(&mut self, unit: &str) -> CompileReport {
        let declarations = match scan_unit(unit) {
            Ok(declarations) => declarations,
            Err(diagnostic) => return CompileReport::failed(diagnostic.into()),
        };

        let assembly_id = self.next_assembly;
        let mut diagnostics = Diagnostics::new();
        let mut types = vec![Arc::new(BehaviourType::eval_wrapper(assembly_id))];
        let mut seen = HashSet::new();
        for decl in &declarations {
            if !seen.insert(decl.name.as_str()) {
                diagnostics.push(Diagnostic::error(
                    decl.line,
                    decl.column,
                    format!("type '{}' is declared more than once in this unit", decl.name),
                ));
                continue;
            }
            if let Some(ty) = self.compile_declaration(assembly_id, decl, &mut diagnostics) {
                types.push(Arc::new(ty));
            }
        }
        if diagnostics.has_errors() {
            return CompileReport::failed(diagnostics);
        }

        self.next_assembly += 1;
        let assembly = Arc::new(Assembly::new(assembly_id, types));
        {
            let mut table = self.types.write().unwrap_or_else(PoisonError::into_inner);
            for ty in assembly.types().iter().filter(|ty| !ty.is_eval_wrapper()) {
                table.insert(ty.name().to_string(), TypeRef::new(Arc::clone(ty), Arc::clone(&assembly)));
            }
        }
        self.assemblies.push(assembly);
        CompileReport::succeeded(diagnostics)
    }

    fn evaluate(&mut self, expression: &str) -> Result<Dynamic, String> {
        self.engine.eval_expression::<Dynamic>(expression).map_err(|err| err.to_string())
    }
}

fn register_reflection(engine: &mut Engine, types: TypeTable) {
    engine.register_type_with_name::<TypeRef>("TypeRef");
    engine.register_get("name", |ty: &mut TypeRef| ty.name().to_string());
    engine.register_get("assembly", |ty: &mut TypeRef| ty.assembly().id() as INT);
    engine.register_fn("type_ref", move |name: &str| -> Result<TypeRef, Box<EvalAltResult>> {
        let table = types.read().unwrap_or_else(PoisonError::into_inner);
        table.get(name).cloned().ok_or_else(|| format!("type '{name}' is not defined").into())
    });
}

fn parse_error_diagnostic(decl: &TypeDeclaration, err: &ParseError) -> Diagnostic {
    let position = err.1;
    let (line, column) = match (position.line(), position.position()) {
        (Some(1), Some(column)) => (decl.body_line, decl.body_column + column - 1),
        (Some(line), Some(column)) => (decl.body_line + line - 1, column),
        (Some(line), None) => (decl.body_line + line - 1, 1),
        _ => (decl.line, decl.column),
    };
    Diagnostic::error(line, column, format!("in '{}': {}", decl.name, err.0))
}
