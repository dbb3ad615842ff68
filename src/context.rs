use std::sync::Arc;

use rhai::Dynamic;

use crate::compiler::{CompilerService, HostModule, ModuleSet, RhaiCompiler};
use crate::diagnostics::{DiagnosticSink, Diagnostics, ReportPrinter};
use crate::error::ScriptError;

/// Owns the single compiler service instance shared by every script.
///
/// Host modules handed over at construction are referenced on first use, so that scripts can call
/// back into host APIs. The module set is shared: a runtime holding [`CompilationContext::modules`]
/// sees every module the compiler does. Compiled state accumulates for the lifetime of the context.
pub struct CompilationContext {
    service: Box<dyn CompilerService>,
    modules: ModuleSet,
    bootstrapped: bool,
    printer: ReportPrinter,
}

impl CompilationContext {
    pub fn new(
        service: Box<dyn CompilerService>,
        host_modules: Vec<HostModule>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self { service, modules: ModuleSet::new(host_modules), bootstrapped: false, printer: ReportPrinter::new(sink) }
    }

    pub fn with_rhai(host_modules: Vec<HostModule>, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self::new(Box::new(RhaiCompiler::new()), host_modules, sink)
    }

    pub fn set_log_warnings(&mut self, enabled: bool) {
        self.printer.set_log_warnings(enabled);
    }

    pub fn log_warnings(&self) -> bool {
        self.printer.log_warnings()
    }

    pub fn sink(&self) -> &Arc<dyn DiagnosticSink> {
        self.printer.sink()
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    pub fn modules(&self) -> &ModuleSet {
        &self.modules
    }

    /// Makes a module loaded after bootstrap visible as well. Modules are referenced at most once.
    pub fn add_host_module(&mut self, module: HostModule) {
        if !self.modules.add(module.clone()) {
            return;
        }
        if self.bootstrapped {
            self.service.reference_module(&module);
        }
    }

    fn ensure_bootstrapped(&mut self) {
        if self.bootstrapped {
            return;
        }
        self.bootstrapped = true;
        for module in self.modules.snapshot() {
            if self.service.reference_module(&module) {
                self.printer.sink().log_info(&format!("referenced host module '{}'", module.name()));
            }
        }
    }

    /// Compiles a unit. Diagnostics go to the sink; warnings only when enabled.
    pub fn compile(&mut self, unit: &str) -> Result<Diagnostics, ScriptError> {
        self.ensure_bootstrapped();
        let report = self.service.compile(unit);
        self.printer.print_all(&report.diagnostics);
        if report.success {
            Ok(report.diagnostics)
        } else {
            Err(ScriptError::Compile { diagnostics: report.diagnostics })
        }
    }

    pub fn evaluate(&mut self, expression: &str) -> Result<Dynamic, String> {
        self.ensure_bootstrapped();
        self.service.evaluate(expression)
    }
}
