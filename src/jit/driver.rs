use super::JitError;
use crate::bytecode::Op;
use crate::bytecode::compile::compile;
use crate::bytecode::disasm::disassemble;
use crate::ir::generate::IrGenerator;
use crate::ir::node::{Ir, IrScript};
use crate::jit::config::CompilerConfig;
use crate::lang::script::Thread;
use crate::runtime::host::Capabilities;
use crate::runtime::sandbox::{CompiledRoutine, Evaluator};
use crate::runtime::vm::{Execution, VariantTable, VmConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Driver counters.
#[derive(Debug, Default)]
pub struct CompilerStats {
    /// Code generator runs (one per cache miss).
    pub codegen_invocations: AtomicU64,
    /// Scripts answered from their cache entry.
    pub cache_hits: AtomicU64,
    /// Interpreter escapes in freshly generated routines.
    pub escapes: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub codegen_invocations: u64,
    pub cache_hits: u64,
    pub escapes: u64,
}

impl CompilerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            codegen_invocations: self.codegen_invocations.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            escapes: self.escapes.load(Ordering::Relaxed),
        }
    }
}

/// Everything the scheduler needs to run one thread.
#[derive(Debug, Clone)]
pub struct CompiledThread {
    pub starting_routine: Arc<CompiledRoutine>,
    pub procedure_variants: Arc<VariantTable>,
    vm: VmConfig,
}

impl CompiledThread {
    /// A fresh resumable execution bound to `thread`'s stop flag.
    pub fn start(&self, thread: &Thread) -> Execution {
        Execution::new(
            Arc::clone(&self.starting_routine),
            Arc::clone(&self.procedure_variants),
            thread.stop_flag().clone(),
            self.vm.clone(),
        )
    }
}

pub struct Jit {
    config: CompilerConfig,
    evaluator: Evaluator,
    stats: CompilerStats,
}

impl Jit {
    pub fn new(config: CompilerConfig) -> Self {
        Self::with_capabilities(config, Capabilities::standard())
    }

    pub fn with_capabilities(config: CompilerConfig, capabilities: Capabilities) -> Self {
        Self {
            config,
            evaluator: Evaluator::new(capabilities),
            stats: CompilerStats::new(),
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn stats(&self) -> &CompilerStats {
        &self.stats
    }

    /// Generate IR for `thread` once, then compile the entry script and every
    /// procedure variant it reaches.
    ///
    /// Routines are attached to their scripts only after the whole thread has
    /// compiled and linked. A failure anywhere leaves every cache entry it
    /// touched empty.
    pub fn compile_thread(&self, thread: &Thread) -> Result<CompiledThread, JitError> {
        let ir = IrGenerator::new(thread, &self.config).generate()?;

        // Entry scripts are never procedure variants, and variants come in key
        // order, so two threads sharing variants lock them in the same order.
        let _guards: Vec<_> = std::iter::once(&ir.entry)
            .chain(ir.procedures.values())
            .map(|script| script.script.lock_compilation())
            .collect();

        let entry = self.cached_or_build(&ir.entry, &ir)?;
        let mut variants = Vec::with_capacity(ir.procedures.len());
        for (key, variant) in &ir.procedures {
            variants.push((key, variant, self.cached_or_build(variant, &ir)?));
        }

        let starting_routine = ir.entry.script.store(entry);
        let procedure_variants: VariantTable = variants
            .into_iter()
            .map(|(key, variant, routine)| (key.clone(), variant.script.store(routine)))
            .collect();

        tracing::debug!(
            script = %ir.entry.label,
            variants = procedure_variants.len(),
            "compiled thread"
        );

        Ok(CompiledThread {
            starting_routine,
            procedure_variants: Arc::new(procedure_variants),
            vm: self.config.vm.clone(),
        })
    }

    /// Compile one IR script, memoized on its script object.
    ///
    /// A populated cache entry is returned as is, whatever the current
    /// configuration. Failures leave the entry empty.
    pub fn compile_script(
        &self,
        script: &IrScript,
        ir: &Ir,
    ) -> Result<Arc<CompiledRoutine>, JitError> {
        let _guard = script.script.lock_compilation();
        let routine = self.cached_or_build(script, ir)?;
        Ok(script.script.store(routine))
    }

    fn cached_or_build(
        &self,
        script: &IrScript,
        ir: &Ir,
    ) -> Result<Arc<CompiledRoutine>, JitError> {
        match self.cached(script) {
            Some(routine) => Ok(routine),
            None => self.build(script, ir),
        }
    }

    fn cached(&self, script: &IrScript) -> Option<Arc<CompiledRoutine>> {
        let routine = script.script.cached()?;
        self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(script = %script.label, "cache hit");
        Some(routine)
    }

    /// Generate, encode and link a routine without touching the cache.
    fn build(&self, script: &IrScript, ir: &Ir) -> Result<Arc<CompiledRoutine>, JitError> {
        self.stats.codegen_invocations.fetch_add(1, Ordering::Relaxed);
        let image = compile(script, ir, &self.config)?;

        let escapes = image
            .ops
            .iter()
            .filter(|op| matches!(op, Op::Escape { .. }))
            .count() as u64;
        self.stats.escapes.fetch_add(escapes, Ordering::Relaxed);

        tracing::trace!(script = %script.label, "\n{}", disassemble(&image));

        let source = image.encode()?;
        let routine = self.evaluator.load(&source)?;
        Ok(Arc::new(routine))
    }
}

impl Default for Jit {
    fn default() -> Self {
        Self::new(CompilerConfig::default())
    }
}
