use super::block::{BlockArena, BlockId};
use crate::ir::shape::VariantKey;
use crate::runtime::sandbox::CompiledRoutine;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};

/// A rooted stack of blocks, and the owner of its compilation cache entry.
///
/// Scripts are shared as `Arc<Script>`; the allocation is the cache identity.
/// Replacing a script means building a new one, never mutating it in place.
#[derive(Debug)]
pub struct Script {
    label: String,
    blocks: Arc<BlockArena>,
    top: Option<BlockId>,
    warp: bool,
    compiled: OnceLock<Arc<CompiledRoutine>>,
    compiling: Mutex<()>,
}

impl Script {
    pub fn new(blocks: Arc<BlockArena>, top: Option<BlockId>) -> Self {
        let label = match top {
            Some(id) => format!("script {}", id),
            None => "script <empty>".to_string(),
        };
        Self {
            label,
            blocks,
            top,
            warp: false,
            compiled: OnceLock::new(),
            compiling: Mutex::new(()),
        }
    }

    /// Run the whole script without screen refresh.
    pub fn with_warp(mut self, warp: bool) -> Self {
        self.warp = warp;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn blocks(&self) -> &Arc<BlockArena> {
        &self.blocks
    }

    pub fn top(&self) -> Option<BlockId> {
        self.top
    }

    pub fn is_warp(&self) -> bool {
        self.warp
    }

    /// The routine compiled for this script, if any.
    pub fn cached(&self) -> Option<Arc<CompiledRoutine>> {
        self.compiled.get().cloned()
    }

    /// Held while this script is looked up, compiled and stored, so concurrent
    /// drivers run the code generator for it at most once.
    pub fn lock_compilation(&self) -> MutexGuard<'_, ()> {
        self.compiling.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach `routine` as this script's cache entry. A populated entry is never
    /// replaced; the routine already stored wins.
    pub fn store(&self, routine: Arc<CompiledRoutine>) -> Arc<CompiledRoutine> {
        Arc::clone(self.compiled.get_or_init(|| routine))
    }
}

/// How a procedure parameter is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// `%s` / `%n` slot, defaults to the empty string.
    StringNumber,
    /// `%b` slot, defaults to `false`.
    Boolean,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Input name used by call blocks.
    pub id: String,
    /// Name used by argument reporters inside the body.
    pub name: String,
    pub kind: ParamKind,
}

/// A custom procedure visible to the scripts of one target.
#[derive(Debug)]
pub struct ProcedureDefinition {
    pub proccode: String,
    pub params: Vec<Param>,
    pub warp: bool,
    /// First block after the definition hat.
    pub body: Option<BlockId>,
    variants: RwLock<BTreeMap<VariantKey, Arc<Script>>>,
}

impl ProcedureDefinition {
    pub fn new(proccode: impl Into<String>, body: Option<BlockId>) -> Self {
        Self {
            proccode: proccode.into(),
            params: Vec::new(),
            warp: false,
            body,
            variants: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_param(mut self, id: &str, name: &str, kind: ParamKind) -> Self {
        self.params.push(Param {
            id: id.to_string(),
            name: name.to_string(),
            kind,
        });
        self
    }

    pub fn with_warp(mut self, warp: bool) -> Self {
        self.warp = warp;
        self
    }

    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    /// The script object standing for one specialization of this procedure.
    ///
    /// Entries are created on first request and never removed, so the compiled
    /// routine cached on them survives across threads and compilations.
    pub fn variant_script(&self, key: &VariantKey, blocks: &Arc<BlockArena>) -> Arc<Script> {
        {
            let variants = self.variants.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(script) = variants.get(key) {
                return Arc::clone(script);
            }
        }

        let mut variants = self.variants.write().unwrap_or_else(PoisonError::into_inner);
        let script = variants.entry(key.clone()).or_insert_with(|| {
            Arc::new(
                Script::new(Arc::clone(blocks), self.body)
                    .with_warp(key.warp)
                    .with_label(key.to_string()),
            )
        });
        Arc::clone(script)
    }

    pub fn variant_count(&self) -> usize {
        self.variants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A sprite or the stage: a block arena plus the procedures defined in it.
#[derive(Debug)]
pub struct Target {
    pub name: String,
    pub blocks: Arc<BlockArena>,
    procedures: BTreeMap<String, Arc<ProcedureDefinition>>,
}

impl Target {
    pub fn new(name: impl Into<String>, blocks: Arc<BlockArena>) -> Self {
        Self {
            name: name.into(),
            blocks,
            procedures: BTreeMap::new(),
        }
    }

    pub fn with_procedure(mut self, definition: ProcedureDefinition) -> Self {
        self.procedures
            .insert(definition.proccode.clone(), Arc::new(definition));
        self
    }

    pub fn procedure(&self, proccode: &str) -> Option<&Arc<ProcedureDefinition>> {
        self.procedures.get(proccode)
    }
}

/// Shared "stop requested" marker between a thread and its executions.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One running instance of a script on a target.
#[derive(Debug, Clone)]
pub struct Thread {
    script: Arc<Script>,
    target: Arc<Target>,
    stop: StopFlag,
}

impl Thread {
    pub fn new(script: Arc<Script>, target: Arc<Target>) -> Self {
        Self {
            script,
            target,
            stop: StopFlag::default(),
        }
    }

    pub fn script(&self) -> &Arc<Script> {
        &self.script
    }

    pub fn target(&self) -> &Arc<Target> {
        &self.target
    }

    /// Mark the thread stopped. Running executions observe this at their next
    /// suspension point.
    pub fn stop(&self) {
        self.stop.request();
    }

    pub fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }
}
