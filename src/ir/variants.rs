use super::shape::VariantKey;
use crate::lang::script::ProcedureDefinition;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

/// A variant discovered at a call site whose IR has not been generated yet.
#[derive(Debug, Clone)]
pub struct VariantRequest {
    pub key: VariantKey,
    pub definition: Arc<ProcedureDefinition>,
}

/// Deduplicates call sites into procedure variants.
///
/// Keys are canonical, so two call sites whose signatures widen to the same
/// shapes share one request. Requests are handed out in discovery order and
/// each key is handed out once, which also terminates recursive procedures.
#[derive(Debug, Default)]
pub struct VariantResolver {
    known: BTreeSet<VariantKey>,
    pending: VecDeque<VariantRequest>,
}

impl VariantResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call site. Returns `true` if `key` names a new variant.
    pub fn request(&mut self, key: &VariantKey, definition: &Arc<ProcedureDefinition>) -> bool {
        if !self.known.insert(key.clone()) {
            return false;
        }
        tracing::trace!(variant = %key, "new procedure variant");
        self.pending.push_back(VariantRequest {
            key: key.clone(),
            definition: Arc::clone(definition),
        });
        true
    }

    pub fn next_pending(&mut self) -> Option<VariantRequest> {
        self.pending.pop_front()
    }

    pub fn contains(&self, key: &VariantKey) -> bool {
        self.known.contains(key)
    }

    /// Number of distinct variants seen so far.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}
