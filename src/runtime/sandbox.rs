//! Loading generated routines.
//!
//! The evaluator is the only way a routine image becomes runnable. It decodes
//! the image, verifies it and resolves every import against exactly two
//! tables: the support library and the host primitives named by its
//! [`Capabilities`]. An image that names anything else fails to link.

use crate::bytecode::Op;
use crate::bytecode::compile_error::hint_line;
use crate::bytecode::image::{RoutineImage, RoutineSource};
use crate::bytecode::verify::{VerifyError, verify};
use crate::ir::shape::VariantKey;
use crate::runtime::host::Capabilities;
use crate::runtime::support::{self, SupportBinding};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error("link error: cannot decode '{routine}': {message}")]
    Decode { routine: String, message: String },

    #[error("link error: {0}")]
    Verify(#[from] VerifyError),

    #[error("link error: unknown support function '{name}'")]
    UnknownSupport { name: String },

    #[error("link error: support function '{name}' takes {expected} arguments, called with {found}")]
    SupportArity {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("link error: host primitive '{name}' is not available{}", hint_line(.hint))]
    CapabilityDenied { name: String, hint: Option<String> },
}

impl LinkError {
    fn capability_denied(name: &str) -> Self {
        LinkError::CapabilityDenied {
            name: name.to_string(),
            hint: Some("grant it through the evaluator's capabilities".to_string()),
        }
    }
}

/// A linked routine. Shared between the script cache and every execution
/// that runs it.
#[derive(Debug)]
pub struct CompiledRoutine {
    name: String,
    ops: Vec<Op>,
    support: Vec<SupportBinding>,
    host: Vec<String>,
    procedures: Vec<VariantKey>,
    locals: u16,
    arity: u16,
    warp: bool,
}

impl CompiledRoutine {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn support(&self, index: u16) -> Option<&SupportBinding> {
        self.support.get(index as usize)
    }

    pub fn host(&self, index: u16) -> Option<&str> {
        self.host.get(index as usize).map(String::as_str)
    }

    pub fn procedure(&self, index: u16) -> Option<&VariantKey> {
        self.procedures.get(index as usize)
    }

    pub fn procedures(&self) -> &[VariantKey] {
        &self.procedures
    }

    pub fn locals(&self) -> u16 {
        self.locals
    }

    pub fn arity(&self) -> u16 {
        self.arity
    }

    pub fn is_warp(&self) -> bool {
        self.warp
    }
}

#[derive(Debug, Clone)]
pub struct Evaluator {
    capabilities: Capabilities,
}

impl Evaluator {
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Decode, verify and link an encoded routine.
    pub fn load(&self, source: &RoutineSource) -> Result<CompiledRoutine, LinkError> {
        let image = source.decode().map_err(|e| LinkError::Decode {
            routine: source.name.clone(),
            message: e.to_string(),
        })?;
        self.link(image)
    }

    pub fn link(&self, image: RoutineImage) -> Result<CompiledRoutine, LinkError> {
        verify(&image)?;

        let support = image
            .support_imports
            .iter()
            .map(|name| {
                support::binding(name).copied().ok_or_else(|| LinkError::UnknownSupport {
                    name: name.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        for op in &image.ops {
            if let Op::CallSupport { import, argc } = op {
                // verify() already bounds-checked the index
                if let Some(b) = support.get(*import as usize) {
                    if b.arity != *argc as usize {
                        return Err(LinkError::SupportArity {
                            name: b.name.to_string(),
                            expected: b.arity,
                            found: *argc as usize,
                        });
                    }
                }
            }
        }

        if let Some(denied) = image
            .host_imports
            .iter()
            .find(|name| !self.capabilities.allows(name))
        {
            return Err(LinkError::capability_denied(denied));
        }

        tracing::trace!(
            routine = %image.name,
            support = support.len(),
            host = image.host_imports.len(),
            "linked routine"
        );

        Ok(CompiledRoutine {
            name: image.name,
            ops: image.ops,
            support,
            host: image.host_imports,
            procedures: image.procedures,
            locals: image.locals,
            arity: image.arity,
            warp: image.warp,
        })
    }
}
