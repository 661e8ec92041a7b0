use crate::bytecode::compile_error::hint_line;
use crate::lang::block::BlockId;
use thiserror::Error;

/// A block graph the generator refuses to translate.
///
/// Only structural corruption ends up here; unsupported opcodes become
/// interpreter escapes instead. The caller falls back to interpreting the whole
/// script.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("generation error: '{script}' has no root block")]
    MissingRoot { script: String },

    #[error("generation error: block {id} referenced from '{script}' does not exist")]
    MissingBlock { script: String, id: BlockId },

    #[error("generation error: block {id} reached twice in '{script}'{}", hint_line(.hint))]
    Cycle {
        script: String,
        id: BlockId,
        hint: Option<String>,
    },
}

impl GenerationError {
    pub fn missing_root(script: &str) -> Self {
        GenerationError::MissingRoot {
            script: script.to_string(),
        }
    }

    pub fn missing_block(script: &str, id: BlockId) -> Self {
        GenerationError::MissingBlock {
            script: script.to_string(),
            id,
        }
    }

    pub fn cycle(script: &str, id: BlockId) -> Self {
        GenerationError::Cycle {
            script: script.to_string(),
            id,
            hint: Some("a `next` or input link points back into the same stack".to_string()),
        }
    }
}
