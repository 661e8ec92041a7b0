use thiserror::Error;

/// Fatal code generation failure.
///
/// These indicate an internal inconsistency between the IR and the generator,
/// never bad user input. The driver does not cache anything when one occurs.
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    /// A call site references a variant missing from the IR's procedure map
    #[error("compile error: '{routine}' calls unknown variant {key}{}", hint_line(.hint))]
    MissingVariant {
        routine: String,
        key: String,
        hint: Option<String>,
    },

    /// An index table outgrew its 16-bit encoding
    #[error("compile error: too many {what} in '{routine}'")]
    TooMany { what: &'static str, routine: String },

    /// The finished image could not be serialized
    #[error("compile error: cannot encode '{routine}': {message}")]
    Encode { routine: String, message: String },

    /// Internal compiler error (shouldn't happen in normal use)
    #[error("compile error: internal error: {0}")]
    Internal(String),
}

impl CompileError {
    pub fn missing_variant(routine: &str, key: impl std::fmt::Display) -> Self {
        CompileError::MissingVariant {
            routine: routine.to_string(),
            key: key.to_string(),
            hint: Some(
                "every call site must be resolved to a variant before code generation".to_string(),
            ),
        }
    }

    pub fn too_many(what: &'static str, routine: &str) -> Self {
        CompileError::TooMany {
            what,
            routine: routine.to_string(),
        }
    }

    pub fn encode(routine: &str, message: impl std::fmt::Display) -> Self {
        CompileError::Encode {
            routine: routine.to_string(),
            message: message.to_string(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CompileError::Internal(msg.into())
    }
}

/// Render an optional hint as a trailing `hint:` line.
pub(crate) fn hint_line(hint: &Option<String>) -> String {
    match hint {
        Some(h) => format!("\n  hint: {}", h),
        None => String::new(),
    }
}
