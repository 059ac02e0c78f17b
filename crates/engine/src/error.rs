use std::path::PathBuf;

use {
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

/// Why a parameter could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterFailure {
    #[error("needs an answer from the operator but the run is in batch mode; supply an override")]
    PromptInBatch,
    #[error("interactive mode has no prompter attached")]
    NoPrompter,
    #[error("prompt failed: {0}")]
    Prompt(String),
    #[error("auto-detect names unknown detector '{0}'")]
    UnknownDetector(String),
    #[error("required but no override, detected value, or default is available")]
    Unresolved,
}

/// A parameter that could not be given a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("module {module_id}: parameter '{parameter}' {failure}")]
pub struct ParameterError {
    pub module_id: String,
    pub parameter: String,
    #[source]
    pub failure: ParameterFailure,
}

impl ParameterError {
    #[must_use]
    pub fn new(
        module_id: impl Into<String>,
        parameter: impl Into<String>,
        failure: ParameterFailure,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            parameter: parameter.into(),
            failure,
        }
    }
}

/// Failure of one module's installation step.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The installer itself reported an error.
    #[error("module {module_id}: {message}")]
    Failed { module_id: String, message: String },

    #[error("module {module_id}: target '{target_path}' is not declared by the module")]
    UndeclaredTarget {
        module_id: String,
        target_path: String,
    },

    #[error("module {module_id}: refusing to write '{target_path}': {reason}")]
    UnsafeTarget {
        module_id: String,
        target_path: String,
        reason: String,
    },

    #[error("module {module_id}: cannot read template {}: {source}", path.display())]
    Template {
        module_id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("module {module_id}: writing '{target_path}' failed: {source}")]
    Write {
        module_id: String,
        target_path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("module {module_id}: baseline update failed: {message}")]
    Baseline { module_id: String, message: String },
}

impl InstallError {
    #[must_use]
    pub fn failed(module_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            module_id: module_id.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unsafe_target(
        module_id: impl Into<String>,
        target_path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnsafeTarget {
            module_id: module_id.into(),
            target_path: target_path.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn write(
        module_id: impl Into<String>,
        target_path: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Write {
            module_id: module_id.into(),
            target_path: target_path.into(),
            source,
        }
    }
}

/// A fragment that was not applied because the file on disk was edited
/// since the module last generated it. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("module {module_id}: '{target_path}' was modified locally; proposed content not applied")]
pub struct MergeConflict {
    pub module_id: String,
    pub target_path: String,
    /// Hash of what the module generated last time, if it ever did.
    pub baseline_hash: Option<String>,
    pub current_hash: String,
    /// File content left untouched on disk.
    pub existing: String,
    /// Content the module wanted to write.
    pub proposed: String,
}

/// Engine-level failures that abort a whole run.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Catalog(#[from] modsmith_catalog::Error),

    #[error(transparent)]
    Ledger(#[from] modsmith_ledger::Error),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl modsmith_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

modsmith_common::impl_context!();
