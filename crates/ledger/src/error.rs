use thiserror::Error;

use crate::types::LedgerStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("invalid run id '{run_id}': use 1-128 chars of [A-Za-z0-9._-], not starting with '.'")]
    InvalidRunId { run_id: String },

    #[error("module not registered in this run: {module_id}")]
    UnknownModule { module_id: String },

    #[error("module {module_id}: cannot move from {from} to {to}")]
    InvalidTransition {
        module_id: String,
        from: LedgerStatus,
        to: LedgerStatus,
    },

    #[error("module {module_id}: dependency {dependency} is {status}, not complete")]
    DependencyNotSatisfied {
        module_id: String,
        dependency: String,
        status: String,
    },

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
    pub fn unknown_module(module_id: impl Into<String>) -> Self {
        Self::UnknownModule {
            module_id: module_id.into(),
        }
    }

    #[must_use]
    pub fn invalid_transition(
        module_id: impl Into<String>,
        from: LedgerStatus,
        to: LedgerStatus,
    ) -> Self {
        Self::InvalidTransition {
            module_id: module_id.into(),
            from,
            to,
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
