use std::{fmt, path::PathBuf};

use thiserror::Error;

/// What kind of catalog inconsistency a [`Violation`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ViolationKind {
    InvalidId,
    DuplicateId,
    UnknownDependency,
    SelfDependency,
    DuplicateDependency,
    InvalidParameter,
    DuplicateParameter,
    InvalidTarget,
    DuplicateTarget,
    SharedTarget,
    UnknownModule,
    PlannedModule,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidId => "invalid-id",
            Self::DuplicateId => "duplicate-id",
            Self::UnknownDependency => "unknown-dependency",
            Self::SelfDependency => "self-dependency",
            Self::DuplicateDependency => "duplicate-dependency",
            Self::InvalidParameter => "invalid-parameter",
            Self::DuplicateParameter => "duplicate-parameter",
            Self::InvalidTarget => "invalid-target",
            Self::DuplicateTarget => "duplicate-target",
            Self::SharedTarget => "shared-target",
            Self::UnknownModule => "unknown-module",
            Self::PlannedModule => "planned-module",
        };
        f.write_str(s)
    }
}

/// A single problem found while validating a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    /// Id of the module the problem was found on.
    pub module: String,
    pub message: String,
}

impl Violation {
    #[must_use]
    pub fn new(kind: ViolationKind, module: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            module: module.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.module, self.message)
    }
}

/// Every violation found in one validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    #[must_use]
    pub fn has(&self, kind: ViolationKind) -> bool {
        self.violations.iter().any(|v| v.kind == kind)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "catalog has {} violation(s)", self.violations.len())?;
        for v in &self.violations {
            write!(f, "\n  {v}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// The dependency graph is not acyclic.
///
/// `modules` lists every module left after all dependency-free modules were
/// peeled off, in declaration order. That set contains each cycle in full.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle among modules: {}", modules.join(", "))]
pub struct CycleError {
    pub modules: Vec<String>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("unsupported catalog format: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    #[must_use]
    pub fn unsupported_format(path: impl Into<PathBuf>) -> Self {
        Self::UnsupportedFormat { path: path.into() }
    }

    #[must_use]
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// The violations carried by a validation failure, if this is one.
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Validation(e) => &e.violations,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
