//! Installation engine: parameter resolution, three-way merge, and the
//! orchestrator that installs a catalog's modules in dependency order.
//!
//! A typical run: [`Plan::prepare`] a catalog, open a run on a
//! [`modsmith_ledger::Ledger`], then hand both to [`Orchestrator::run`].

pub mod baseline;
pub mod error;
pub mod installer;
pub mod merge;
pub mod orchestrator;
pub mod params;
pub mod plan;
pub mod report;
pub mod target;

pub use {
    baseline::BaselineStore,
    error::{Error, InstallError, MergeConflict, ParameterError, ParameterFailure, Result},
    installer::{InstallContext, Installer, TemplateInstaller},
    merge::{ConfigFragment, MergeResult, merge},
    orchestrator::{DEFAULT_WORKERS, Orchestrator},
    params::{
        BinDetector, Detector, DetectorRegistry, EnvDetector, MarkerFileDetector, Overrides,
        ParameterResolver, Prompter,
    },
    plan::Plan,
    report::{MergeRecord, ModuleReport, RunReport},
    target::{Merger, TargetTree},
};
