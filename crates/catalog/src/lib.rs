//! Module catalog: descriptor loading, validation, and the dependency graph.
//!
//! A catalog is an ordered list of module descriptors read from
//! `catalog.{toml,yaml,yml,json}` (or supplied in memory). Declaration order
//! matters: it breaks ties in the install order so an unchanged catalog
//! always produces the same sequence.

pub mod error;
pub mod graph;
pub mod parse;
pub mod select;
pub mod store;
pub mod types;

pub use {
    error::{CycleError, Error, Result, ValidationError, Violation, ViolationKind},
    graph::DependencyGraph,
    select::{Selection, select},
    store::{Catalog, CatalogSource, DescriptorStore},
    types::{DefaultStrategy, ModuleDescriptor, ModuleStatus, ParameterSpec, TargetDecl},
};
