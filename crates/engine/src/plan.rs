//! Pre-flight: everything that must hold before any module is dispatched.

use {
    modsmith_catalog::{
        Catalog, CatalogSource, DependencyGraph, DescriptorStore, Selection, select,
    },
    tracing::info,
};

use crate::{Result, params::DetectorRegistry};

/// A validated catalog and the graph of the modules a run will install.
#[derive(Debug, Clone)]
pub struct Plan {
    pub catalog: Catalog,
    /// Restricted to the selected modules and their dependencies.
    pub graph: DependencyGraph,
}

impl Plan {
    /// Load `source`, build the full graph, and narrow it to `selection`.
    ///
    /// Any catalog violation or cycle fails here, before anything runs.
    /// Auto-detect parameters must name a detector in `detectors`.
    pub fn prepare(
        source: impl Into<CatalogSource>,
        selection: &Selection,
        detectors: &DetectorRegistry,
    ) -> Result<Self> {
        let catalog = DescriptorStore::new()
            .with_detectors(detectors.names())
            .load(source)?;
        let full = DependencyGraph::from_catalog(&catalog)?;
        let selected = select(&full, selection)?;
        let graph = full.subgraph(&selected)?;
        info!(
            catalog = catalog.len(),
            selected = graph.len(),
            "plan ready"
        );
        Ok(Self { catalog, graph })
    }

    /// Install order.
    #[must_use]
    pub fn order(&self) -> Vec<String> {
        self.graph.order_ids()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        modsmith_catalog::{
            DefaultStrategy, Error as CatalogError, ModuleDescriptor, ParameterSpec, TargetDecl,
            ViolationKind,
        },
    };

    fn modules() -> Vec<ModuleDescriptor> {
        vec![
            ModuleDescriptor::new("foundation"),
            ModuleDescriptor::new("lang/python").with_dependency("foundation"),
            ModuleDescriptor::new("infra/docker").with_dependency("lang/python"),
            ModuleDescriptor::new("tools/lint"),
        ]
    }

    #[test]
    fn selection_pulls_in_dependencies() {
        let plan = Plan::prepare(
            modules(),
            &Selection::of(["infra/docker"]),
            &DetectorRegistry::with_builtins(),
        )
        .unwrap();
        assert_eq!(plan.order(), ["foundation", "lang/python", "infra/docker"]);
    }

    #[test]
    fn unknown_detector_fails_preflight() {
        let mut bad = modules();
        bad[3] = ModuleDescriptor::new("tools/lint").with_parameter(ParameterSpec::new(
            "config",
            DefaultStrategy::auto_detect("git-remote", &[]),
        ));
        let err = Plan::prepare(bad, &Selection::all(), &DetectorRegistry::with_builtins())
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Catalog(CatalogError::Validation(_))
        ));
    }

    #[test]
    fn preflight_reports_shared_targets_alongside_unknown_dependencies() {
        let err = Plan::prepare(
            vec![
                ModuleDescriptor::new("a")
                    .with_dependency("ghost")
                    .with_target(TargetDecl::new("x.cfg")),
                ModuleDescriptor::new("b").with_target(TargetDecl::new("x.cfg")),
            ],
            &Selection::all(),
            &DetectorRegistry::with_builtins(),
        )
        .unwrap_err();
        let crate::Error::Catalog(err) = err else {
            panic!("expected a catalog error");
        };
        let kinds: Vec<ViolationKind> = err.violations().iter().map(|v| v.kind).collect();
        assert_eq!(kinds, [ViolationKind::UnknownDependency, ViolationKind::SharedTarget]);
    }
}
