//! Choosing which modules a run installs.

use std::collections::HashSet;

use crate::{
    Result,
    error::{ValidationError, Violation, ViolationKind},
    graph::DependencyGraph,
    types::ModuleStatus,
};

/// Which modules to install.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Explicitly requested modules. Empty means automatic selection.
    pub roots: Vec<String>,
    /// Let automatic selection pick `experimental` modules too.
    pub include_experimental: bool,
}

impl Selection {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn of<I, S>(roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            include_experimental: false,
        }
    }
}

/// Resolve a selection to the ids to install, in install order.
///
/// The result always includes the transitive dependencies of every chosen
/// module. A `planned` module anywhere in that closure is an error since it
/// has nothing to install yet.
pub fn select(graph: &DependencyGraph, selection: &Selection) -> Result<Vec<String>> {
    let mut violations = Vec::new();

    let roots: Vec<&str> = if selection.roots.is_empty() {
        graph
            .modules()
            .iter()
            .filter(|m| match m.status {
                ModuleStatus::Stable => true,
                ModuleStatus::Experimental => selection.include_experimental,
                ModuleStatus::Planned => false,
            })
            .map(|m| m.id.as_str())
            .collect()
    } else {
        for root in &selection.roots {
            if !graph.contains(root) {
                violations.push(Violation::new(
                    ViolationKind::UnknownModule,
                    root,
                    "requested module is not in the catalog",
                ));
            }
        }
        selection
            .roots
            .iter()
            .map(String::as_str)
            .filter(|r| graph.contains(r))
            .collect()
    };

    let mut chosen: HashSet<&str> = HashSet::new();
    for root in roots {
        chosen.insert(root);
        chosen.extend(graph.ancestors(root));
    }

    let ordered: Vec<String> = graph
        .order()
        .filter(|m| chosen.contains(m.id.as_str()))
        .map(|m| m.id.clone())
        .collect();

    for id in &ordered {
        if let Some(module) = graph.get(id)
            && module.status == ModuleStatus::Planned
        {
            let needed_by: Vec<&str> = ordered
                .iter()
                .filter(|other| graph.depends_on(other, id))
                .map(String::as_str)
                .collect();
            let message = if needed_by.is_empty() {
                "module is planned and cannot be installed".to_string()
            } else {
                format!(
                    "module is planned and cannot be installed (needed by {})",
                    needed_by.join(", ")
                )
            };
            violations.push(Violation::new(ViolationKind::PlannedModule, id, message));
        }
    }

    if violations.is_empty() {
        Ok(ordered)
    } else {
        Err(ValidationError { violations }.into())
    }
}
