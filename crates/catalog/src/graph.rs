//! Dependency graph with a deterministic topological order.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
};

use tracing::debug;

use crate::{
    Result,
    error::{CycleError, ValidationError, Violation, ViolationKind},
    store::Catalog,
    types::ModuleDescriptor,
};

/// Acyclic module graph built from descriptors.
///
/// Nodes are indexed by declaration position. `order` is the install
/// sequence: Kahn's algorithm where, among modules whose dependencies are all
/// placed, the earliest-declared goes next.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    modules: Vec<ModuleDescriptor>,
    index: HashMap<String, usize>,
    /// `dependencies[i]`: nodes `i` depends on.
    dependencies: Vec<Vec<usize>>,
    /// `dependents[i]`: nodes depending on `i`.
    dependents: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Build the graph, rejecting unknown references, cycles, and target
    /// paths shared by modules that are not ordered relative to each other.
    pub fn build(modules: &[ModuleDescriptor]) -> Result<Self> {
        let index: HashMap<String, usize> = modules
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.clone(), i))
            .collect();

        let mut violations = Vec::new();
        let mut dependencies = vec![Vec::new(); modules.len()];
        let mut dependents = vec![Vec::new(); modules.len()];
        for (i, module) in modules.iter().enumerate() {
            for dep in &module.depends_on {
                match index.get(dep) {
                    Some(&j) => {
                        if !dependencies[i].contains(&j) {
                            dependencies[i].push(j);
                            dependents[j].push(i);
                        }
                    },
                    None => violations.push(Violation::new(
                        ViolationKind::UnknownDependency,
                        &module.id,
                        format!("depends on unknown module '{dep}'"),
                    )),
                }
            }
        }
        if !violations.is_empty() {
            return Err(ValidationError { violations }.into());
        }

        let order = topological_order(modules, &dependencies, &dependents)?;

        let graph = Self {
            modules: modules.to_vec(),
            index,
            dependencies,
            dependents,
            order,
        };
        graph.check_shared_targets()?;

        debug!(modules = graph.modules.len(), "built dependency graph");
        Ok(graph)
    }

    pub fn from_catalog(catalog: &Catalog) -> Result<Self> {
        Self::build(catalog.modules())
    }

    /// Descriptors in install order.
    pub fn order(&self) -> impl Iterator<Item = &ModuleDescriptor> + '_ {
        self.order.iter().map(|&i| &self.modules[i])
    }

    /// Ids in install order.
    pub fn order_ids(&self) -> Vec<String> {
        self.order().map(|m| m.id.clone()).collect()
    }

    /// Descriptors in declaration order.
    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    pub fn get(&self, id: &str) -> Option<&ModuleDescriptor> {
        self.index.get(id).map(|&i| &self.modules[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Direct dependencies of `id`, in declaration order of the descriptor.
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| {
                self.dependencies[i]
                    .iter()
                    .map(|&j| self.modules[j].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Modules that directly depend on `id`.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| {
                self.dependents[i]
                    .iter()
                    .map(|&j| self.modules[j].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `from` depends on `to`, directly or transitively.
    pub fn depends_on(&self, from: &str, to: &str) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&a), Some(&b)) => self.reaches(a, b),
            _ => false,
        }
    }

    /// Every module `id` depends on, transitively, in install order.
    pub fn ancestors(&self, id: &str) -> Vec<&str> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut marked = vec![false; self.modules.len()];
        let mut stack = self.dependencies[start].clone();
        while let Some(n) = stack.pop() {
            if !marked[n] {
                marked[n] = true;
                stack.extend(&self.dependencies[n]);
            }
        }
        self.order
            .iter()
            .filter(|&&i| marked[i])
            .map(|&i| self.modules[i].id.as_str())
            .collect()
    }

    /// Restrict the graph to `ids`, which must be closed under dependencies.
    pub fn subgraph(&self, ids: &[String]) -> Result<Self> {
        let keep: Vec<ModuleDescriptor> = self
            .modules
            .iter()
            .filter(|m| ids.contains(&m.id))
            .cloned()
            .collect();
        Self::build(&keep)
    }

    fn reaches(&self, from: usize, to: usize) -> bool {
        reaches(&self.dependencies, from, to)
    }

    /// Two modules may declare the same target path only if one of them
    /// depends on the other, so their writes are serialized by the order.
    fn check_shared_targets(&self) -> Result<()> {
        let violations = shared_target_violations(&self.modules);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations }.into())
        }
    }
}

fn reaches(dependencies: &[Vec<usize>], from: usize, to: usize) -> bool {
    let mut visited = vec![false; dependencies.len()];
    let mut stack = vec![from];
    while let Some(n) = stack.pop() {
        for &dep in &dependencies[n] {
            if dep == to {
                return true;
            }
            if !visited[dep] {
                visited[dep] = true;
                stack.push(dep);
            }
        }
    }
    false
}

/// Target paths declared by two modules with no dependency path between
/// them in either direction.
///
/// Only dependencies naming a known module count as edges, so this works on
/// catalogs that have other violations too.
pub(crate) fn shared_target_violations(modules: &[ModuleDescriptor]) -> Vec<Violation> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, module) in modules.iter().enumerate() {
        index.entry(module.id.as_str()).or_insert(i);
    }
    let dependencies: Vec<Vec<usize>> = modules
        .iter()
        .map(|m| {
            m.depends_on
                .iter()
                .filter_map(|dep| index.get(dep.as_str()).copied())
                .collect()
        })
        .collect();

    let mut owners: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, module) in modules.iter().enumerate() {
        for target in &module.targets {
            owners.entry(target.path.as_str()).or_default().push(i);
        }
    }

    let mut violations = Vec::new();
    for (i, module) in modules.iter().enumerate() {
        for target in &module.targets {
            let Some(list) = owners.get(target.path.as_str()) else {
                continue;
            };
            for &j in list.iter().filter(|&&j| j > i) {
                // duplicate ids are reported on their own
                if modules[j].id == module.id {
                    continue;
                }
                if !reaches(&dependencies, i, j) && !reaches(&dependencies, j, i) {
                    violations.push(Violation::new(
                        ViolationKind::SharedTarget,
                        &module.id,
                        format!(
                            "target '{}' is also declared by unrelated module '{}'",
                            target.path, modules[j].id
                        ),
                    ));
                }
            }
        }
    }
    violations
}

fn topological_order(
    modules: &[ModuleDescriptor],
    dependencies: &[Vec<usize>],
    dependents: &[Vec<usize>],
) -> std::result::Result<Vec<usize>, CycleError> {
    let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(modules.len());
    while let Some(Reverse(n)) = ready.pop() {
        order.push(n);
        for &dependent in &dependents[n] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() == modules.len() {
        return Ok(order);
    }

    let stuck = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d > 0)
        .map(|(i, _)| modules[i].id.clone())
        .collect();
    Err(CycleError { modules: stuck })
}
