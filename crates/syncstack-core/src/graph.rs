//! Service dependency graph.
//!
//! Built from the active services of a stack. Construction rejects unknown
//! dependencies and cycles, so every `DependencyGraph` is a DAG and
//! [`DependencyGraph::layers`] always covers every service.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{CoreError, CoreResult};
use crate::types::ServiceDescriptor;

/// Acyclic graph of `service → dependencies`.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    deps: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

impl DependencyGraph {
    /// Build and validate the graph.
    pub fn build<'a>(
        services: impl IntoIterator<Item = &'a ServiceDescriptor>,
    ) -> CoreResult<Self> {
        let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for svc in services {
            if deps.insert(svc.name.clone(), svc.depends_on.clone()).is_some() {
                return Err(CoreError::Duplicate {
                    kind: "service",
                    name: svc.name.clone(),
                });
            }
        }

        let mut dependents: BTreeMap<String, BTreeSet<String>> =
            deps.keys().map(|k| (k.clone(), BTreeSet::new())).collect();
        for (service, service_deps) in &deps {
            for dep in service_deps {
                match dependents.get_mut(dep) {
                    Some(set) => {
                        set.insert(service.clone());
                    }
                    None => {
                        return Err(CoreError::UnknownDependency {
                            service: service.clone(),
                            dependency: dep.clone(),
                        });
                    }
                }
            }
        }

        let graph = Self { deps, dependents };
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_acyclic(&self) -> CoreResult<()> {
        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
        for start in self.deps.keys() {
            let mut path = Vec::new();
            self.visit(start, &mut marks, &mut path)?;
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        marks: &mut BTreeMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> CoreResult<()> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(node.to_string());
                return Err(CoreError::Cycle(cycle));
            }
            None => {}
        }

        marks.insert(node, Mark::Visiting);
        path.push(node);
        if let Some(deps) = self.deps.get(node) {
            for dep in deps {
                self.visit(dep, marks, path)?;
            }
        }
        path.pop();
        marks.insert(node, Mark::Done);
        Ok(())
    }

    /// All service names, sorted.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.deps.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    pub fn contains(&self, service: &str) -> bool {
        self.deps.contains_key(service)
    }

    /// Direct dependencies of `service`.
    pub fn dependencies(&self, service: &str) -> impl Iterator<Item = &str> {
        self.deps.get(service).into_iter().flatten().map(String::as_str)
    }

    /// Services that directly depend on `service`.
    pub fn dependents(&self, service: &str) -> impl Iterator<Item = &str> {
        self.dependents
            .get(service)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Every service that directly or indirectly depends on `service`.
    pub fn transitive_dependents(&self, service: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = self.dependents(service).collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next.to_string()) {
                queue.extend(self.dependents(next));
            }
        }
        seen
    }

    /// Kahn layering: every service in layer `n` only depends on services
    /// in layers `< n`, so all services of one layer may start concurrently.
    pub fn layers(&self) -> Vec<Vec<String>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .deps
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.len()))
            .collect();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let layer: Vec<String> = remaining
                .iter()
                .filter(|(_, pending)| **pending == 0)
                .map(|(name, _)| name.to_string())
                .collect();
            if layer.is_empty() {
                // Unreachable for a validated graph.
                break;
            }
            for name in &layer {
                remaining.remove(name.as_str());
                for dependent in self.dependents(name) {
                    if let Some(pending) = remaining.get_mut(dependent) {
                        *pending -= 1;
                    }
                }
            }
            layers.push(layer);
        }
        layers
    }

    /// Flattened [`Self::layers`].
    pub fn topological_order(&self) -> Vec<String> {
        self.layers().into_iter().flatten().collect()
    }
}
