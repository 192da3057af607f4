//! Dependency ordering for descriptor sets.
//!
//! Kahn's algorithm over the `depends_on` edges. Ready descriptors are drawn
//! from an ordered set, so ties break on the lexicographically smallest name
//! and the output is reproducible.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::descriptor::ResourceDescriptor;

/// Errors raised while ordering a descriptor set.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OrderError {
    /// Raised when the dependency graph contains a cycle.
    #[error("cyclic dependency between resources: {}", render_cycle(.resources))]
    CyclicDependency {
        /// Resources on the cycle, starting from the smallest name.
        resources: Vec<String>,
    },
    /// Raised when a descriptor depends on a name absent from the set.
    #[error("resource {resource} depends on unknown resource {dependency}")]
    UnknownDependency {
        /// Descriptor declaring the dependency.
        resource: String,
        /// Missing dependency name.
        dependency: String,
    },
    /// Raised when two descriptors share a name.
    #[error("resource name {name} is declared more than once")]
    DuplicateResource {
        /// Repeated name.
        name: String,
    },
}

fn render_cycle(resources: &[String]) -> String {
    let mut path = resources.join(" -> ");
    if let Some(first) = resources.first() {
        path.push_str(" -> ");
        path.push_str(first);
    }
    path
}

/// Descriptors in creation order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionOrder {
    steps: Vec<ResourceDescriptor>,
}

impl ExecutionOrder {
    /// Descriptors in creation order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ResourceDescriptor> {
        self.steps.iter()
    }

    /// Descriptors in teardown order (reverse of creation).
    pub fn teardown(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.steps.iter().rev()
    }

    /// Resource names in creation order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(ResourceDescriptor::name).collect()
    }

    /// Number of descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` when the order holds no descriptors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Looks a descriptor up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.steps.iter().find(|step| step.name() == name)
    }
}

/// Topologically sorts descriptor sets.
#[derive(Clone, Copy, Debug, Default)]
pub struct DependencyOrderer;

impl DependencyOrderer {
    /// Orders `descriptors` so each one follows everything it depends on.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::DuplicateResource`] when names repeat,
    /// [`OrderError::UnknownDependency`] when a dependency is missing from the
    /// set, and [`OrderError::CyclicDependency`] when the graph has a cycle.
    pub fn order(descriptors: Vec<ResourceDescriptor>) -> Result<ExecutionOrder, OrderError> {
        let mut by_name = BTreeMap::new();
        for descriptor in descriptors {
            let name = descriptor.name().to_owned();
            if by_name.insert(name.clone(), descriptor).is_some() {
                return Err(OrderError::DuplicateResource { name });
            }
        }

        let mut pending: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (name, descriptor) in &by_name {
            for dependency in descriptor.depends_on() {
                if !by_name.contains_key(dependency) {
                    return Err(OrderError::UnknownDependency {
                        resource: name.clone(),
                        dependency: dependency.clone(),
                    });
                }
                dependents
                    .entry(dependency.as_str())
                    .or_default()
                    .push(name.as_str());
            }
            pending.insert(
                name.as_str(),
                descriptor.depends_on().iter().map(String::as_str).collect(),
            );
        }

        let mut ready: BTreeSet<&str> = pending
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(name, _)| *name)
            .collect();
        let mut sorted = Vec::with_capacity(by_name.len());
        while let Some(next) = ready.pop_first() {
            pending.remove(next);
            sorted.push(next.to_owned());
            for dependent in dependents.get(next).into_iter().flatten() {
                if let Some(deps) = pending.get_mut(dependent) {
                    deps.remove(next);
                    if deps.is_empty() {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if !pending.is_empty() {
            return Err(OrderError::CyclicDependency {
                resources: find_cycle(&pending),
            });
        }

        let steps = sorted
            .iter()
            .filter_map(|name| by_name.remove(name))
            .collect();
        Ok(ExecutionOrder { steps })
    }
}

// Every node left in `pending` still waits on another pending node, so
// following the smallest unsatisfied dependency always closes a loop.
fn find_cycle(pending: &BTreeMap<&str, BTreeSet<&str>>) -> Vec<String> {
    let Some(start) = pending.keys().next().copied() else {
        return Vec::new();
    };
    let mut path: Vec<&str> = Vec::new();
    let mut current = start;
    loop {
        if let Some(position) = path.iter().position(|seen| *seen == current) {
            let mut cycle: Vec<String> = path
                .iter()
                .skip(position)
                .map(|name| (*name).to_owned())
                .collect();
            rotate_to_smallest(&mut cycle);
            return cycle;
        }
        path.push(current);
        match pending
            .get(current)
            .and_then(|deps| deps.iter().next().copied())
        {
            Some(next) => current = next,
            None => return path.iter().map(|name| (*name).to_owned()).collect(),
        }
    }
}

fn rotate_to_smallest(cycle: &mut [String]) {
    let smallest = cycle
        .iter()
        .enumerate()
        .min_by(|lhs, rhs| lhs.1.cmp(rhs.1))
        .map_or(0, |(index, _)| index);
    cycle.rotate_left(smallest);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ResourceDescriptor, ResourceKind};
    use rstest::rstest;

    fn group(name: &str, deps: &[&str]) -> ResourceDescriptor {
        deps.iter()
            .fold(
                ResourceDescriptor::builder(ResourceKind::ResourceGroup, name).location("westus"),
                |builder, dep| builder.depends_on(*dep),
            )
            .build()
            .unwrap_or_else(|err| panic!("descriptor {name} should build: {err}"))
    }

    fn position(order: &ExecutionOrder, name: &str) -> usize {
        order
            .names()
            .iter()
            .position(|candidate| *candidate == name)
            .unwrap_or_else(|| panic!("{name} missing from order"))
    }

    #[rstest]
    fn order_places_dependencies_first() {
        let set = vec![
            group("vm", &["nic", "storage"]),
            group("nic", &["vnet", "ip"]),
            group("vnet", &["rg"]),
            group("ip", &["rg"]),
            group("storage", &["rg"]),
            group("rg", &[]),
        ];
        let order = DependencyOrderer::order(set.clone()).expect("acyclic set orders");

        for descriptor in &set {
            for dep in descriptor.depends_on() {
                assert!(
                    position(&order, dep) < position(&order, descriptor.name()),
                    "{dep} should precede {}",
                    descriptor.name()
                );
            }
        }
        assert_eq!(
            order.names(),
            vec!["rg", "ip", "storage", "vnet", "nic", "vm"]
        );
    }

    #[rstest]
    fn order_is_stable_across_calls() {
        let set = vec![
            group("c", &["a"]),
            group("b", &["a"]),
            group("a", &[]),
            group("d", &[]),
        ];
        let first = DependencyOrderer::order(set.clone()).expect("first order");
        let second = DependencyOrderer::order(set.into_iter().rev().collect()).expect("second");
        assert_eq!(first.names(), vec!["a", "b", "c", "d"]);
        assert_eq!(first.names(), second.names());
    }

    #[rstest]
    fn teardown_reverses_creation_order() {
        let order = DependencyOrderer::order(vec![group("n", &["g"]), group("g", &[])])
            .expect("order");
        let teardown: Vec<&str> = order.teardown().map(ResourceDescriptor::name).collect();
        assert_eq!(teardown, vec!["n", "g"]);
    }

    #[rstest]
    fn two_node_cycle_names_both_resources() {
        let err = DependencyOrderer::order(vec![group("A", &["B"]), group("B", &["A"])])
            .expect_err("cycle should fail");
        assert_eq!(
            err,
            OrderError::CyclicDependency {
                resources: vec![String::from("A"), String::from("B")]
            }
        );
        assert_eq!(
            err.to_string(),
            "cyclic dependency between resources: A -> B -> A"
        );
    }

    #[rstest]
    fn cycle_report_excludes_resources_merely_downstream() {
        let err = DependencyOrderer::order(vec![
            group("a", &["z"]),
            group("x", &["y"]),
            group("y", &["z"]),
            group("z", &["y"]),
        ])
        .expect_err("cycle should fail");
        assert_eq!(
            err,
            OrderError::CyclicDependency {
                resources: vec![String::from("y"), String::from("z")]
            }
        );
    }

    #[rstest]
    fn unknown_dependency_is_reported() {
        let err = DependencyOrderer::order(vec![group("n", &["ghost"])])
            .expect_err("unknown dependency should fail");
        assert_eq!(
            err,
            OrderError::UnknownDependency {
                resource: String::from("n"),
                dependency: String::from("ghost"),
            }
        );
    }

    #[rstest]
    fn duplicate_names_are_rejected() {
        let err = DependencyOrderer::order(vec![group("g", &[]), group("g", &[])])
            .expect_err("duplicate should fail");
        assert_eq!(
            err,
            OrderError::DuplicateResource {
                name: String::from("g")
            }
        );
    }
}
