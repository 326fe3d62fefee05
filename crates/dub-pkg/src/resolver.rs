//! Generic backtracking dependency resolution.
//!
//! The search is parameterized over a provider that enumerates candidate
//! configurations per package and the child constraints a chosen
//! configuration implies. The project-level driver (see `project`)
//! instantiates it with `Dependency` as the configuration type; the
//! machinery itself only assumes candidates can be matched against
//! constraints.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::trace;

use crate::manager::ManagerError;
use crate::package::PackageError;
use crate::supplier::SupplierError;

/// How strongly an edge requires its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyType {
    /// Must be satisfied.
    Required,
    /// Optional, selected by default unless previously deselected.
    OptionalDefault,
    /// Optional, only selected when an existing selection pins it.
    Optional,
}

/// A chosen configuration for a package.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode<C> {
    pub pack: String,
    pub config: C,
}

/// A constraint edge towards a package.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNodes<C> {
    pub pack: String,
    pub configs: C,
    pub dep_type: DependencyType,
}

/// One recorded constraint, for conflict reporting.
#[derive(Debug, Clone)]
pub struct ConstraintSource {
    /// The package imposing the constraint.
    pub parent: String,
    /// Rendered constraint specification.
    pub constraint: String,
}

impl fmt::Display for ConstraintSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (from {})", self.constraint, self.parent)
    }
}

fn format_frontier(frontier: &[ConstraintSource]) -> String {
    frontier
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n  ")
}

/// Errors produced during dependency resolution.
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("unresolvable dependency conflict for '{package}':\n  {}", format_frontier(.frontier))]
    UnresolvableConflict {
        package: String,
        frontier: Vec<ConstraintSource>,
    },

    #[error("unknown package '{0}'")]
    UnknownPackage(String),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Supplier(#[from] SupplierError),
}

/// Supplies the search with candidates and child constraints.
pub trait DependencyProvider {
    /// The configuration chosen per package (a version, branch or path).
    type Config: Clone + PartialEq + fmt::Debug + fmt::Display;

    /// The ordered candidate set for a package: best candidate first.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPackage` when nothing is known about the package.
    fn all_candidates(&mut self, pack: &str) -> Result<Vec<Self::Config>, ResolverError>;

    /// Candidates forced by the constraint itself (e.g. a path
    /// dependency); `None` defers to `all_candidates`.
    ///
    /// # Errors
    ///
    /// Propagates provider failures.
    fn specific_candidates(
        &mut self,
        pack: &str,
        constraint: &Self::Config,
    ) -> Result<Option<Vec<Self::Config>>, ResolverError>;

    /// The constraint edges a chosen configuration implies.
    ///
    /// # Errors
    ///
    /// Propagates provider failures (e.g. a recipe that cannot be
    /// loaded).
    fn children(
        &mut self,
        node: &TreeNode<Self::Config>,
    ) -> Result<Vec<TreeNodes<Self::Config>>, ResolverError>;

    /// Tests whether a candidate satisfies a constraint.
    fn matches(&self, constraint: &Self::Config, candidate: &Self::Config) -> bool;
}

/// An edge scheduled for satisfaction, with the ancestor chain that led
/// to it (used for cycle detection and conflict reporting).
struct Edge<C> {
    chain: Vec<String>,
    nodes: TreeNodes<C>,
}

struct Search<'a, P: DependencyProvider> {
    provider: &'a mut P,
    assignments: BTreeMap<String, P::Config>,
    imposed: BTreeMap<String, Vec<ConstraintSource>>,
}

/// Resolves a configuration per package reachable from `root`.
///
/// The root's own configuration is fixed. The result maps every reached
/// package (including the root) to its chosen configuration.
///
/// # Errors
///
/// Returns `DependencyCycle` when expansion revisits a package on the
/// active chain, and `UnresolvableConflict` when no assignment satisfies
/// every constraint.
pub fn resolve<P: DependencyProvider>(
    provider: &mut P,
    root: TreeNode<P::Config>,
) -> Result<BTreeMap<String, P::Config>, ResolverError> {
    let mut search = Search {
        provider,
        assignments: BTreeMap::new(),
        imposed: BTreeMap::new(),
    };
    search.assignments.insert(root.pack.clone(), root.config.clone());
    let children = search.provider.children(&root)?;
    let queue: Vec<Edge<P::Config>> = children
        .into_iter()
        .map(|nodes| Edge {
            chain: vec![root.pack.clone()],
            nodes,
        })
        .collect();
    search.satisfy(&queue)?;
    Ok(search.assignments)
}

impl<P: DependencyProvider> Search<'_, P> {
    fn record(&mut self, edge: &Edge<P::Config>) {
        let parent = edge.chain.last().cloned().unwrap_or_default();
        self.imposed
            .entry(edge.nodes.pack.clone())
            .or_default()
            .push(ConstraintSource {
                parent,
                constraint: edge.nodes.configs.to_string(),
            });
    }

    fn conflict(&self, pack: &str) -> ResolverError {
        ResolverError::UnresolvableConflict {
            package: pack.to_string(),
            frontier: self.imposed.get(pack).cloned().unwrap_or_default(),
        }
    }

    fn satisfy(&mut self, queue: &[Edge<P::Config>]) -> Result<(), ResolverError> {
        let Some((edge, rest)) = queue.split_first() else {
            return Ok(());
        };
        let pack = &edge.nodes.pack;

        if edge.chain.iter().any(|p| p == pack) {
            let start = edge.chain.iter().position(|p| p == pack).unwrap_or(0);
            let mut cycle: Vec<String> = edge.chain[start..].to_vec();
            cycle.push(pack.clone());
            return Err(ResolverError::DependencyCycle(cycle));
        }

        self.record(edge);

        if let Some(assigned) = self.assignments.get(pack).cloned() {
            if self.provider.matches(&edge.nodes.configs, &assigned) {
                return self.satisfy(rest);
            }
            trace!(%pack, "assigned configuration violates a later constraint");
            return Err(self.conflict(pack));
        }

        let candidates = match self
            .provider
            .specific_candidates(pack, &edge.nodes.configs)?
        {
            Some(specific) => specific,
            None => match self.provider.all_candidates(pack) {
                Ok(all) => all,
                Err(ResolverError::UnknownPackage(_))
                    if edge.nodes.dep_type != DependencyType::Required =>
                {
                    // missing optional dependencies never fail
                    return self.satisfy(rest);
                }
                Err(e) => return Err(e),
            },
        };
        let viable: Vec<P::Config> = candidates
            .into_iter()
            .filter(|c| self.provider.matches(&edge.nodes.configs, c))
            .collect();

        if viable.is_empty() {
            if edge.nodes.dep_type != DependencyType::Required {
                return self.satisfy(rest);
            }
            return Err(self.conflict(pack));
        }

        let mut last_error = None;
        for candidate in viable {
            let snapshot = self.assignments.clone();
            self.assignments.insert(pack.clone(), candidate.clone());

            let node = TreeNode {
                pack: pack.clone(),
                config: candidate,
            };
            let attempt = self.provider.children(&node).and_then(|children| {
                let mut chain = edge.chain.clone();
                chain.push(pack.clone());
                let mut next: Vec<Edge<P::Config>> = children
                    .into_iter()
                    .map(|nodes| Edge {
                        chain: chain.clone(),
                        nodes,
                    })
                    .collect();
                next.extend(rest.iter().map(|e| Edge {
                    chain: e.chain.clone(),
                    nodes: e.nodes.clone(),
                }));
                self.satisfy(&next)
            });
            match attempt {
                Ok(()) => return Ok(()),
                Err(e @ ResolverError::DependencyCycle(_)) => return Err(e),
                Err(e) => {
                    self.assignments = snapshot;
                    last_error = Some(e);
                }
            }
        }

        // an optional edge whose candidates all fail is dropped rather
        // than failing the resolution
        if edge.nodes.dep_type != DependencyType::Required {
            return self.satisfy(rest);
        }
        Err(last_error.unwrap_or_else(|| self.conflict(pack)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A toy provider: candidates are plain version strings, constraints
    /// are `|`-separated allow lists (or `*`).
    struct Toy {
        candidates: BTreeMap<&'static str, Vec<&'static str>>,
        children: BTreeMap<(String, String), Vec<TreeNodes<String>>>,
    }

    fn keyed(
        entries: impl IntoIterator<Item = ((&'static str, &'static str), Vec<TreeNodes<String>>)>,
    ) -> BTreeMap<(String, String), Vec<TreeNodes<String>>> {
        entries
            .into_iter()
            .map(|((p, c), v)| ((p.to_string(), c.to_string()), v))
            .collect()
    }

    fn edge(pack: &str, allowed: &str) -> TreeNodes<String> {
        TreeNodes {
            pack: pack.to_string(),
            configs: allowed.to_string(),
            dep_type: DependencyType::Required,
        }
    }

    impl DependencyProvider for Toy {
        type Config = String;

        fn all_candidates(&mut self, pack: &str) -> Result<Vec<String>, ResolverError> {
            self.candidates
                .get(pack)
                .map(|v| v.iter().map(ToString::to_string).collect())
                .ok_or_else(|| ResolverError::UnknownPackage(pack.to_string()))
        }

        fn specific_candidates(
            &mut self,
            _pack: &str,
            _constraint: &String,
        ) -> Result<Option<Vec<String>>, ResolverError> {
            Ok(None)
        }

        fn children(&mut self, node: &TreeNode<String>) -> Result<Vec<TreeNodes<String>>, ResolverError> {
            Ok(self
                .children
                .get(&(node.pack.clone(), node.config.clone()))
                .cloned()
                .unwrap_or_default())
        }

        fn matches(&self, constraint: &String, candidate: &String) -> bool {
            constraint == "*" || constraint.split('|').any(|c| c == candidate)
        }
    }

    fn root() -> TreeNode<String> {
        TreeNode {
            pack: "root".to_string(),
            config: "0".to_string(),
        }
    }

    #[test]
    fn picks_the_first_viable_candidate() {
        let mut toy = Toy {
            candidates: [("a", vec!["2", "1"])].into(),
            children: keyed([(("root", "0"), vec![edge("a", "*")])]),
        };
        let result = resolve(&mut toy, root()).unwrap();
        assert_eq!(result["a"], "2");
    }

    #[test]
    fn backtracks_on_transitive_conflicts() {
        // root -> a (any), root -> b (any); a@2 needs b@1, but b@2 is
        // preferred and conflicts, forcing b to 1
        let mut toy = Toy {
            candidates: [("a", vec!["2", "1"]), ("b", vec!["2", "1"])].into(),
            children: keyed([
                (("root", "0"), vec![edge("a", "*"), edge("b", "1")]),
                (("a", "2"), vec![edge("b", "1|2")]),
            ]),
        };
        let result = resolve(&mut toy, root()).unwrap();
        assert_eq!(result["a"], "2");
        assert_eq!(result["b"], "1");
    }

    #[test]
    fn earlier_choice_is_revised_when_needed() {
        // a@2 forces b@2 but root wants b@1, so a must fall back to 1
        let mut toy = Toy {
            candidates: [("a", vec!["2", "1"]), ("b", vec!["2", "1"])].into(),
            children: keyed([
                (("root", "0"), vec![edge("a", "*"), edge("b", "1")]),
                (("a", "2"), vec![edge("b", "2")]),
                (("a", "1"), vec![edge("b", "1|2")]),
            ]),
        };
        let result = resolve(&mut toy, root()).unwrap();
        assert_eq!(result["a"], "1");
        assert_eq!(result["b"], "1");
    }

    #[test]
    fn conflicting_constraints_are_reported() {
        let mut toy = Toy {
            candidates: [("a", vec!["1"]), ("b", vec!["1"])].into(),
            children: keyed([
                (("root", "0"), vec![edge("a", "1"), edge("b", "1")]),
                (("b", "1"), vec![edge("a", "2")]),
            ]),
        };
        let err = resolve(&mut toy, root()).unwrap_err();
        match err {
            ResolverError::UnresolvableConflict { package, frontier } => {
                assert_eq!(package, "a");
                assert!(frontier.iter().any(|c| c.parent == "root"));
                assert!(frontier.iter().any(|c| c.parent == "b"));
            }
            other => panic!("expected a conflict, got {other}"),
        }
    }

    #[test]
    fn cycles_are_detected() {
        let mut toy = Toy {
            candidates: [("a", vec!["1"]), ("b", vec!["1"])].into(),
            children: keyed([
                (("root", "0"), vec![edge("a", "*")]),
                (("a", "1"), vec![edge("b", "*")]),
                (("b", "1"), vec![edge("a", "*")]),
            ]),
        };
        match resolve(&mut toy, root()).unwrap_err() {
            ResolverError::DependencyCycle(cycle) => {
                assert_eq!(cycle, vec!["a", "b", "a"]);
            }
            other => panic!("expected a cycle, got {other}"),
        }
    }

    #[test]
    fn diamond_dependencies_are_not_cycles() {
        let mut toy = Toy {
            candidates: [("a", vec!["1"]), ("b", vec!["1"]), ("c", vec!["1"])].into(),
            children: keyed([
                (("root", "0"), vec![edge("a", "*"), edge("b", "*")]),
                (("a", "1"), vec![edge("c", "*")]),
                (("b", "1"), vec![edge("c", "1")]),
            ]),
        };
        let result = resolve(&mut toy, root()).unwrap();
        assert_eq!(result["c"], "1");
    }

    #[test]
    fn missing_optional_dependencies_are_skipped() {
        let mut optional = edge("ghost", "*");
        optional.dep_type = DependencyType::OptionalDefault;
        let mut toy = Toy {
            candidates: [("a", vec!["1"])].into(),
            children: keyed([(("root", "0"), vec![edge("a", "*"), optional])]),
        };
        let result = resolve(&mut toy, root()).unwrap();
        assert!(result.contains_key("a"));
        assert!(!result.contains_key("ghost"));
    }

    #[test]
    fn missing_required_dependencies_fail() {
        let mut toy = Toy {
            candidates: BTreeMap::new(),
            children: keyed([(("root", "0"), vec![edge("ghost", "*")])]),
        };
        assert!(matches!(
            resolve(&mut toy, root()),
            Err(ResolverError::UnknownPackage(_))
        ));
    }
}
