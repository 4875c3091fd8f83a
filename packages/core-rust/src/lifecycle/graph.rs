//! Dependency graph resolution.
//!
//! Resolution validates names and edges, then groups components into start
//! levels with Kahn's algorithm: every component of level `n` depends only on
//! components of levels `< n`. Inside a level, registration order is kept so
//! that start and stop sequences are deterministic.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::component::{Component, ComponentDescriptor};
use super::error::ResolveError;

/// Budget for each stop hook when rolling back a failed start.
pub const DEFAULT_ROLLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the graph is in its one-shot lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Resolved,
    Starting,
    Running,
    Stopping,
    Stopped,
}

pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) hooks: Option<Arc<dyn Component>>,
    /// Set once the start hook returned `Ok`; only such nodes are stopped.
    pub(crate) started: AtomicBool,
}

/// A validated, acyclic set of components with a fixed start order.
pub struct ComponentGraph {
    pub(crate) nodes: Vec<Node>,
    pub(crate) levels: Vec<Vec<usize>>,
    pub(crate) state: Mutex<GraphState>,
    pub(crate) rollback_timeout: Duration,
}

impl ComponentGraph {
    /// Validates the descriptors and computes start levels.
    ///
    /// No hook runs during resolution.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::DuplicateComponent`] for repeated names,
    /// [`ResolveError::MissingDependency`] for edges to unknown components,
    /// and [`ResolveError::CycleDetected`] (listing the components on or
    /// behind the cycle) when no topological order exists.
    pub fn resolve(descriptors: Vec<ComponentDescriptor>) -> Result<Self, ResolveError> {
        let mut index = HashMap::with_capacity(descriptors.len());
        for (i, descriptor) in descriptors.iter().enumerate() {
            if index.insert(descriptor.name.clone(), i).is_some() {
                return Err(ResolveError::DuplicateComponent {
                    name: descriptor.name.clone(),
                });
            }
        }

        // dependents[i] lists the nodes waiting on node i.
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); descriptors.len()];
        let mut pending: Vec<usize> = vec![0; descriptors.len()];
        for (i, descriptor) in descriptors.iter().enumerate() {
            let mut seen = HashSet::new();
            for dependency in &descriptor.depends_on {
                let Some(&dep) = index.get(dependency) else {
                    return Err(ResolveError::MissingDependency {
                        component: descriptor.name.clone(),
                        dependency: dependency.clone(),
                    });
                };
                if seen.insert(dep) {
                    dependents[dep].push(i);
                    pending[i] += 1;
                }
            }
        }

        let mut levels = Vec::new();
        let mut frontier: Vec<usize> = (0..descriptors.len())
            .filter(|&i| pending[i] == 0)
            .collect();
        let mut placed = 0;
        while !frontier.is_empty() {
            placed += frontier.len();
            let mut next = Vec::new();
            for &node in &frontier {
                for &dependent in &dependents[node] {
                    pending[dependent] -= 1;
                    if pending[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            next.sort_unstable();
            levels.push(std::mem::replace(&mut frontier, next));
        }

        if placed != descriptors.len() {
            let components = descriptors
                .iter()
                .enumerate()
                .filter(|(i, _)| pending[*i] > 0)
                .map(|(_, d)| d.name.clone())
                .collect();
            return Err(ResolveError::CycleDetected { components });
        }

        let nodes = descriptors
            .into_iter()
            .map(|d| Node {
                name: d.name,
                hooks: d.hooks,
                started: AtomicBool::new(false),
            })
            .collect();

        Ok(Self {
            nodes,
            levels,
            state: Mutex::new(GraphState::Resolved),
            rollback_timeout: DEFAULT_ROLLBACK_TIMEOUT,
        })
    }

    /// Overrides the per-component budget used when a failed start is rolled back.
    #[must_use]
    pub fn with_rollback_timeout(mut self, timeout: Duration) -> Self {
        self.rollback_timeout = timeout;
        self
    }

    /// Component names grouped by start level.
    #[must_use]
    pub fn levels(&self) -> Vec<Vec<&str>> {
        self.levels
            .iter()
            .map(|level| level.iter().map(|&i| self.nodes[i].name.as_str()).collect())
            .collect()
    }

    /// Component names in start order.
    #[must_use]
    pub fn start_order(&self) -> Vec<&str> {
        self.levels.iter().flatten().map(|&i| self.nodes[i].name.as_str()).collect()
    }

    #[must_use]
    pub fn state(&self) -> GraphState {
        *self.state.lock()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl std::fmt::Debug for ComponentGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentGraph")
            .field("levels", &self.levels())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
