//! Task dependency graph derived from a plan.
//!
//! Expands track structure into task-level edges: explicit `depends_on`,
//! sequential order inside non-parallel tracks, and track-to-track
//! dependencies (every task of a dependent track waits for every task of the
//! tracks it depends on). Cycles are rejected here, before any workflow is
//! created.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};
use trinity_models::error::Result;
use trinity_models::{Plan, TaskSpec, TrinityError};

pub struct TaskGraph {
    tasks: HashMap<String, TaskSpec>,
    dependencies: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
    /// Topological order; also the deterministic tie-break order.
    topo_order: Vec<String>,
}

impl TaskGraph {
    pub fn from_plan(plan: &Plan) -> Result<Self> {
        plan.validate().map_err(|detail| TrinityError::TaskFailed {
            task_id: plan.id.clone(),
            detail,
        })?;

        let mut tasks = HashMap::new();
        let mut dependencies: HashMap<String, HashSet<String>> = HashMap::new();
        let mut track_tasks: HashMap<&str, Vec<String>> = HashMap::new();

        for track in &plan.tracks {
            let mut previous: Option<String> = None;
            for task in &track.tasks {
                let deps = dependencies.entry(task.id.clone()).or_default();
                deps.extend(task.depends_on.iter().cloned());
                // Listed order is execution order inside a non-parallel track.
                if !track.parallel
                    && let Some(prev) = &previous
                {
                    deps.insert(prev.clone());
                }
                previous = Some(task.id.clone());
                track_tasks
                    .entry(track.name.as_str())
                    .or_default()
                    .push(task.id.clone());
                tasks.insert(task.id.clone(), task.clone());
            }
        }

        for track in &plan.tracks {
            for dep_track in &track.depends_on {
                let upstream = track_tasks.get(dep_track.as_str()).cloned().unwrap_or_default();
                for task in &track.tasks {
                    dependencies
                        .entry(task.id.clone())
                        .or_default()
                        .extend(upstream.iter().cloned());
                }
            }
        }

        // Cycle rejection via toposort over the expanded edges.
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
        for id in tasks.keys() {
            nodes.insert(id.as_str(), graph.add_node(id.as_str()));
        }
        for (task, deps) in &dependencies {
            for dep in deps {
                graph.add_edge(nodes[dep.as_str()], nodes[task.as_str()], ());
            }
        }
        let topo = toposort(&graph, None).map_err(|cycle| {
            TrinityError::CycleDetected(graph[cycle.node_id()].to_string())
        })?;

        // Stable order: toposort position, then plan listing order for ties
        // is already implied by insertion; keep toposort output as-is.
        let topo_order: Vec<String> = topo.into_iter().map(|n| graph[n].to_string()).collect();

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for (task, deps) in &dependencies {
            for dep in deps {
                dependents.entry(dep.clone()).or_default().push(task.clone());
            }
        }
        for list in dependents.values_mut() {
            list.sort();
        }

        let dependencies = dependencies
            .into_iter()
            .map(|(task, deps)| {
                let mut deps: Vec<String> = deps.into_iter().collect();
                deps.sort();
                (task, deps)
            })
            .collect();

        Ok(Self {
            tasks,
            dependencies,
            dependents,
            topo_order,
        })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.get(id)
    }

    pub fn dependencies(&self, id: &str) -> &[String] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn topo_order(&self) -> &[String] {
        &self.topo_order
    }

    /// Transitive dependents of a task (its dependency subtree downstream).
    pub fn descendants(&self, id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = self.dependents(id).iter().map(String::as_str).collect();
        while let Some(current) = stack.pop() {
            if seen.insert(current.to_string()) {
                stack.extend(self.dependents(current).iter().map(String::as_str));
            }
        }
        seen
    }
}
