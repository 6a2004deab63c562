//! Dependency graph over a workflow's tasks.
//!
//! Built once per run. Construction rejects duplicate ids, dangling
//! dependencies and cycles, so a graph that exists is always a DAG.

use crate::task::Task;
use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;
use vigil_core::{CoreError, CoreResult, TaskId};

/// Validated task DAG with precomputed levels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    /// Task id -> declared position
    index: IndexMap<TaskId, usize>,
    /// Position -> task id
    ids: Vec<TaskId>,
    /// Position -> positions it depends on
    dependencies: Vec<IndexSet<usize>>,
    /// Position -> positions depending on it
    dependents: Vec<IndexSet<usize>>,
    /// Position -> level
    levels: Vec<usize>,
}

impl DependencyGraph {
    /// Build the graph for `tasks`
    ///
    /// # Errors
    ///
    /// - `InvalidInput` on duplicate ids or unknown dependencies
    /// - `CyclicDependency` if any cycle exists, including self-edges
    pub fn build(tasks: &[Task]) -> CoreResult<Self> {
        let mut index = IndexMap::with_capacity(tasks.len());
        for (pos, task) in tasks.iter().enumerate() {
            if index.insert(task.id.clone(), pos).is_some() {
                return Err(CoreError::invalid(
                    "tasks",
                    format!("duplicate task id {}", task.id),
                ));
            }
        }

        let mut dependencies = vec![IndexSet::new(); tasks.len()];
        let mut dependents = vec![IndexSet::new(); tasks.len()];
        for (pos, task) in tasks.iter().enumerate() {
            for dep in &task.dependencies {
                let Some(&dep_pos) = index.get(dep) else {
                    return Err(CoreError::invalid(
                        "dependencies",
                        format!("task {} depends on unknown task {}", task.id, dep),
                    ));
                };
                dependencies[pos].insert(dep_pos);
                dependents[dep_pos].insert(pos);
            }
        }

        let mut graph = Self {
            ids: tasks.iter().map(|t| t.id.clone()).collect(),
            index,
            dependencies,
            dependents,
            levels: vec![0; tasks.len()],
        };
        graph.compute_levels()?;
        Ok(graph)
    }

    /// Assign every node `1 + max(level(dep))` by peeling zero in-degree
    /// nodes; anything left over sits on or behind a cycle
    fn compute_levels(&mut self) -> CoreResult<()> {
        let mut pending: Vec<usize> = self.dependencies.iter().map(IndexSet::len).collect();
        let mut ready: VecDeque<usize> = (0..self.len()).filter(|&p| pending[p] == 0).collect();
        let mut processed = 0;

        while let Some(pos) = ready.pop_front() {
            processed += 1;
            let next = self.levels[pos] + 1;
            for &dependent in &self.dependents[pos] {
                self.levels[dependent] = self.levels[dependent].max(next);
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.push_back(dependent);
                }
            }
        }

        if processed == self.len() {
            return Ok(());
        }
        Err(CoreError::CyclicDependency {
            task_id: self.id_at(self.cycle_member(&pending)).to_string(),
        })
    }

    /// Walk unfinished dependencies from the first stuck node until one repeats
    fn cycle_member(&self, pending: &[usize]) -> usize {
        let mut pos = pending.iter().position(|&n| n > 0).unwrap_or(0);
        let mut seen = vec![false; self.len()];
        while !seen[pos] {
            seen[pos] = true;
            match self.dependencies[pos].iter().find(|&&d| pending[d] > 0) {
                Some(&dep) => pos = dep,
                None => break,
            }
        }
        pos
    }

    /// Number of tasks
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the graph has no tasks
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Declared position of a task
    #[must_use]
    pub fn position(&self, id: &TaskId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Task id at a declared position
    ///
    /// # Panics
    ///
    /// Panics if `pos` is out of range
    #[must_use]
    pub fn id_at(&self, pos: usize) -> &TaskId {
        &self.ids[pos]
    }

    /// Level of the task at `pos`
    #[must_use]
    pub fn level_of(&self, pos: usize) -> usize {
        self.levels[pos]
    }

    /// Positions grouped by level, each group in declared order
    #[must_use]
    pub fn levels(&self) -> Vec<Vec<usize>> {
        let depth = self.levels.iter().copied().max().map_or(0, |m| m + 1);
        let mut grouped = vec![Vec::new(); depth];
        for (pos, level) in self.levels.iter().enumerate() {
            grouped[*level].push(pos);
        }
        grouped
    }

    /// Positions the task at `pos` depends on
    #[must_use]
    pub fn dependencies(&self, pos: usize) -> &IndexSet<usize> {
        &self.dependencies[pos]
    }

    /// Positions that depend on the task at `pos`
    #[must_use]
    pub fn dependents(&self, pos: usize) -> &IndexSet<usize> {
        &self.dependents[pos]
    }

    /// A topological order that keeps declared order among independent tasks
    #[must_use]
    pub fn topological_order(&self) -> Vec<usize> {
        self.levels().into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Vec<Task> {
        vec![
            Task::new("a", "noop"),
            Task::new("b", "noop").depends_on("a"),
            Task::new("c", "noop").depends_on("a"),
            Task::new("d", "noop").depends_on("b").depends_on("c"),
        ]
    }

    #[test]
    fn test_levels_diamond() {
        let graph = DependencyGraph::build(&diamond()).unwrap();
        assert_eq!(graph.levels(), vec![vec![0], vec![1, 2], vec![3]]);
        assert_eq!(graph.level_of(3), 2);
        assert_eq!(graph.dependents(0).len(), 2);
    }

    #[test]
    fn test_levels_use_longest_path() {
        let tasks = vec![
            Task::new("x", "noop").depends_on("a").depends_on("c"),
            Task::new("a", "noop"),
            Task::new("b", "noop").depends_on("a"),
            Task::new("c", "noop").depends_on("b"),
        ];
        let graph = DependencyGraph::build(&tasks).unwrap();
        assert_eq!(graph.level_of(0), 3);
        assert_eq!(graph.topological_order(), vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_cycle_detected() {
        let tasks = vec![
            Task::new("a", "noop").depends_on("c"),
            Task::new("b", "noop").depends_on("a"),
            Task::new("c", "noop").depends_on("b"),
        ];
        let err = DependencyGraph::build(&tasks).unwrap_err();
        assert!(matches!(err, CoreError::CyclicDependency { .. }));
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let tasks = vec![Task::new("a", "noop").depends_on("a")];
        assert!(matches!(
            DependencyGraph::build(&tasks),
            Err(CoreError::CyclicDependency { task_id }) if task_id == "a"
        ));
    }

    #[test]
    fn test_unknown_dependency() {
        let tasks = vec![Task::new("a", "noop").depends_on("ghost")];
        assert!(matches!(
            DependencyGraph::build(&tasks),
            Err(CoreError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_duplicate_id() {
        let tasks = vec![Task::new("a", "noop"), Task::new("a", "noop")];
        assert!(matches!(
            DependencyGraph::build(&tasks),
            Err(CoreError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraph::build(&[]).unwrap();
        assert!(graph.is_empty());
        assert!(graph.levels().is_empty());
    }

    #[test]
    fn test_long_chain() {
        let mut tasks = vec![Task::new("t0", "noop")];
        for i in 1..50_000 {
            tasks.push(Task::new(format!("t{i}"), "noop").depends_on(format!("t{}", i - 1)));
        }
        let graph = DependencyGraph::build(&tasks).unwrap();
        assert_eq!(graph.level_of(49_999), 49_999);

        tasks[0] = Task::new("t0", "noop").depends_on("t49999");
        assert!(matches!(
            DependencyGraph::build(&tasks),
            Err(CoreError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_cycle_reported_on_cycle_not_downstream() {
        let tasks = vec![
            Task::new("tail", "noop").depends_on("b"),
            Task::new("a", "noop").depends_on("b"),
            Task::new("b", "noop").depends_on("a"),
        ];
        match DependencyGraph::build(&tasks) {
            Err(CoreError::CyclicDependency { task_id }) => {
                assert!(task_id == "a" || task_id == "b", "{task_id}");
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    fn random_dag(edges: &[Vec<usize>]) -> Vec<Task> {
        edges
            .iter()
            .enumerate()
            .map(|(i, deps)| {
                deps.iter()
                    .filter(|_| i > 0)
                    .fold(Task::new(format!("t{i}"), "noop"), |task, d| {
                        task.depends_on(format!("t{}", d % i))
                    })
            })
            .collect()
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn edge_lists() -> impl Strategy<Value = Vec<Vec<usize>>> {
            prop::collection::vec(prop::collection::vec(0usize..64, 0..4), 1..24)
        }

        proptest! {
            #[test]
            fn test_levels_respect_dependencies(edges in edge_lists()) {
                let tasks = random_dag(&edges);
                let graph = DependencyGraph::build(&tasks).unwrap();

                for pos in 0..graph.len() {
                    for &dep in graph.dependencies(pos) {
                        prop_assert!(graph.level_of(dep) < graph.level_of(pos));
                    }
                }

                let mut counts = vec![0usize; graph.len()];
                for (level, group) in graph.levels().iter().enumerate() {
                    for &pos in group {
                        prop_assert_eq!(graph.level_of(pos), level);
                        counts[pos] += 1;
                    }
                }
                prop_assert!(counts.iter().all(|&c| c == 1));
            }

            #[test]
            fn test_back_edge_makes_cycle(edges in edge_lists(), pick in 0usize..64) {
                let mut tasks = random_dag(&edges);
                let len = tasks.len();
                let from = pick % len;
                // chain from..=last, then last -> from closes the loop
                for i in from + 1..len {
                    let prev = tasks[i - 1].id.clone();
                    tasks[i] = tasks[i].clone().depends_on(prev);
                }
                let last = tasks[len - 1].id.clone();
                tasks[from] = tasks[from].clone().depends_on(last);

                prop_assert!(matches!(
                    DependencyGraph::build(&tasks),
                    Err(CoreError::CyclicDependency { .. })
                ), "expected CyclicDependency error");
            }
        }
    }
}
