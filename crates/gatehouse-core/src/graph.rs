//! Validated stage dependency graph.
//!
//! An edge `A -> B` means "B needs A": A must reach a terminal state before B
//! may start. The graph is validated once, when a [`PipelineDefinition`] is
//! turned into a [`StageGraph`]; a graph that exists is acyclic, every `needs`
//! entry names a defined stage and every `gate_inputs` entry is a predecessor.
//!
//! Ordering uses Kahn's algorithm with level tracking so that stages on the
//! same level can run concurrently.

use std::collections::{HashMap, HashSet, VecDeque};

use sha2::{Digest, Sha256};

use crate::domain::definition::{PipelineDefinition, StageDefinition};
use crate::domain::error::DefinitionError;

#[derive(Debug, Clone)]
pub struct StageGraph {
    definition: PipelineDefinition,
    index: HashMap<String, usize>,
    /// `stage -> stages it needs`
    upstream: Vec<Vec<usize>>,
    /// `stage -> stages that need it`
    downstream: Vec<Vec<usize>>,
    /// Stage indices in dependency order; ties keep definition order.
    order: Vec<usize>,
    /// Kahn wave of each stage.
    level: Vec<usize>,
}

impl StageGraph {
    /// Validate `definition` and build its graph.
    pub fn new(definition: PipelineDefinition) -> Result<Self, DefinitionError> {
        if definition.stages.is_empty() {
            return Err(DefinitionError::Empty);
        }

        let mut index = HashMap::with_capacity(definition.stages.len());
        for (i, stage) in definition.stages.iter().enumerate() {
            if !valid_stage_name(&stage.name) {
                return Err(DefinitionError::InvalidStageName(stage.name.clone()));
            }
            if index.insert(stage.name.clone(), i).is_some() {
                return Err(DefinitionError::DuplicateStage(stage.name.clone()));
            }
        }

        let n = definition.stages.len();
        let mut upstream = vec![Vec::new(); n];
        let mut downstream = vec![Vec::new(); n];
        for (i, stage) in definition.stages.iter().enumerate() {
            let mut seen = HashSet::new();
            for dep in &stage.needs {
                let &j = index
                    .get(dep)
                    .ok_or_else(|| DefinitionError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: dep.clone(),
                    })?;
                if seen.insert(j) {
                    upstream[i].push(j);
                    downstream[j].push(i);
                }
            }
            for input in &stage.gate_inputs {
                if !stage.needs.contains(input) {
                    return Err(DefinitionError::InvalidGateInput {
                        stage: stage.name.clone(),
                        input: input.clone(),
                    });
                }
            }
        }

        if let Some(artifact) = &definition.artifact_stage {
            if !index.contains_key(artifact) {
                return Err(DefinitionError::UnknownArtifactStage(artifact.clone()));
            }
        }

        // Kahn's algorithm with level tracking.
        let mut in_degree: Vec<usize> = upstream.iter().map(Vec::len).collect();
        let mut level = vec![0usize; n];
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(i) = queue.pop_front() {
            order.push(i);
            let mut next = Vec::new();
            for &d in &downstream[i] {
                in_degree[d] -= 1;
                level[d] = level[d].max(level[i] + 1);
                if in_degree[d] == 0 {
                    next.push(d);
                }
            }
            next.sort_unstable();
            queue.extend(next);
        }

        if order.len() != n {
            let stuck: HashSet<usize> = (0..n).filter(|&i| in_degree[i] > 0).collect();
            let stages = find_cycle(&upstream, &stuck)
                .into_iter()
                .map(|i| definition.stages[i].name.clone())
                .collect();
            return Err(DefinitionError::CyclicDependency { stages });
        }

        Ok(Self {
            definition,
            index,
            upstream,
            downstream,
            order,
            level,
        })
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn len(&self) -> usize {
        self.definition.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definition.stages.is_empty()
    }

    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.index.get(name).map(|&i| &self.definition.stages[i])
    }

    pub fn artifact_stage(&self) -> Option<&str> {
        self.definition.artifact_stage.as_deref()
    }

    /// Stages in dependency order: every stage after all of its predecessors.
    pub fn topological_order(&self) -> Vec<&StageDefinition> {
        self.order
            .iter()
            .map(|&i| &self.definition.stages[i])
            .collect()
    }

    /// Stages grouped by Kahn wave. Stages in one group share no edges.
    pub fn levels(&self) -> Vec<Vec<&str>> {
        let depth = self.level.iter().copied().max().unwrap_or(0);
        let mut levels = vec![Vec::new(); depth + 1];
        for &i in &self.order {
            levels[self.level[i]].push(self.definition.stages[i].name.as_str());
        }
        levels
    }

    /// Direct predecessors of `name`.
    pub fn predecessors(&self, name: &str) -> Vec<&str> {
        self.neighbours(name, &self.upstream)
    }

    /// Direct dependents of `name`.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.neighbours(name, &self.downstream)
    }

    /// Every stage reachable downstream of `name`, in dependency order.
    pub fn transitive_dependents(&self, name: &str) -> Vec<&str> {
        let Some(&start) = self.index.get(name) else {
            return Vec::new();
        };
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for &d in &self.downstream[current] {
                if visited.insert(d) {
                    queue.push_back(d);
                }
            }
        }
        self.order
            .iter()
            .filter(|&&i| visited.contains(&i))
            .map(|&i| self.definition.stages[i].name.as_str())
            .collect()
    }

    /// SHA-256 over the canonical JSON form of the definition.
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_vec(&self.definition).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }

    fn neighbours(&self, name: &str, edges: &[Vec<usize>]) -> Vec<&str> {
        self.index
            .get(name)
            .map(|&i| {
                edges[i]
                    .iter()
                    .map(|&j| self.definition.stages[j].name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn valid_stage_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// DFS over the nodes Kahn could not order; returns one cycle, closed
/// (first node repeated at the end).
fn find_cycle(upstream: &[Vec<usize>], stuck: &HashSet<usize>) -> Vec<usize> {
    let mut stuck_sorted: Vec<usize> = stuck.iter().copied().collect();
    stuck_sorted.sort_unstable();
    let Some(&start) = stuck_sorted.first() else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut on_path: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;
    // Every stuck node has at least one stuck predecessor, so this walk
    // must revisit a node within `stuck.len()` steps.
    loop {
        let Some(&next) = upstream[current].iter().find(|&&j| stuck.contains(&j)) else {
            return path;
        };
        if let Some(&pos) = on_path.get(&next) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(next);
            return cycle;
        }
        on_path.insert(next, path.len());
        path.push(next);
        current = next;
    }
}
