//! Dependency scheduling for pipeline stages
//!
//! A pipeline definition arrives already parsed: stage names, their
//! `depends_on` lists and `required` flags. The scheduler turns it into
//! concurrency groups, where every stage in a group only depends on stages
//! in earlier groups, or reports the first cycle it finds.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CoreError, Result};

fn default_required() -> bool {
    true
}

/// One stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// A failed required stage fails the run
    #[serde(default = "default_required")]
    pub required: bool,
    /// Share of the parent's progress, default 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl StageDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            required: true,
            weight: None,
        }
    }

    pub fn after<I, S>(mut self, predecessors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on
            .extend(predecessors.into_iter().map(Into::into));
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn weighted(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// Stages of a pipeline in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    pub stages: Vec<StageDefinition>,
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn stage(mut self, stage: StageDefinition) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn get(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Sum of stage weights, an unweighted stage counting 1.
    pub fn total_weight(&self) -> f64 {
        self.stages.iter().map(|s| s.weight.unwrap_or(1.0)).sum()
    }

    /// Structural checks that do not need graph traversal.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: String, message: String| CoreError::validation("pipeline", field, message);

        if self.stages.is_empty() {
            return Err(invalid("stages".into(), "a pipeline needs at least one stage".into()));
        }

        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.name.trim().is_empty() {
                return Err(invalid(format!("stages[{}].name", i), "must be non-empty".into()));
            }
            if seen.insert(stage.name.as_str(), i).is_some() {
                return Err(invalid(
                    format!("stages[{}].name", i),
                    format!("duplicate stage '{}'", stage.name),
                ));
            }
            if let Some(weight) = stage.weight {
                if !weight.is_finite() || weight <= 0.0 {
                    return Err(invalid(
                        format!("stages[{}].weight", i),
                        format!("must be a positive number, got {}", weight),
                    ));
                }
            }
        }

        for stage in &self.stages {
            if let Some(unknown) = stage.depends_on.iter().find(|d| !seen.contains_key(d.as_str())) {
                return Err(invalid(
                    format!("stages[{}].depends_on", seen[stage.name.as_str()]),
                    format!("'{}' depends on unknown stage '{}'", stage.name, unknown),
                ));
            }
        }
        Ok(())
    }
}

/// Concurrency groups in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub groups: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Flattened topological order.
    pub fn order(&self) -> Vec<&str> {
        self.groups
            .iter()
            .flat_map(|g| g.iter().map(String::as_str))
            .collect()
    }

    /// Index of the group a stage belongs to.
    pub fn group_of(&self, stage: &str) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| g.iter().any(|s| s == stage))
    }

    pub fn stage_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Unvisited,
    InProgress,
    Done,
}

/// Orders stages from their declared dependencies.
pub struct DependencyScheduler;

impl DependencyScheduler {
    /// Build concurrency groups, or fail with the members of a cycle.
    ///
    /// A stage's group is one past the deepest group among its predecessors.
    /// Within a group stages keep declaration order. No partial plan is
    /// produced when a cycle exists.
    pub fn plan(definition: &PipelineDefinition) -> Result<ExecutionPlan> {
        definition.validate()?;

        let index: HashMap<&str, usize> = definition
            .stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();
        let edges: Vec<Vec<usize>> = definition
            .stages
            .iter()
            .map(|s| s.depends_on.iter().map(|d| index[d.as_str()]).collect())
            .collect();

        let mut walk = Walk {
            edges: &edges,
            color: vec![Color::Unvisited; edges.len()],
            level: vec![0; edges.len()],
            path: Vec::new(),
        };
        for node in 0..edges.len() {
            if let Err(cycle) = walk.visit(node) {
                let members: Vec<String> = cycle
                    .into_iter()
                    .map(|i| definition.stages[i].name.clone())
                    .collect();
                tracing::warn!(
                    pipeline = %definition.name,
                    cycle = %members.join(" -> "),
                    "Dependency cycle detected"
                );
                return Err(CoreError::CycleDetected { members });
            }
        }

        let depth = walk.level.iter().copied().max().map_or(0, |d| d + 1);
        let mut groups = vec![Vec::new(); depth];
        for (i, stage) in definition.stages.iter().enumerate() {
            groups[walk.level[i]].push(stage.name.clone());
        }

        tracing::debug!(
            pipeline = %definition.name,
            stages = definition.stages.len(),
            groups = groups.len(),
            "Execution plan built"
        );
        Ok(ExecutionPlan { groups })
    }
}

/// Three-color depth-first traversal state.
struct Walk<'a> {
    edges: &'a [Vec<usize>],
    color: Vec<Color>,
    level: Vec<usize>,
    path: Vec<usize>,
}

impl Walk<'_> {
    /// Visit `node` and its predecessors; `Err` carries the cycle in path order.
    fn visit(&mut self, node: usize) -> std::result::Result<(), Vec<usize>> {
        match self.color[node] {
            Color::Done => return Ok(()),
            Color::InProgress => {
                let start = self.path.iter().position(|&n| n == node).unwrap_or(0);
                return Err(self.path[start..].to_vec());
            }
            Color::Unvisited => {}
        }

        self.color[node] = Color::InProgress;
        self.path.push(node);

        let mut level = 0;
        for &dep in &self.edges[node] {
            self.visit(dep)?;
            level = level.max(self.level[dep] + 1);
        }

        self.path.pop();
        self.color[node] = Color::Done;
        self.level[node] = level;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_shared_predecessor_groups() {
        let definition = PipelineDefinition::new("p")
            .stage(StageDefinition::new("A").after(["B"]))
            .stage(StageDefinition::new("B"))
            .stage(StageDefinition::new("C").after(["B"]));

        let plan = DependencyScheduler::plan(&definition).unwrap();
        assert_eq!(plan.groups, vec![vec!["B"], vec!["A", "C"]]);
        assert_eq!(plan.order(), vec!["B", "A", "C"]);
        assert_eq!(plan.group_of("C"), Some(1));
    }

    #[test]
    fn test_three_stage_cycle_names_every_member() {
        let definition = PipelineDefinition::new("p")
            .stage(StageDefinition::new("A").after(["B"]))
            .stage(StageDefinition::new("B").after(["C"]))
            .stage(StageDefinition::new("C").after(["A"]));

        match DependencyScheduler::plan(&definition).unwrap_err() {
            CoreError::CycleDetected { members } => {
                let mut sorted = members.clone();
                sorted.sort();
                assert_eq!(sorted, vec!["A", "B", "C"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_excludes_stages_leading_into_it() {
        let definition = PipelineDefinition::new("p")
            .stage(StageDefinition::new("entry").after(["x"]))
            .stage(StageDefinition::new("x").after(["y"]))
            .stage(StageDefinition::new("y").after(["x"]));

        match DependencyScheduler::plan(&definition).unwrap_err() {
            CoreError::CycleDetected { members } => assert_eq!(members, vec!["x", "y"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let definition = PipelineDefinition::new("p").stage(StageDefinition::new("A").after(["A"]));
        let err = DependencyScheduler::plan(&definition).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CycleDetected);
    }

    #[test]
    fn test_diamond() {
        let definition = PipelineDefinition::new("p")
            .stage(StageDefinition::new("ingest"))
            .stage(StageDefinition::new("clean").after(["ingest"]))
            .stage(StageDefinition::new("profile").after(["ingest"]))
            .stage(StageDefinition::new("report").after(["clean", "profile"]));

        let plan = DependencyScheduler::plan(&definition).unwrap();
        assert_eq!(
            plan.groups,
            vec![vec!["ingest"], vec!["clean", "profile"], vec!["report"]]
        );
    }

    #[test]
    fn test_validation_errors() {
        let unknown = PipelineDefinition::new("p").stage(StageDefinition::new("A").after(["ghost"]));
        let err = DependencyScheduler::plan(&unknown).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("ghost"));

        let duplicate = PipelineDefinition::new("p")
            .stage(StageDefinition::new("A"))
            .stage(StageDefinition::new("A"));
        assert!(DependencyScheduler::plan(&duplicate).is_err());

        let weight = PipelineDefinition::new("p").stage(StageDefinition::new("A").weighted(0.0));
        assert!(DependencyScheduler::plan(&weight).is_err());

        assert!(DependencyScheduler::plan(&PipelineDefinition::new("empty")).is_err());
    }

    #[test]
    fn test_stage_defaults_from_json() {
        let definition: PipelineDefinition = serde_json::from_str(
            r#"{"name": "p", "stages": [{"name": "a"}, {"name": "b", "depends_on": ["a"], "required": false}]}"#,
        )
        .unwrap();
        assert!(definition.stages[0].required);
        assert!(!definition.stages[1].required);
        assert_eq!(definition.stages[0].weight, None);
    }
}
