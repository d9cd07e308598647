//! Output formatting for the contextcore CLI
//!
//! Every command renders as JSON, YAML or a colored table.

use clap::ValueEnum;
use colored::Colorize;
use contextcore_core::scheduler::{ExecutionPlan, PipelineDefinition};
use contextcore_span::{Attributes, SpanNode, SpanStatus, TraceSnapshot};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

use crate::error::CliError;

/// Output format options for CLI results
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
pub enum OutputFormat {
    /// Human-readable table format with colors
    #[default]
    Table,
    /// JSON format for machine processing
    Json,
    /// YAML format
    Yaml,
}

fn render_serialized<T: Serialize>(value: &T, format: OutputFormat) -> Result<bool, CliError> {
    let text = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)
            .map_err(|e| CliError::SerializationError(e.to_string()))?,
        OutputFormat::Yaml => serde_yaml::to_string(value)
            .map_err(|e| CliError::SerializationError(e.to_string()))?,
        OutputFormat::Table => return Ok(false),
    };
    println!("{}", text);
    Ok(true)
}

/// Result of planning a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanOutput {
    pub pipeline: String,
    /// Concurrency groups, empty when a cycle was found
    pub groups: Vec<Vec<String>>,
    /// Stages on the detected cycle, in traversal order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cycle: Vec<String>,
    /// Stages not marked required
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optional: Vec<String>,
}

impl PlanOutput {
    pub fn from_plan(definition: &PipelineDefinition, plan: &ExecutionPlan) -> Self {
        Self {
            pipeline: definition.name.clone(),
            groups: plan.groups.clone(),
            cycle: Vec::new(),
            optional: optional_stages(definition),
        }
    }

    pub fn from_cycle(definition: &PipelineDefinition, members: Vec<String>) -> Self {
        Self {
            pipeline: definition.name.clone(),
            groups: Vec::new(),
            cycle: members,
            optional: optional_stages(definition),
        }
    }

    pub fn render(&self, format: OutputFormat) -> Result<(), CliError> {
        if render_serialized(self, format)? {
            return Ok(());
        }

        let mut stdout = io::stdout();
        writeln!(stdout).ok();
        writeln!(stdout, "{}", format!("Pipeline: {}", self.pipeline).cyan().bold()).ok();
        writeln!(stdout, "{}", "=".repeat(60)).ok();

        if !self.cycle.is_empty() {
            let mut path = self.cycle.clone();
            path.push(self.cycle[0].clone());
            writeln!(stdout, "{} Dependency cycle: {}", "x".red(), path.join(" -> ").red()).ok();
            stdout.flush().ok();
            return Ok(());
        }

        for (index, group) in self.groups.iter().enumerate() {
            let stages: Vec<String> = group
                .iter()
                .map(|s| {
                    if self.optional.contains(s) {
                        format!("{} {}", s, "(optional)".dimmed())
                    } else {
                        s.clone()
                    }
                })
                .collect();
            writeln!(stdout, "  {} {}", format!("[{}]", index).blue(), stages.join(", ")).ok();
        }
        writeln!(stdout).ok();
        writeln!(
            stdout,
            "{} {} stage(s) in {} group(s)",
            "+".green(),
            self.groups.iter().map(Vec::len).sum::<usize>(),
            self.groups.len()
        )
        .ok();
        stdout.flush().ok();
        Ok(())
    }
}

fn optional_stages(definition: &PipelineDefinition) -> Vec<String> {
    definition
        .stages
        .iter()
        .filter(|s| !s.required)
        .map(|s| s.name.clone())
        .collect()
}

/// Result of a simulated run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationOutput {
    pub pipeline: String,
    pub success: bool,
    pub progress: f64,
    /// Stages never released because a predecessor failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked: Vec<String>,
    /// Items seen by the in-memory sink (absent when exporting)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exported_spans: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exported_events: Option<usize>,
    pub trace: TraceSnapshot,
}

impl SimulationOutput {
    pub fn render(&self, format: OutputFormat) -> Result<(), CliError> {
        if render_serialized(self, format)? {
            return Ok(());
        }

        let mut stdout = io::stdout();
        writeln!(stdout).ok();
        writeln!(
            stdout,
            "{}",
            format!("Simulation: {} ({})", self.pipeline, self.trace.trace_id)
                .cyan()
                .bold()
        )
        .ok();
        writeln!(stdout, "{}", "=".repeat(60)).ok();
        write_node(&mut stdout, &self.trace.root, "");
        writeln!(stdout).ok();

        if !self.blocked.is_empty() {
            writeln!(stdout, "{} Blocked: {}", "!".yellow(), self.blocked.join(", ")).ok();
        }
        let verdict = if self.success {
            "+ Run succeeded".green()
        } else {
            "x Run failed".red()
        };
        writeln!(stdout, "{} (progress {:.0}%)", verdict, self.progress * 100.0).ok();
        if let (Some(spans), Some(events)) = (self.exported_spans, self.exported_events) {
            writeln!(
                stdout,
                "Exported {} span(s), {} event(s)",
                spans.to_string().dimmed(),
                events.to_string().dimmed()
            )
            .ok();
        }
        stdout.flush().ok();
        Ok(())
    }
}

fn write_node(stdout: &mut io::Stdout, node: &SpanNode, prefix: &str) {
    let status = match node.span.status {
        SpanStatus::Ok => "ok".green(),
        SpanStatus::Error => "error".red(),
        SpanStatus::Unset => "unset".dimmed(),
    };
    let marker = if node.span.has_failed_child {
        " (failed child)".yellow().to_string()
    } else {
        String::new()
    };
    writeln!(
        stdout,
        "{}{} [{}] {:.0}%{}",
        prefix,
        node.span.name,
        status,
        node.span.progress * 100.0,
        marker
    )
    .ok();

    let child_prefix = format!("{}  ", prefix);
    for child in &node.children {
        write_node(stdout, child, &child_prefix);
    }
}

/// Physical attributes for one logical set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationOutput {
    pub kind: String,
    pub mode: String,
    pub attributes: Attributes,
}

impl TranslationOutput {
    pub fn render(&self, format: OutputFormat) -> Result<(), CliError> {
        if render_serialized(self, format)? {
            return Ok(());
        }

        let mut stdout = io::stdout();
        writeln!(
            stdout,
            "{}",
            format!("{} attributes ({} mode)", self.kind, self.mode)
                .cyan()
                .bold()
        )
        .ok();
        writeln!(stdout, "{}", "-".repeat(60)).ok();
        let width = self.attributes.keys().map(String::len).max().unwrap_or(0);
        for (key, value) in &self.attributes {
            writeln!(stdout, "  {}  {}", format!("{:width$}", key, width = width).blue(), value).ok();
        }
        stdout.flush().ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextcore_core::scheduler::{DependencyScheduler, StageDefinition};

    #[test]
    fn test_plan_output_marks_optional_stages() {
        let definition = PipelineDefinition::new("p")
            .stage(StageDefinition::new("a"))
            .stage(StageDefinition::new("b").after(["a"]).optional());
        let plan = DependencyScheduler::plan(&definition).unwrap();
        let output = PlanOutput::from_plan(&definition, &plan);

        assert_eq!(output.groups, vec![vec!["a"], vec!["b"]]);
        assert_eq!(output.optional, vec!["b"]);

        let json = serde_json::to_value(&output).unwrap();
        assert!(json.get("cycle").is_none());
    }
}
