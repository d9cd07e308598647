//! CLI command definitions for contextcore
//!
//! Pipeline definitions and guidance records are read from JSON, YAML or
//! TOML files here; the core only ever sees parsed values.

use clap::{Parser, Subcommand};
use contextcore_core::prelude::*;
use contextcore_core::{
    CoreMetrics, HttpSink, InMemorySink, QueuedExporter, RetryPolicy, TelemetrySink,
};
use contextcore_span::{AttributeValue, GateViolation};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::result::Result;
use std::sync::Arc;

use super::error::CliError;
use super::output::{OutputFormat, PlanOutput, SimulationOutput, TranslationOutput};
use super::ExitCode;

/// contextcore CLI
///
/// Plan pipeline definitions, dry-run them as traces and inspect how
/// logical attributes are emitted.
#[derive(Parser, Debug)]
#[command(name = "contextcore")]
#[command(about = "contextcore - agent telemetry and pipeline tracing tools", long_about = None)]
#[command(version)]
pub struct ContextCli {
    /// Output verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the concurrency groups of a pipeline, or the cycle preventing them
    Plan {
        /// Pipeline definition file (json, yaml, yml, toml)
        #[arg(short, long)]
        pipeline: PathBuf,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Dry-run a pipeline and print the resulting trace
    ///
    /// Stages run in plan order and succeed unless listed with --fail.
    Simulate {
        /// Pipeline definition file (json, yaml, yml, toml)
        #[arg(short, long)]
        pipeline: PathBuf,

        /// Guidance records in effect for the run
        #[arg(short, long)]
        guidance: Option<PathBuf>,

        /// Stages that close with error
        #[arg(long = "fail", value_name = "STAGE")]
        fail: Vec<String>,

        /// Attribute namespace mode; defaults to CONTEXTCORE_EMIT_MODE
        #[arg(long)]
        mode: Option<EmitMode>,

        /// Send spans and events to CONTEXTCORE_EXPORT_ENDPOINT
        #[arg(long)]
        export: bool,

        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },

    /// Show the physical attributes emitted for a logical attribute set
    Translate {
        /// Record kind (agent, evidence, insight, guidance, handoff, capability)
        #[arg(short, long)]
        kind: RecordKind,

        /// Attribute namespace mode
        #[arg(long, default_value = "dual")]
        mode: EmitMode,

        /// Logical attributes as key=value
        #[arg(long = "set", value_name = "KEY=VALUE", required = true)]
        set: Vec<String>,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

/// Execute the plan command
pub fn execute_plan(pipeline: PathBuf, format: OutputFormat) -> Result<ExitCode, CliError> {
    let definition: PipelineDefinition = load_file(&pipeline)?;

    match DependencyScheduler::plan(&definition) {
        Ok(plan) => {
            PlanOutput::from_plan(&definition, &plan).render(format)?;
            Ok(ExitCode::Success)
        }
        Err(CoreError::CycleDetected { members }) => {
            PlanOutput::from_cycle(&definition, members).render(format)?;
            Ok(ExitCode::CycleDetected)
        }
        Err(e) => Err(e.into()),
    }
}

/// Execute the simulate command
pub fn execute_simulate(
    pipeline: PathBuf,
    guidance: Option<PathBuf>,
    fail: Vec<String>,
    mode: Option<EmitMode>,
    export: bool,
    format: OutputFormat,
) -> Result<ExitCode, CliError> {
    let definition: PipelineDefinition = load_file(&pipeline)?;
    let guidance = match guidance {
        Some(path) => GuidanceSet::load(load_file::<Vec<Guidance>>(&path)?)?,
        None => GuidanceSet::default(),
    };

    let mut config = CoreConfig::from_env();
    if let Some(mode) = mode {
        config.emit_mode = mode;
    }

    let output = simulate(definition, guidance, &fail, &config, export)?;
    output.render(format)?;

    Ok(if output.success {
        ExitCode::Success
    } else {
        ExitCode::RunFailed
    })
}

/// Run `definition` to completion on a private runtime.
pub fn simulate(
    definition: PipelineDefinition,
    guidance: GuidanceSet,
    fail: &[String],
    config: &CoreConfig,
    export: bool,
) -> Result<SimulationOutput, CliError> {
    if let Some(unknown) = fail.iter().find(|s| definition.get(s).is_none()) {
        return Err(CliError::InvalidInput(format!(
            "--fail names unknown stage '{}'",
            unknown
        )));
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let memory = Arc::new(InMemorySink::new());
        let sink: Arc<dyn TelemetrySink> = if export {
            Arc::new(HttpSink::from_config(config).map_err(CoreError::from)?)
        } else {
            memory.clone()
        };
        let metrics = Arc::new(
            CoreMetrics::new().map_err(|e| CliError::InternalError(e.to_string()))?,
        );
        let exporter = Arc::new(QueuedExporter::spawn(
            sink,
            RetryPolicy::from_config(config),
            config.export_queue_size,
            Some(Arc::clone(&metrics)),
        ));

        let tracker = Arc::new(SpanTracker::with_hook(exporter.clone()));
        let emitter = RecordEmitter::new(
            Arc::clone(&tracker),
            DualNamespaceTranslator::from_config(config),
        );

        let pipeline_name = definition.name.clone();
        let run = PipelineRun::start(Arc::clone(&tracker), definition, guidance)?
            .with_metrics(Arc::clone(&metrics));
        let agent = Agent::new("contextcore-cli", run.trace_id().to_string(), AgentType::Automation);
        let envelope = EmissionEnvelope::for_agent(&agent, config.project_id.clone());

        loop {
            let ready = run.ready_stages()?;
            if ready.is_empty() {
                break;
            }
            for stage in ready {
                let span = run.start_stage(&stage)?;
                let failed = fail.contains(&stage);
                tracing::debug!(stage = %stage, failed = failed, "Simulating stage");

                let gate = if failed {
                    GateResult::fail(
                        format!("{}.simulated", stage),
                        vec![GateViolation::new("stage", "marked to fail")],
                    )
                } else {
                    GateResult::pass(format!("{}.simulated", stage))
                };
                emitter.emit_gate(span, &gate)?;

                if failed {
                    let insight = Insight::new(
                        InsightType::Blocker,
                        format!("Stage '{}' failed in simulation", stage),
                        1.0,
                    )?;
                    emitter.emit(span, &envelope.restamped(), &insight)?;
                }

                let status = if failed { SpanStatus::Error } else { SpanStatus::Ok };
                run.complete_stage(&stage, status)?;
            }
        }

        let blocked = run.blocked_stages()?;
        let snapshot = run.finish()?;
        exporter.shutdown().await;

        tracing::info!(
            pipeline = %pipeline_name,
            success = snapshot.success(),
            blocked = blocked.len(),
            "Simulation finished"
        );

        Ok::<_, CliError>(SimulationOutput {
            pipeline: pipeline_name,
            success: snapshot.success(),
            progress: snapshot.progress(),
            blocked,
            exported_spans: (!export).then(|| memory.spans().len()),
            exported_events: (!export).then(|| memory.events().len()),
            trace: snapshot,
        })
    })
}

/// Execute the translate command
pub fn execute_translate(
    kind: RecordKind,
    mode: EmitMode,
    set: Vec<String>,
    format: OutputFormat,
) -> Result<ExitCode, CliError> {
    let logical = parse_assignments(&set)?;
    let physical = DualNamespaceTranslator::new(mode).translate(kind, &logical);

    TranslationOutput {
        kind: kind.to_string(),
        mode: mode.to_string(),
        attributes: physical,
    }
    .render(format)?;
    Ok(ExitCode::Success)
}

/// Parse `key=value` pairs; values become bools, integers or floats when
/// they parse as such, strings otherwise.
pub fn parse_assignments(pairs: &[String]) -> Result<Attributes, CliError> {
    let mut attrs = Attributes::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| CliError::InvalidInput(format!("expected KEY=VALUE, got '{}'", pair)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::InvalidInput(format!("empty key in '{}'", pair)));
        }
        attrs.insert(key.to_string(), parse_value(value));
    }
    Ok(attrs)
}

fn parse_value(raw: &str) -> AttributeValue {
    if let Ok(b) = raw.parse::<bool>() {
        AttributeValue::Bool(b)
    } else if let Ok(i) = raw.parse::<i64>() {
        AttributeValue::Int(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        AttributeValue::Float(f)
    } else {
        AttributeValue::String(raw.to_string())
    }
}

/// Read and parse a file based on its extension
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CliError::FileError(format!("Failed to read '{}': {}", path.display(), e))
    })?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "json" => serde_json::from_str(&content)
            .map_err(|e| CliError::ParseError(format!("Invalid JSON: {}", e))),
        "yaml" | "yml" => serde_yaml::from_str(&content)
            .map_err(|e| CliError::ParseError(format!("Invalid YAML: {}", e))),
        "toml" => toml::from_str(&content)
            .map_err(|e| CliError::ParseError(format!("Invalid TOML: {}", e))),
        _ => Err(CliError::InvalidInput(format!(
            "Unsupported file format: '{}'. Supported formats: json, yaml, yml, toml",
            extension
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignments_types_values() {
        let attrs = parse_assignments(&[
            "handoff.capability_id=investigate_error".to_string(),
            "handoff.timeout_ms=500".to_string(),
            "insight.confidence=0.5".to_string(),
            "progress.tracked=false".to_string(),
        ])
        .unwrap();
        assert_eq!(attrs["handoff.capability_id"].as_str(), Some("investigate_error"));
        assert_eq!(attrs["handoff.timeout_ms"].as_i64(), Some(500));
        assert_eq!(attrs["insight.confidence"].as_f64(), Some(0.5));
        assert_eq!(attrs["progress.tracked"].as_bool(), Some(false));
    }

    #[test]
    fn test_parse_assignments_rejects_malformed() {
        assert!(parse_assignments(&["novalue".to_string()]).is_err());
        assert!(parse_assignments(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_translate() {
        let cli = ContextCli::parse_from([
            "contextcore",
            "translate",
            "--kind",
            "handoff",
            "--mode",
            "otel",
            "--set",
            "handoff.capability_id=x",
        ]);
        match cli.command {
            Commands::Translate { kind, mode, set, .. } => {
                assert_eq!(kind, RecordKind::Handoff);
                assert_eq!(mode, EmitMode::Otel);
                assert_eq!(set.len(), 1);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_simulate_rejects_unknown_fail_stage() {
        let definition = PipelineDefinition::new("p").stage(StageDefinition::new("a"));
        let err = simulate(
            definition,
            GuidanceSet::default(),
            &["ghost".to_string()],
            &CoreConfig::default(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, CliError::InvalidInput(_)));
    }
}
