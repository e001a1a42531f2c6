//! dagflow - declarative DAG pipeline orchestration
//!
//! Compiles pipeline documents to normalized specs and executes compiled
//! specs against a scripted handler backend.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use dagflow::prelude::*;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dagflow", version, about = "Declarative DAG pipeline orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a pipeline document and emit the normalized compiled spec
    Compile {
        /// Path to the pipeline document
        #[arg(long)]
        pipeline: PathBuf,

        /// Expected pipeline name; fails if the document names another
        #[arg(long)]
        pipeline_name: Option<String>,

        /// Output path for the compiled spec ("-" for stdout)
        #[arg(long)]
        out: PathBuf,
    },

    /// Execute a compiled spec against a scripted handler backend
    Run {
        /// Path to the compiled spec
        #[arg(long)]
        spec: PathBuf,

        /// Scripted handler results, step name to canned outputs or error
        #[arg(long)]
        handlers: Option<PathBuf>,

        /// Parameter overrides as key=value
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Maximum number of concurrently executing steps
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Write the run report here instead of stdout
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

/// One scripted step result: canned outputs, or a failure message.
#[derive(Debug, Clone, Default, Deserialize)]
struct ScriptedStep {
    #[serde(default)]
    outputs: HashMap<String, PortValue>,
    #[serde(default)]
    error: Option<String>,
}

/// A handler backend driven by a JSON script keyed by step name.
///
/// Unscripted steps succeed with no outputs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
struct ScriptedBackend {
    steps: HashMap<String, ScriptedStep>,
}

#[async_trait]
impl StepHandler for ScriptedBackend {
    async fn invoke(&self, call: HandlerCall) -> Result<HandlerOutputs, HandlerFailure> {
        match self.steps.get(&call.step) {
            Some(ScriptedStep {
                error: Some(message),
                ..
            }) => Err(HandlerFailure::new(&call.step, message)),
            Some(scripted) => Ok(scripted.outputs.clone()),
            None => Ok(HandlerOutputs::new()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dagflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Compile {
            pipeline,
            pipeline_name,
            out,
        } => compile_command(&pipeline, pipeline_name.as_deref(), &out),
        Commands::Run {
            spec,
            handlers,
            params,
            max_concurrency,
            report,
        } => run_command(&spec, handlers.as_deref(), &params, max_concurrency, report.as_deref()).await,
    }
}

fn compile_command(pipeline_path: &Path, expected_name: Option<&str>, out: &Path) -> Result<()> {
    let doc = read_document(pipeline_path)?;

    if let Some(expected) = expected_name {
        if doc.name != expected {
            bail!(
                "pipeline '{expected}' not found in {}: document names '{}'",
                pipeline_path.display(),
                doc.name
            );
        }
    }

    let pipeline = dagflow::compile::rebuild(&doc)
        .with_context(|| format!("invalid pipeline document {}", pipeline_path.display()))?;
    let normalized = dagflow::compile::to_json_pretty(&dagflow::compile::compile(&pipeline))?;

    write_output(out, &normalized)?;
    Ok(())
}

async fn run_command(
    spec_path: &Path,
    handlers_path: Option<&Path>,
    params: &[String],
    max_concurrency: Option<usize>,
    report_path: Option<&Path>,
) -> Result<()> {
    let doc = read_document(spec_path)?;
    let pipeline = dagflow::compile::rebuild(&doc)
        .with_context(|| format!("invalid compiled spec {}", spec_path.display()))?;

    let overrides = parse_params(&pipeline, params)?;

    let backend: Arc<ScriptedBackend> = match handlers_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Arc::new(serde_json::from_str(&raw).with_context(|| {
                format!("malformed handler script {}", path.display())
            })?)
        }
        None => Arc::new(ScriptedBackend::default()),
    };
    let mut registry = HandlerRegistry::new();
    for step in pipeline.steps_in_order() {
        registry.register(&step.definition.handler_ref, backend.clone() as Arc<dyn StepHandler>);
    }

    let mut executor =
        Executor::new(Arc::new(registry)).with_event_sink(Arc::new(LoggingEventSink));
    if let Some(limit) = max_concurrency {
        executor = executor.with_max_concurrency(limit);
    }

    let run_report = executor.run(&pipeline, overrides).await?;
    let rendered = serde_json::to_string_pretty(&run_report)?;
    match report_path {
        Some(path) => write_output(path, &rendered)?,
        None => println!("{rendered}"),
    }

    if !run_report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn read_document(path: &Path) -> Result<PipelineDoc> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    dagflow::compile::from_json(&raw)
        .with_context(|| format!("malformed pipeline document {}", path.display()))
}

/// Parses `key=value` overrides using each parameter's declared type.
fn parse_params(pipeline: &Pipeline, params: &[String]) -> Result<HashMap<String, Value>> {
    let mut overrides = HashMap::new();
    for raw in params {
        let Some((key, value)) = raw.split_once('=') else {
            bail!("invalid --param '{raw}': expected key=value");
        };
        let parameter = pipeline
            .parameter(key)
            .with_context(|| format!("unknown parameter '{key}'"))?;
        let value = Value::parse_as(parameter.param_type, value)
            .map_err(|e| anyhow::anyhow!("invalid value for parameter '{key}': {e}"))?;
        overrides.insert(key.to_string(), value);
    }
    Ok(overrides)
}

fn write_output(path: &Path, content: &str) -> Result<()> {
    if path.as_os_str() == "-" {
        println!("{content}");
        return Ok(());
    }
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
