//! Weave CLI - workflow graph runner

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::fs;

use weave::error::{EngineError, FixSuggestion};
use weave::executor::{default_http_client, ExecutorTable};
use weave::graph::Graph;
use weave::result_log::Outcome;
use weave::scheduler::WorkflowRun;
use weave::validate;

#[derive(Parser)]
#[command(name = "weave")]
#[command(about = "Weave - workflow graph runner")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow .json file
        file: String,

        /// Print the full result log as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a workflow file without executing it
    Validate {
        /// Path to workflow .json file
        file: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { file, json } => run_workflow(&file, json).await,
        Commands::Validate { file } => validate_workflow(&file),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        if let Some(suggestion) = e
            .downcast_ref::<EngineError>()
            .and_then(FixSuggestion::fix_suggestion)
        {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

fn load_graph(file: &str) -> anyhow::Result<Graph> {
    let doc = fs::read_to_string(file)
        .map_err(EngineError::from)
        .with_context(|| format!("Failed to read workflow file '{}'", file))?;
    let graph: Graph = serde_json::from_str(&doc)
        .map_err(EngineError::from)
        .with_context(|| format!("Failed to parse workflow file '{}'", file))?;
    Ok(graph)
}

async fn run_workflow(file: &str, json: bool) -> anyhow::Result<()> {
    let graph = load_graph(file)?;
    let executors = ExecutorTable::from_graph(&graph, default_http_client())?;

    println!(
        "{} Running workflow '{}' ({} tasks)",
        "→".cyan(),
        file.cyan().bold(),
        graph.task_count()
    );

    let run = WorkflowRun::new(graph, executors);
    let report = run.run().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.results)?);
        return Ok(());
    }

    for result in &report.results {
        match &result.outcome {
            Outcome::Value(value) => println!(
                "{} {} ({}): {}",
                "✓".green(),
                result.task_id.bold(),
                result.kind,
                compact(value)
            ),
            Outcome::Error(e) => println!(
                "{} {} ({}): {}",
                "✗".red(),
                result.task_id.bold(),
                result.kind,
                e.red()
            ),
        }
    }

    let failed = report
        .results
        .iter()
        .filter(|r| r.outcome.is_error())
        .count();
    println!(
        "{} {} results, {} failed, {}ms",
        "→".cyan(),
        report.results.len(),
        failed,
        report.duration_ms
    );

    Ok(())
}

fn validate_workflow(file: &str) -> anyhow::Result<()> {
    let graph = load_graph(file)?;
    validate::validate_graph(&graph)?;

    println!("{} Workflow '{}' is valid", "✓".green(), file);
    println!("  Tasks: {}", graph.task_count());
    println!("  Connections: {}", graph.connections().len());
    println!("  Entry: {}", graph.entry_task()?.id);

    Ok(())
}

/// One-line value preview for the result listing
fn compact(value: &serde_json::Value) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() > 120 {
        let head: String = rendered.chars().take(117).collect();
        format!("{}...", head)
    } else {
        rendered
    }
}
