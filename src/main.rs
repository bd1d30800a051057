use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use workgraph::config::EngineConfig;
use workgraph::engine::{Manager, WaveReport};
use workgraph::worklet::Bindings;
use workgraph::{wlog, wlog_debug, Error, Result, TaskId};

/// workgraph - reactive task-dependency engine
#[derive(Parser, Debug)]
#[command(name = "workgraph")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    WORKGRAPH_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.workgraph/workgraph.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Engine configuration file (defaults to ~/.workgraph/workgraph.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Import a graph document and report task states and adaptor cycles
    Check {
        /// Graph document (JSON)
        doc: PathBuf,
    },

    /// Re-evaluate a graph document and print the resulting state changes
    Eval {
        doc: PathBuf,

        /// Task id or name to re-evaluate (all tasks if omitted)
        #[arg(long)]
        task: Option<String>,

        /// Write the re-evaluated graph here
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Mark a completable task completed
    Complete {
        doc: PathBuf,

        /// Task id or name
        task: String,

        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Instantiate a registered worklet
    Instantiate {
        doc: PathBuf,

        /// Worklet name
        worklet: String,

        /// Parameter binding, `name=value`; values parse as JSON when they can
        #[arg(long = "bind", value_name = "NAME=VALUE")]
        bindings: Vec<String>,

        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::load()?,
    };
    let log_path = config.log_path().or_else(workgraph::log::default_path);
    workgraph::log::init_with(log_path, cli.debug || config.debug);
    wlog!("workgraph starting: {:?}", cli.command);

    match cli.command {
        Command::Check { doc } => run_check(config, &doc),
        Command::Eval { doc, task, out } => run_eval(config, &doc, task.as_deref(), out.as_deref()),
        Command::Complete { doc, task, out } => run_complete(config, &doc, &task, out.as_deref()),
        Command::Instantiate {
            doc,
            worklet,
            bindings,
            out,
        } => run_instantiate(config, &doc, &worklet, &bindings, out.as_deref()),
    }
}

fn open(config: EngineConfig, doc: &Path) -> Result<(Manager, WaveReport)> {
    let mut manager = Manager::new(config);
    let report = manager.load(doc)?;
    Ok((manager, report))
}

/// Accept a full task id or a task name.
fn resolve_task(manager: &Manager, key: &str) -> Result<TaskId> {
    if let Ok(id) = key.parse::<TaskId>() {
        if manager.task(id).is_some() {
            return Ok(id);
        }
    }
    manager
        .task_by_name(key)
        .map(|t| t.id())
        .ok_or_else(|| Error::Validation(format!("No task with id or name '{}'", key)))
}

fn parse_binding(raw: &str) -> Result<(String, serde_json::Value)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| Error::Validation(format!("binding '{}' is not name=value", raw)))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((name.trim().to_string(), value))
}

fn print_events(manager: &Manager, report: &WaveReport) {
    if report.is_quiet() {
        println!("  No state changes (wave {})", report.wave);
        return;
    }
    for event in &report.events {
        let name = manager.task(event.task).map(|t| t.name()).unwrap_or("?");
        println!("  {:<24} {} -> {}", name, event.old, event.new);
    }
}

fn save_if_requested(manager: &Manager, out: Option<&Path>) -> Result<()> {
    if let Some(path) = out {
        manager.save(path)?;
        println!();
        println!("Saved graph to {}", path.display());
    }
    Ok(())
}

fn run_check(config: EngineConfig, doc: &Path) -> Result<()> {
    let (manager, report) = open(config, doc)?;
    wlog_debug!("Check command: doc={}", doc.display());

    println!();
    println!("Graph: {}", doc.display());
    println!("  Tasks:     {}", manager.task_count());
    println!("  Adaptors:  {}", manager.adaptor_count());
    println!("  Worklets:  {}", manager.worklets().len());
    println!();
    for task in manager.tasks() {
        let indent = if task.parent().is_some() { "    " } else { "  " };
        println!("{}{} {:<24} {}", indent, task.id().short(), task.name(), task.state());
        for d in task.diagnostics() {
            println!("{}    ! {}: {}", indent, d.source, d.message);
        }
    }
    if !report.is_quiet() {
        println!();
        println!("Stored states were stale:");
        print_events(&manager, &report);
    }

    let cycles = manager.topology().cycles();
    if !cycles.is_empty() {
        println!();
        println!("Adaptor cycles:");
        for cycle in cycles {
            let names: Vec<&str> = cycle
                .iter()
                .filter_map(|id| manager.task(*id).map(|t| t.name()))
                .collect();
            println!("  {}", names.join(" -> "));
        }
    }
    Ok(())
}

fn run_eval(config: EngineConfig, doc: &Path, task: Option<&str>, out: Option<&Path>) -> Result<()> {
    let (mut manager, _) = open(config, doc)?;
    let report = match task {
        Some(key) => {
            let id = resolve_task(&manager, key)?;
            manager.reevaluate(id)?
        }
        None => manager.reevaluate_all()?,
    };
    println!();
    print_events(&manager, &report);
    save_if_requested(&manager, out)
}

fn run_complete(config: EngineConfig, doc: &Path, task: &str, out: Option<&Path>) -> Result<()> {
    let (mut manager, _) = open(config, doc)?;
    let id = resolve_task(&manager, task)?;
    let report = manager.mark_completed(id)?;
    println!();
    print_events(&manager, &report);
    save_if_requested(&manager, out)
}

fn run_instantiate(
    config: EngineConfig,
    doc: &Path,
    worklet: &str,
    raw_bindings: &[String],
    out: Option<&Path>,
) -> Result<()> {
    let (mut manager, _) = open(config, doc)?;
    let mut bindings = Bindings::new();
    for raw in raw_bindings {
        let (name, value) = parse_binding(raw)?;
        bindings.insert(name, value);
    }
    let inst = manager.instantiate_worklet(worklet, &bindings)?;

    println!();
    println!("Instantiated worklet '{}':", inst.worklet);
    for id in &inst.tasks {
        if let Some(task) = manager.task(*id) {
            let marker = if inst.top_level.contains(id) { "*" } else { " " };
            println!("  {} {}  {:<24} {}", marker, id, task.name(), task.state());
        }
    }
    println!("  {} adaptors", inst.adaptors.len());
    save_if_requested(&manager, out)
}
