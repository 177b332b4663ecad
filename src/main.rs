use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::debug;

use trellis_config::WorkflowDef;
use trellis_engine::{
  ActivityRegistry, Engine, FsInstanceStore, HostConfig, StepReport, WorkflowHost,
};
use trellis_trigger::{InMemoryTransport, TriggerEvent, TriggerIdentity, WorkerManager};

/// Trellis - a workflow engine with durable bookmarks
#[derive(Parser)]
#[command(name = "trellis")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.trellis)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Start a workflow. The input is read as JSON from stdin.
  Run {
    /// Path to the workflow definition (JSON)
    workflow_file: PathBuf,

    #[arg(long)]
    correlation_id: Option<String>,
  },

  /// Resume one bookmark. The payload is read as JSON from stdin.
  Resume {
    instance_id: String,
    bookmark_id: String,
  },

  /// Deliver a trigger event to every matching bookmark. The payload is read
  /// as JSON from stdin.
  Publish {
    /// Queue or topic name
    source: String,

    #[arg(long)]
    subscription: Option<String>,

    /// Correlation value (JSON, or a plain string)
    #[arg(long)]
    correlation: Option<String>,
  },

  /// Cancel an instance
  Cancel { instance_id: String },

  /// Show one instance, or list all of them
  Show { instance_id: Option<String> },
}

fn init_tracing() {
  let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .try_init();
}

fn main() -> Result<()> {
  init_tracing();
  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".trellis"),
  };

  let Some(command) = cli.command else {
    println!("trellis - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_command(command, data_dir).await })
}

async fn run_command(command: Commands, data_dir: PathBuf) -> Result<()> {
  let host = open_host(&data_dir).await?;

  let result = match command {
    Commands::Run {
      workflow_file,
      correlation_id,
    } => run_workflow(&host, &data_dir, &workflow_file, correlation_id).await,
    Commands::Resume {
      instance_id,
      bookmark_id,
    } => {
      let payload = read_payload_from_stdin()?;
      let report = host
        .resume(&instance_id, &bookmark_id, payload)
        .await
        .with_context(|| format!("failed to resume instance {}", instance_id))?;
      print_report(&host, &report).await
    }
    Commands::Publish {
      source,
      subscription,
      correlation,
    } => {
      let mut trigger = TriggerIdentity::new(source);
      if let Some(subscription) = subscription {
        trigger = trigger.with_subscription(subscription);
      }
      let mut event = TriggerEvent::new(read_payload_from_stdin()?);
      if let Some(correlation) = correlation {
        event = event.with_correlation(parse_loose(&correlation));
      }

      let report = host
        .dispatch(&trigger, &event)
        .await
        .context("failed to dispatch event")?;
      eprintln!(
        "Resumed: {}, stale: {}, failed: {}",
        report.resumed.len(),
        report.stale.len(),
        report.failed.len()
      );
      for step in &report.resumed {
        print_report(&host, step).await?;
      }
      Ok(())
    }
    Commands::Cancel { instance_id } => {
      let report = host
        .cancel(&instance_id)
        .await
        .with_context(|| format!("failed to cancel instance {}", instance_id))?;
      print_report(&host, &report).await
    }
    Commands::Show { instance_id } => match instance_id {
      Some(instance_id) => {
        let instance = host.instance(&instance_id).await?;
        println!("{}", serde_json::to_string_pretty(&instance)?);
        Ok(())
      }
      None => {
        let summaries = host.instances().await?;
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        Ok(())
      }
    },
  };

  host.shutdown().await;
  result
}

/// Build a host over `{data_dir}/instances` with every saved definition registered.
async fn open_host(data_dir: &Path) -> Result<WorkflowHost> {
  debug!(data_dir = %data_dir.display(), "opening workflow host");
  let config = HostConfig::default();
  let transport = Arc::new(InMemoryTransport::new());
  let (workers, _deliveries) = WorkerManager::channel(transport, config.delivery_capacity);
  let store = Arc::new(FsInstanceStore::new(data_dir.join("instances")));

  let host = WorkflowHost::new(
    Engine::new(ActivityRegistry::with_builtins()),
    store,
    Arc::new(workers),
    config,
  );

  for def in saved_definitions(&data_dir.join("workflows")).await? {
    host
      .register(def)
      .context("failed to register saved workflow")?;
  }
  Ok(host)
}

async fn run_workflow(
  host: &WorkflowHost,
  data_dir: &Path,
  workflow_file: &Path,
  correlation_id: Option<String>,
) -> Result<()> {
  let workflow_content = tokio::fs::read_to_string(workflow_file)
    .await
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;

  let workflow_def: WorkflowDef = serde_json::from_str(&workflow_content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))?;

  let workflow = host
    .register(workflow_def.clone())
    .context("invalid workflow definition")?;
  eprintln!(
    "Loaded workflow: {} ({} activities)",
    workflow.name,
    workflow.len()
  );

  // Later invocations resume against the same definition. Each version is
  // kept so older instances can still be resumed after an upgrade.
  let workflows_dir = data_dir.join("workflows");
  tokio::fs::create_dir_all(&workflows_dir).await?;
  let saved = workflows_dir.join(format!(
    "{}.v{}.json",
    workflow.workflow_id, workflow.version
  ));
  tokio::fs::write(&saved, serde_json::to_string_pretty(&workflow_def)?)
    .await
    .with_context(|| format!("failed to save workflow: {}", saved.display()))?;

  let input = read_payload_from_stdin()?;
  let report = host
    .start_workflow(&workflow.workflow_id, input, correlation_id)
    .await
    .context("workflow execution failed")?;

  print_report(host, &report).await
}

async fn saved_definitions(dir: &Path) -> Result<Vec<WorkflowDef>> {
  let mut defs = Vec::new();
  let mut entries = match tokio::fs::read_dir(dir).await {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(defs),
    Err(e) => return Err(e).with_context(|| format!("failed to read {}", dir.display())),
  };

  while let Some(entry) = entries.next_entry().await? {
    let path = entry.path();
    if path.extension().is_some_and(|ext| ext == "json") {
      let content = tokio::fs::read_to_string(&path).await?;
      let def = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse saved workflow: {}", path.display()))?;
      defs.push(def);
    }
  }
  Ok(defs)
}

async fn print_report(host: &WorkflowHost, report: &StepReport) -> Result<()> {
  eprintln!("Instance {}: {:?}", report.instance_id, report.status);
  for bookmark in &report.created_bookmarks {
    eprintln!("  waiting on {} ({})", bookmark.trigger, bookmark.bookmark_id);
  }

  let instance = host.instance(&report.instance_id).await?;
  println!("{}", serde_json::to_string_pretty(&instance.summary())?);
  Ok(())
}

/// Parse JSON, falling back to a plain string.
fn parse_loose(text: &str) -> Value {
  serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn read_payload_from_stdin() -> Result<Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(serde_json::json!({}));
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read payload from stdin")?;

  if input.trim().is_empty() {
    Ok(serde_json::json!({}))
  } else {
    serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
  }
}
