//! Gatehouse CLI
//!
//! The `gatehouse` command runs gated build/scan/push/deploy pipelines.
//!
//! ## Commands
//!
//! - `validate`: Load a pipeline definition and print its stage levels
//! - `run`: Execute a pipeline and record its artifact tag
//! - `tag`: Read the tag ledger
//! - `deploy`: Deploy a recorded tag to an environment

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

use gatehouse_ci::{cancel_pair, CommandExecutor, Pipeline, PipelineError, PipelineOptions};
use gatehouse_core::{
    render_run_summary_md, write_run_report_json, DeployRequest, Deployer, DeploymentTrigger,
    GatehouseConfig, HelmDeployer, PipelineDefinition, PipelineRun, RecordingDeployer,
    StageGraph, Trigger, TriggerKind,
};
use gatehouse_state::{RunId, StateBackend, TagStore};

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Gated build, scan, push and deploy pipelines", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Tag ledger location (overrides GATEHOUSE_STATE_BACKEND)
    #[arg(long, global = true)]
    state: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a pipeline definition and print its stage levels
    Validate {
        /// Pipeline definition (.toml or .json)
        definition: PathBuf,
    },

    /// Execute a pipeline once
    Run(RunArgs),

    /// Read the tag ledger
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },

    /// Deploy a recorded tag
    Deploy(DeployArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Pipeline definition (.toml or .json)
    definition: PathBuf,

    /// What triggered the run: manual, pull-request or push
    #[arg(long, default_value = "manual")]
    trigger: String,

    /// Branch built by manual and push runs
    #[arg(long)]
    branch: Option<String>,

    /// Ref built by pull-request runs
    #[arg(long = "ref")]
    git_ref: Option<String>,

    /// Run identifier (default: random UUID)
    #[arg(long)]
    run_id: Option<String>,

    /// Build sequence number used in the tag
    #[arg(long, default_value = "1")]
    build_seq: u32,

    /// Image repository (overrides GATEHOUSE_REGISTRY)
    #[arg(long)]
    registry: Option<String>,

    /// Most stages executing at once
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Working directory for stage commands
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Write the run report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Subcommand)]
enum TagAction {
    /// Show the tag recorded for a run
    Get {
        /// Run ID
        run_id: String,
    },
    /// List every recorded tag
    List,
}

#[derive(clap::Args)]
struct DeployArgs {
    /// Target environment (overrides GATEHOUSE_ENVIRONMENT)
    #[arg(short, long)]
    environment: Option<String>,

    /// Tag to deploy
    #[arg(long, conflicts_with = "run", required_unless_present = "run")]
    tag: Option<String>,

    /// Deploy the tag recorded for this run
    #[arg(long)]
    run: Option<String>,

    /// Helm release name
    #[arg(long, default_value = "app")]
    release: String,

    /// Helm chart reference
    #[arg(long, default_value = "./chart")]
    chart: String,

    /// Kubernetes namespace (default: the environment name)
    #[arg(long)]
    namespace: Option<String>,

    /// Image repository (overrides GATEHOUSE_REGISTRY)
    #[arg(long)]
    registry: Option<String>,

    /// Helm binary
    #[arg(long, default_value = "helm")]
    helm_bin: String,

    /// Print the helm command instead of running it
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    gatehouse_core::init_tracing(cli.json, level);

    let mut config = GatehouseConfig::from_env().context("Invalid GATEHOUSE_* configuration")?;
    if let Some(state) = &cli.state {
        config.state_backend = StateBackend::parse(state)
            .with_context(|| format!("Invalid --state location {state:?}"))?;
    }

    match cli.command {
        Commands::Validate { definition } => cmd_validate(&config, &definition),
        Commands::Run(args) => cmd_run(&config, args).await,
        Commands::Tag { action } => {
            let store = open_store(&config).await?;
            match action {
                TagAction::Get { run_id } => cmd_tag_get(store.as_ref(), &run_id).await,
                TagAction::List => cmd_tag_list(store.as_ref()).await,
            }
        }
        Commands::Deploy(args) => cmd_deploy(&config, args).await,
    }
}

async fn open_store(config: &GatehouseConfig) -> Result<Arc<dyn TagStore>> {
    config
        .state_backend
        .open()
        .await
        .with_context(|| format!("Failed to open tag ledger at {}", config.state_backend))
}

/// Load a definition, apply `GATEHOUSE_GATE_*` overrides and validate it.
fn load_graph(config: &GatehouseConfig, path: &Path) -> Result<StageGraph> {
    let mut definition = PipelineDefinition::from_path(path)
        .with_context(|| format!("Failed to load pipeline definition {}", path.display()))?;
    let overridden = definition
        .apply_gate_overrides(&config.gate_thresholds)
        .context("Invalid gate threshold override")?;
    for stage in overridden {
        info!(stage = %stage, "Gate policy overridden from environment");
    }
    StageGraph::new(definition)
        .with_context(|| format!("Invalid pipeline definition {}", path.display()))
}

fn build_trigger(kind: &str, branch: Option<String>, git_ref: Option<String>) -> Result<Trigger> {
    let kind: TriggerKind = kind.parse()?;
    let target = match kind {
        TriggerKind::PullRequest => git_ref.context("--ref is required for pull-request runs")?,
        TriggerKind::Manual | TriggerKind::Push => branch
            .with_context(|| format!("--branch is required for {kind} runs"))?,
    };
    let trigger = Trigger::new(kind, target);
    trigger.validate()?;
    Ok(trigger)
}

fn cmd_validate(config: &GatehouseConfig, path: &Path) -> Result<()> {
    let graph = load_graph(config, path)?;
    println!("Pipeline: {} ({} stages)", graph.name(), graph.len());
    for (depth, level) in graph.levels().iter().enumerate() {
        println!("  level {}: {}", depth, level.join(", "));
    }
    if let Some(stage) = graph.artifact_stage() {
        println!("Artifact stage: {}", stage);
    }
    println!("Digest: {}", graph.digest());
    Ok(())
}

async fn cmd_run(config: &GatehouseConfig, args: RunArgs) -> Result<()> {
    let graph = load_graph(config, &args.definition)?;
    let trigger = build_trigger(&args.trigger, args.branch, args.git_ref)?;
    let run = match args.run_id {
        Some(id) => PipelineRun::with_id(RunId(id), trigger),
        None => PipelineRun::new(trigger),
    };
    let store = open_store(config).await?;

    let executor = match args.workdir {
        Some(dir) => CommandExecutor::in_dir(dir),
        None => CommandExecutor::new(),
    };
    let pipeline = Pipeline::new(graph, Arc::new(executor), store).with_options(PipelineOptions {
        registry: args.registry.or_else(|| config.registry.clone()),
        build_seq: args.build_seq,
        max_parallel: args.max_parallel,
        default_timeout: None,
    });

    let (cancel, token) = cancel_pair();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });
    let result = pipeline.run_with(run, token).await;
    interrupt.abort();

    let (report, publish_error) = match result {
        Ok(report) => (report, None),
        Err(PipelineError::Publish { report, source, .. }) => (*report, Some(source)),
        Err(e) => return Err(e).context("Pipeline run failed"),
    };

    if let Some(path) = &args.report {
        write_run_report_json(path, &report)?;
        info!(path = %path.display(), "Run report written");
    }
    println!("{}", render_run_summary_md(&report));

    if let Some(source) = publish_error {
        return Err(source).context(format!(
            "Run {} could not record its tag",
            report.run.run_id
        ));
    }
    if !report.succeeded() {
        anyhow::bail!("Run {} finished {}", report.run.run_id, report.state);
    }
    Ok(())
}

async fn cmd_tag_get(store: &dyn TagStore, run_id: &str) -> Result<()> {
    let record = store
        .get(&RunId::from(run_id))
        .await
        .with_context(|| format!("No tag for run {run_id}"))?;
    println!("{}", record.tag);
    Ok(())
}

async fn cmd_tag_list(store: &dyn TagStore) -> Result<()> {
    let records = store.list().await.context("Failed to list tags")?;
    if records.is_empty() {
        println!("No tags recorded.");
        return Ok(());
    }
    for record in records {
        println!(
            "{}\t{}\t{}",
            record.created_at.to_rfc3339(),
            record.run_id,
            record.tag
        );
    }
    Ok(())
}

async fn cmd_deploy(config: &GatehouseConfig, args: DeployArgs) -> Result<()> {
    let environment = args
        .environment
        .or_else(|| config.environment.clone())
        .context("--environment or GATEHOUSE_ENVIRONMENT is required")?;

    let mut helm = HelmDeployer::new(args.release, args.chart).with_helm_bin(args.helm_bin);
    if let Some(namespace) = args.namespace {
        helm = helm.with_namespace(namespace);
    }
    if let Some(repository) = args.registry.or_else(|| config.registry.clone()) {
        helm = helm.with_repository(repository);
    }

    let store = open_store(config).await?;
    let recorder = Arc::new(RecordingDeployer::new());
    let deployer: Arc<dyn Deployer> = if args.dry_run {
        Arc::clone(&recorder) as Arc<dyn Deployer>
    } else {
        Arc::new(helm.clone())
    };
    let trigger = DeploymentTrigger::new(store, deployer);

    let handle = match (&args.tag, &args.run) {
        (Some(tag), _) => trigger.deploy(&environment, tag).await,
        (None, Some(run_id)) => {
            trigger
                .deploy_run(&environment, &RunId::from(run_id.as_str()))
                .await
        }
        (None, None) => anyhow::bail!("--tag or --run is required"),
    }
    .context("Deployment failed")?;

    if args.dry_run {
        for request in recorder.requests() {
            println!("{}", describe_request(&helm, &request));
        }
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&handle).context("Failed to encode deployment handle")?
    );
    Ok(())
}

/// The helm invocation `helm` would run for `request`.
fn describe_request(helm: &HelmDeployer, request: &DeployRequest) -> String {
    format!("{} {}", helm.helm_bin, helm.command_args(request).join(" "))
}
