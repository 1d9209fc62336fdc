mod agent;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use waypoint_budget::{BudgetPolicy, CostLedger, PricingEntry as BudgetPricingEntry, PricingResolver, TokenEstimator, UnknownPricingMode as BudgetUnknownPricingMode};
use waypoint_config::{ConfigLoader, PricingEntry as ConfigPricingEntry, RuntimeConfig, UnknownPricingMode as ConfigUnknownPricingMode};
use waypoint_memory::{MemoryCoordinator, MemoryRepository, SessionMemoryStore};
use waypoint_observability::{init_process_logging, ProcessKind};
use waypoint_orchestrator::{RunEngine, RunEngineInput};
use waypoint_providers::testing::{EchoAiService, StaticCapabilityResolver};
use waypoint_providers::LLMGateway;
use waypoint_runtime::{RunRepository, StateManager, TaskRepository};
use waypoint_storage::{JsonFileStorage, StorageBackend};
use waypoint_types::{ModelSpec, SessionId};

use crate::agent::SimpleAgent;

#[derive(Parser, Debug)]
#[command(name = "waypoint-engine")]
#[command(about = "Headless Waypoint run engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive a single run to completion and print its output.
    Run {
        prompt: String,
        #[arg(long, env = "WAYPOINT_STATE_DIR")]
        state_dir: Option<String>,
        #[arg(long)]
        config: Option<String>,
        #[arg(long, default_value = "demo")]
        provider_id: String,
        #[arg(long, default_value = "demo-model")]
        model_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { prompt, state_dir, config, provider_id, model_id } => {
            let state_dir = resolve_state_dir(state_dir);
            let (_guard, log_info) = init_process_logging(ProcessKind::Engine, &state_dir.join("logs"), 14)?;
            info!(process = log_info.process, logs_dir = %log_info.logs_dir.display(), "engine starting");
            log_startup_paths(&state_dir);

            let runtime_config = ConfigLoader::new()
                .with_file(config.unwrap_or_else(|| state_dir.join("config.json").to_string_lossy().into_owned()))
                .load()
                .await
                .context("failed to load runtime configuration")?;

            let engine = build_engine(&state_dir, &runtime_config, &provider_id, &model_id).await?;
            let result = engine
                .run(RunEngineInput {
                    session_id: SessionId::new(),
                    agent_type: "simple".to_string(),
                    prompt,
                    history: Vec::new(),
                    model_id: Some(model_id),
                    provider_id: Some(provider_id),
                    metadata: None,
                })
                .await
                .context("run did not complete")?;

            println!("{}", result.output);
        }
    }

    Ok(())
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("WAYPOINT_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|dir| dir.join("waypoint"))
        .unwrap_or_else(|| PathBuf::from(".waypoint"))
}

fn log_startup_paths(state_dir: &PathBuf) {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    info!(
        "startup paths: exe={} cwd={} state_dir={}",
        exe.display(),
        cwd.display(),
        state_dir.display()
    );
}

fn convert_unknown_pricing_mode(mode: ConfigUnknownPricingMode) -> BudgetUnknownPricingMode {
    match mode {
        ConfigUnknownPricingMode::Warn => BudgetUnknownPricingMode::Warn,
        ConfigUnknownPricingMode::Block => BudgetUnknownPricingMode::Block,
    }
}

fn convert_pricing_entry(entry: ConfigPricingEntry) -> BudgetPricingEntry {
    BudgetPricingEntry {
        prompt_cost_per_1k: entry.prompt_cost_per_1k,
        completion_cost_per_1k: entry.completion_cost_per_1k,
    }
}

async fn build_engine(
    state_dir: &PathBuf,
    config: &RuntimeConfig,
    provider_id: &str,
    model_id: &str,
) -> anyhow::Result<RunEngine> {
    let storage: Arc<dyn StorageBackend> = Arc::new(JsonFileStorage::new(state_dir.join("storage")).await?);

    let token_estimator = TokenEstimator::new(config.token_estimator.chars_per_token)
        .context("invalid token estimator configuration")?;
    let cost_ledger = Arc::new(CostLedger::new(storage.clone()).context("storage backend does not meet cost ledger's durability requirement")?);
    let pricing_registry = config
        .pricing_registry
        .iter()
        .map(|(key, entry)| (key.clone(), convert_pricing_entry(entry.clone())))
        .collect();
    let pricing_resolver = PricingResolver::new(pricing_registry, convert_unknown_pricing_mode(config.budget.unknown_pricing_mode));
    let budget_policy = Arc::new(BudgetPolicy::new(
        cost_ledger.clone(),
        storage.clone(),
        config.budget.max_cost_per_run,
        config.budget.max_cost_per_session,
        config.budget.warning_threshold,
    ));

    let ai_service = Arc::new(EchoAiService::default());
    let capability_resolver = Arc::new(StaticCapabilityResolver::new().allow(provider_id, model_id));
    let default_model = ModelSpec::new(provider_id, model_id);
    let gateway = Arc::new(LLMGateway::new(
        ai_service,
        capability_resolver,
        budget_policy,
        cost_ledger,
        pricing_resolver,
        Some(default_model.clone()),
    ));

    let memory_repo = Arc::new(MemoryRepository::new(storage.clone()).context("storage backend does not meet memory repository's durability requirement")?);
    let session_store = Arc::new(SessionMemoryStore::new(storage.clone()).context("storage backend does not meet session memory store's durability requirement")?);
    let memory_coordinator = Arc::new(MemoryCoordinator::new(
        memory_repo,
        session_store,
        token_estimator,
        config.memory.max_events_per_scope,
        config.memory.compaction_threshold,
        config.memory.pinned_fraction,
        gateway.clone(),
        default_model.clone(),
    ));

    let runs = Arc::new(RunRepository::new(storage.clone()).context("storage backend does not meet run repository's durability requirement")?);
    let tasks = Arc::new(TaskRepository::new(storage).context("storage backend does not meet task repository's durability requirement")?);
    let state = Arc::new(StateManager::new(runs, tasks));

    let agent = Arc::new(SimpleAgent::new(gateway, default_model));

    Ok(RunEngine::new(state, agent).with_memory(memory_coordinator, 2000))
}
