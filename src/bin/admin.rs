//! TheMachine Admin CLI
//!
//! In-process diagnostics: builds a platform from the usual settings, seeds the
//! development catalog and runs one command against it. Agents, models and
//! workflows can be referred to by id or by name.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use themachine::engine::{AgentExecutionRequest, SelectionCriteria};
use themachine::models::{
    Agent, AgentFilter, ExecutionCreate, ExecutionStatus, Model, ModelCapability, ModelFilter,
    ModelProvider, Pagination, Parameters, Workflow, WorkflowFilter,
};
use themachine::{seed, HumanDecision, Platform, Settings};

#[derive(Parser)]
#[command(name = "themachine-admin")]
#[command(about = "TheMachine Admin CLI - Inspect the catalog and exercise the engine")]
#[command(version = "1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to themachine.toml when present)
    #[arg(long, env = "MACHINE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered models
    ListModels {
        /// Only models from this provider
        #[arg(long)]
        provider: Option<ModelProvider>,

        /// Only models with this capability
        #[arg(long)]
        capability: Option<ModelCapability>,
    },

    /// List registered agents
    ListAgents,

    /// List workflows
    ListWorkflows,

    /// Pick the best model for a set of requirements
    SelectModel {
        /// Required capability (repeatable)
        #[arg(long = "capability", short = 'c')]
        capabilities: Vec<ModelCapability>,

        /// Tokens the request needs
        #[arg(long)]
        context_size: Option<u32>,

        /// 0.0 ignores cost, 1.0 only considers cost
        #[arg(long, default_value_t = 0.5)]
        cost_sensitivity: f64,

        /// Provider to favour
        #[arg(long)]
        provider: Option<ModelProvider>,
    },

    /// Check whether a model can take a given context size
    ValidateModel {
        /// Model id, provider model id or name
        model: String,

        #[arg(long)]
        context_size: Option<u32>,
    },

    /// Run an agent once
    ExecuteAgent {
        /// Agent id or name
        agent: String,

        /// Task text
        task: String,

        /// Model to use instead of the agent's default
        #[arg(long)]
        model: Option<String>,
    },

    /// Start a workflow and follow it to the end
    RunWorkflow {
        /// Workflow id or name
        #[arg(default_value = "Code Review Workflow")]
        workflow: String,

        /// Input field as key=value (repeatable)
        #[arg(long = "input", short = 'i')]
        inputs: Vec<String>,

        /// Approve human steps automatically
        #[arg(long)]
        auto_approve: bool,

        /// Seconds to wait for the execution to settle
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },

    /// Show platform statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let platform = Platform::builder(settings).build()?;
    seed::seed_catalog(&platform).await?;

    let outcome = run(&platform, cli.command).await;
    platform.shutdown().await;
    outcome
}

async fn run(platform: &Platform, command: Commands) -> Result<()> {
    match command {
        Commands::ListModels {
            provider,
            capability,
        } => {
            let filter = ModelFilter {
                provider,
                capability,
                is_active: None,
            };
            list_models(platform, &filter).await
        }
        Commands::ListAgents => list_agents(platform).await,
        Commands::ListWorkflows => list_workflows(platform).await,
        Commands::SelectModel {
            capabilities,
            context_size,
            cost_sensitivity,
            provider,
        } => {
            let mut criteria =
                SelectionCriteria::new(capabilities).with_cost_sensitivity(cost_sensitivity);
            if let Some(size) = context_size {
                criteria = criteria.with_context_size(size);
            }
            if let Some(provider) = provider {
                criteria = criteria.with_preferred_provider(provider);
            }
            select_model(platform, &criteria).await
        }
        Commands::ValidateModel {
            model,
            context_size,
        } => validate_model(platform, &model, context_size).await,
        Commands::ExecuteAgent { agent, task, model } => {
            execute_agent(platform, &agent, task, model.as_deref()).await
        }
        Commands::RunWorkflow {
            workflow,
            inputs,
            auto_approve,
            timeout,
        } => {
            run_workflow(
                platform,
                &workflow,
                parse_inputs(&inputs)?,
                auto_approve,
                Duration::from_secs(timeout),
            )
            .await
        }
        Commands::Stats => show_stats(platform).await,
    }
}

async fn find_model(platform: &Platform, reference: &str) -> Result<Model> {
    let models = platform
        .list_models(&ModelFilter::default(), &Pagination::default())
        .await?;
    models
        .into_iter()
        .find(|m| {
            m.id.as_str() == reference
                || m.provider_model_id == reference
                || m.name.eq_ignore_ascii_case(reference)
        })
        .ok_or_else(|| anyhow!("no model matches '{}'", reference))
}

async fn find_agent(platform: &Platform, reference: &str) -> Result<Agent> {
    let agents = platform
        .list_agents(&AgentFilter::default(), &Pagination::default())
        .await?;
    agents
        .into_iter()
        .find(|a| a.id.as_str() == reference || a.name.eq_ignore_ascii_case(reference))
        .ok_or_else(|| anyhow!("no agent matches '{}'", reference))
}

async fn find_workflow(platform: &Platform, reference: &str) -> Result<Workflow> {
    let workflows = platform
        .list_workflows(&WorkflowFilter::default(), &Pagination::default())
        .await?;
    workflows
        .into_iter()
        .find(|w| w.id == reference || w.name.eq_ignore_ascii_case(reference))
        .ok_or_else(|| anyhow!("no workflow matches '{}'", reference))
}

fn parse_inputs(inputs: &[String]) -> Result<Parameters> {
    let mut data = Parameters::new();
    for pair in inputs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("input '{}' is not key=value", pair))?;
        // Values that parse as JSON keep their type; anything else is a string
        let value: serde_json::Value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        data.insert(key.to_string(), value);
    }
    Ok(data)
}

fn capability_list<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

async fn list_models(platform: &Platform, filter: &ModelFilter) -> Result<()> {
    let models = platform.list_models(filter, &Pagination::default()).await?;

    println!("\n{} ({})", "🧠 Models".bold(), models.len());
    println!("=====================================");
    for model in models {
        println!("{} {}", "•".cyan(), model.name.bold());
        println!("  ID: {}", model.id);
        println!("  Provider: {} ({})", model.provider, model.provider_model_id);
        println!("  Capabilities: {}", capability_list(&model.capabilities));
        println!("  Context window: {}", model.context_window);
        println!(
            "  Cost per token: ${} prompt / ${} completion",
            model.cost_per_prompt_token, model.cost_per_completion_token
        );
    }
    Ok(())
}

async fn list_agents(platform: &Platform) -> Result<()> {
    let agents = platform
        .list_agents(&AgentFilter::default(), &Pagination::default())
        .await?;

    println!("\n{} ({})", "🤖 Agents".bold(), agents.len());
    println!("=====================================");
    for agent in agents {
        let status = if agent.is_active {
            "active".green()
        } else {
            "inactive".red()
        };
        println!("{} {} [{}]", "•".cyan(), agent.name.bold(), status);
        println!("  ID: {}", agent.id);
        println!("  Type: {}", agent.agent_type);
        println!("  Capabilities: {}", capability_list(&agent.capabilities));
        println!("  Default model: {}", agent.default_model_id);
    }
    Ok(())
}

async fn list_workflows(platform: &Platform) -> Result<()> {
    let workflows = platform
        .list_workflows(&WorkflowFilter::default(), &Pagination::default())
        .await?;

    println!("\n{} ({})", "📋 Workflows".bold(), workflows.len());
    println!("=====================================");
    for workflow in workflows {
        println!("{} {} ({})", "•".cyan(), workflow.name.bold(), workflow.workflow_type);
        println!("  ID: {}", workflow.id);
        for step in &workflow.steps {
            let next = if step.is_sink() {
                "end".dimmed().to_string()
            } else {
                step.successors().join(", ")
            };
            println!("    {} [{}] {} → {}", step.id, step.step_type, step.name, next);
        }
    }
    Ok(())
}

async fn select_model(platform: &Platform, criteria: &SelectionCriteria) -> Result<()> {
    let selection = platform.select_model(criteria).await?;

    println!("\n{} {}", "✅ Selected:".green().bold(), selection.model.name.bold());
    println!("  Score: {:.3}", selection.score);
    println!("  Estimated tokens: {}", selection.estimated_tokens);
    println!("  Estimated cost: ${:.6}", selection.estimated_cost);
    println!("  {}", selection.reasoning);

    if !selection.alternatives.is_empty() {
        println!("\n{}", "Alternatives".bold());
        for alternative in &selection.alternatives {
            println!(
                "  {} {:.3} ({})",
                alternative.model.name, alternative.score, alternative.reason_not_selected
            );
        }
    }
    if !selection.rejected.is_empty() {
        println!("\n{}", "Rejected".bold());
        for rejected in &selection.rejected {
            println!("  {} {:?}", rejected.model_id, rejected.reason);
        }
    }
    Ok(())
}

async fn validate_model(platform: &Platform, reference: &str, context_size: Option<u32>) -> Result<()> {
    let model = find_model(platform, reference).await?;
    match platform.validate_model_for_context(&model.id, context_size).await {
        Ok(validation) => {
            println!("{} {} can take the request", "✅".green(), model.name.bold());
            println!("  Remaining tokens: {}", validation.remaining_tokens);
            println!("  Estimated prompt cost: ${:.6}", validation.estimated_cost);
        }
        Err(e) => println!("{} {}", "❌".red(), e.to_string().red()),
    }
    Ok(())
}

async fn execute_agent(
    platform: &Platform,
    reference: &str,
    task: String,
    model: Option<&str>,
) -> Result<()> {
    let agent = find_agent(platform, reference).await?;
    let mut request = AgentExecutionRequest::new(agent.id.clone(), task);
    if let Some(model) = model {
        request = request.with_model(find_model(platform, model).await?.id);
    }

    let result = platform.execute_agent(request).await?;
    println!("\n{} {}", "🤖".cyan(), agent.name.bold());
    println!("{}", result.result);
    println!(
        "\n  Model: {}  Tokens: {} + {}  Cost: ${:.6}  Time: {}ms",
        result.model_id,
        result.usage.prompt_tokens,
        result.usage.completion_tokens,
        result.cost,
        result.duration_ms
    );
    Ok(())
}

async fn run_workflow(
    platform: &Platform,
    reference: &str,
    input: Parameters,
    auto_approve: bool,
    timeout: Duration,
) -> Result<()> {
    let workflow = find_workflow(platform, reference).await?;
    let started = platform
        .start_execution(
            &workflow.id,
            ExecutionCreate {
                input_data: Some(input),
                parameters: None,
            },
        )
        .await?;
    info!(execution_id = %started.id, workflow = %workflow.name, "Execution started");
    println!("▶ {} ({})", workflow.name.bold(), started.id);

    let execution = loop {
        let execution = platform.wait_for_execution(&started.id, timeout).await?;
        if execution.status.is_terminal() || execution.awaiting_signal.is_empty() {
            break execution;
        }

        let waiting: Vec<String> = execution.awaiting_signal.keys().cloned().collect();
        if !auto_approve {
            println!(
                "{} waiting for human decision on: {}",
                "⏸".yellow(),
                waiting.join(", ")
            );
            break execution;
        }
        for (step_id, parked) in &execution.awaiting_signal {
            for _ in parked {
                println!("  {} approving {}", "✔".green(), step_id);
                platform
                    .resolve_human_step(
                        &execution.id,
                        step_id,
                        HumanDecision::approve().with_comment("approved from admin CLI"),
                    )
                    .await?;
            }
        }
    };

    for record in &execution.step_history {
        println!(
            "  {} [{:?}] cost ${:.6}",
            record.step_id, record.status, record.cost
        );
    }

    let status = match execution.status {
        ExecutionStatus::Completed => execution.status.to_string().green(),
        ExecutionStatus::Failed => execution.status.to_string().red(),
        _ => execution.status.to_string().yellow(),
    };
    println!("\nStatus: {}  Total cost: ${:.6}", status, execution.cost);
    if let Some(error) = &execution.error {
        println!("Error: {}", error.red());
    }
    if execution.status == ExecutionStatus::Completed {
        println!("{}", serde_json::to_string_pretty(&execution.output_data)?);
    }
    Ok(())
}

async fn show_stats(platform: &Platform) -> Result<()> {
    let stats = platform.stats().await?;
    println!("\n{}", "📈 Platform Statistics".bold());
    println!("==================================");
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
