//! Thin CLI wiring over the boundary glue in `lib.rs`. Full CLI UX (a
//! chat REPL, provider auth flows, etc., as the teacher's own `qmt`
//! binary has) is out of scope here — this binary exists to exercise the
//! boot/DI/scoped-resource path end to end, not to be a product surface.

use agentkit_agent::{AgentContext, AgentRunner, AgentType, CompletedHandlerRegistry, RunnerDeps};
use agentkit_core::FunctionRegistry;
use agentkit_review::ReviewEngine;
use agentkit_runtime::{build_repositories, build_source_control, init_logging, RuntimeConfig, WorkingDirScope};
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(name = "agentkit", about = "Autonomous agent runtime boundary glue")]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints the effective `RuntimeConfig` derived from the environment,
    /// without booting any stores. Useful for diagnosing DI selection.
    Doctor,
    /// Starts a new agent context and drives it to its first gate.
    StartAgent {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        prompt: String,
    },
    /// Runs the code review engine against a single merge request.
    ReviewMr {
        #[arg(long)]
        project_id: String,
        #[arg(long)]
        mr_iid: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RuntimeConfig::from_env();
    init_logging(&config)?;

    let args = CliArgs::parse();

    match args.command {
        Command::Doctor => {
            println!("database:          {:?}", config.database);
            println!("auth:              {:?}", config.auth);
            println!("sqlite_dir:        {}", config.sqlite_dir.display());
            println!("gitlab configured: {}", config.has_gitlab_integration());
        }
        Command::StartAgent { user_id, name, prompt } => {
            let repos = build_repositories(&config)?;

            // No real vendor LLM provider is wired here (see lib.rs doc
            // comment); an unconfigured composite with zero providers
            // surfaces `AllProvidersFailed` on the first planning call,
            // which is the correct behavior for a boot-time smoke test
            // run with no provider credentials at all.
            let llm = Arc::new(agentkit_llm::CompositeLlm::new(Vec::new()));

            let deps = RunnerDeps {
                store: repos.agent_state.clone(),
                llm_calls: repos.llm_calls.clone(),
                llm,
                functions: FunctionRegistry::new(),
                completed_handlers: CompletedHandlerRegistry::new(),
            };
            let runner = Arc::new(AgentRunner::new(deps));

            let mut ctx = AgentContext::new(user_id, AgentType::Codegen, name, prompt.clone(), prompt);

            // §6.4: every agent gets a working directory under the shared
            // system directory, keyed by its id. `fileSystem` on the
            // context (§3.1) is a snapshot of that path, not a live handle;
            // the directory itself is only entered for the duration of the
            // driving loop below, via the scoped-acquisition guard.
            let working_dir = agentkit_core::agent_working_dir(&agentkit_core::system_dir(), &ctx.agent_id);
            std::fs::create_dir_all(&working_dir).map_err(|source| agentkit_runtime::RuntimeError::WorkingDirScope {
                path: working_dir.display().to_string(),
                source,
            })?;
            ctx.file_system = Some(working_dir.display().to_string());
            repos.agent_state.save(&ctx).await?;

            let outcome = {
                let _scope = WorkingDirScope::enter(&working_dir)?;
                runner.run_to_next_gate(&ctx.agent_id).await?
            };
            println!("agent {} reached {outcome:?}", ctx.agent_id);
        }
        Command::ReviewMr { project_id, mr_iid } => {
            let repos = build_repositories(&config)?;
            let source_control = build_source_control(&config);
            let llm = Arc::new(agentkit_llm::CompositeLlm::new(Vec::new()));

            let engine = ReviewEngine::new(
                source_control,
                repos.review_config.clone(),
                repos.review_cache.clone(),
                llm,
                repos.llm_calls.clone(),
            );

            let summary = engine.review_merge_request(&project_id, mr_iid).await?;
            println!("{summary:?}");
        }
    }

    Ok(())
}
