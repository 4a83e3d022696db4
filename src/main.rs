//! # Tickflow — in-process task scheduler
//!
//! Loads the config, registers the bundled workflows, runs the scheduler loop
//! for a bounded time and prints what happened to every task.
//!
//! Usage:
//!   tickflow                              # Run the loop for 10s with ~/.tickflow/config.toml
//!   tickflow --demo                       # Submit the sample tasks first
//!   tickflow --config ./tickflow.toml --run-secs 60

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tickflow_core::TickflowConfig;
use tickflow_scheduler::{SchedulerEngine, TaskStatus};
use tickflow_workflows::{CodeCheckWorkflow, NotifyWorkflow};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tickflow", version, about = "⏱️ Tickflow — in-process task scheduler")]
struct Cli {
    /// Config file (defaults to ~/.tickflow/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Seconds to run the scheduler loop before shutting down
    #[arg(long, default_value = "10")]
    run_secs: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Submit the sample tasks before starting
    #[arg(long)]
    demo: bool,
}

fn load_config(path: Option<&str>) -> Result<TickflowConfig> {
    let config = match path {
        Some(p) => TickflowConfig::load_from(std::path::Path::new(&shellexpand::tilde(p).to_string()))?,
        None => TickflowConfig::load()?,
    };
    Ok(config)
}

fn submit_demo_tasks(engine: &SchedulerEngine) {
    engine.submit_task_default(
        NotifyWorkflow::NAME,
        serde_json::json!({
            "title": "Welcome",
            "body": "Your account is ready.",
            "to": "alice@example.com"
        }),
    );
    engine.submit_task_default(
        NotifyWorkflow::NAME,
        serde_json::json!({
            "title": "Reminder",
            "body": "Weekly report is due on Friday.",
            "to": "bob@example.com"
        }),
    );
    // No workflow handles this type; it must end up FAILED.
    engine.submit_task_default("unknown-task", serde_json::json!({}));
}

fn print_summary(engine: &SchedulerEngine) {
    let counts = engine.counts();
    println!();
    println!("📊 Task summary ({} total)", counts.total());
    println!("   ⏳ Pending:   {}", counts.pending);
    println!("   🏃 Running:   {}", counts.running);
    println!("   🔁 Retrying:  {}", counts.retrying);
    println!("   ✅ Completed: {}", counts.completed);
    println!("   ❌ Failed:    {}", counts.failed);

    for task in engine.list_tasks() {
        let detail = match task.status {
            TaskStatus::Failed | TaskStatus::Retrying => task.error.clone().unwrap_or_default(),
            _ => String::new(),
        };
        println!(
            "   • {} [{}] {} (retries {}/{}) {}",
            &task.id[..8.min(task.id.len())],
            task.task_type,
            task.status,
            task.retry_count,
            task.max_retries,
            detail
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "tickflow=debug,tickflow_scheduler=debug,tickflow_workflows=debug,tickflow_core=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref())?;

    let engine = Arc::new(SchedulerEngine::from_config(&config.scheduler));
    engine.register_workflow(Arc::new(NotifyWorkflow::new(config.notify.clone())));
    engine.register_workflow(Arc::new(CodeCheckWorkflow::new(config.code_check.clone())));

    println!("⏱️  Tickflow v{}", env!("CARGO_PKG_VERSION"));
    println!("   🔄 Poll interval: {:?}", engine.poll_interval());
    println!("   🧩 Workflows:     {}", engine.registry().names().join(", "));
    println!("   ⏲️  Run time:      {}s", cli.run_secs);
    println!();

    if cli.demo {
        submit_demo_tasks(&engine);
    }

    engine.start();

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(cli.run_secs)) => {
            tracing::info!("⏲️ Run time elapsed, shutting down");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("🛑 Interrupted, shutting down");
        }
    }

    engine.stop_and_wait().await;
    print_summary(&engine);

    Ok(())
}
