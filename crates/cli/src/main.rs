//! zenmcp server binary.

mod bootstrap;
mod config;
mod env;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use gateway::Dispatcher;
use memory::ConversationStore;
use tools::{ToolContext, builtin_tools};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::env::EnvFile;

/// Interval between background conversation gc passes.
const GC_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Parser)]
#[command(name = "zenmcp", about = "AI tool server speaking a stdio transport")]
struct Args {
    /// Validate configuration and manifests, then exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let env_file = EnvFile::load();

    let config = match ServerConfig::from_env(&env_file) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with_writer(std::io::stderr)
        .init();

    let policy = Arc::new(providers::RestrictionPolicy::from_env_lookup(|key| {
        env_file.get(key)
    }));
    let (registry, catalogs) = match bootstrap::build_registry(&env_file, Arc::clone(&policy)) {
        Ok(built) => built,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };
    policy.warn_unknown_tokens(&catalogs);

    if args.check {
        let providers = registry.registered_providers();
        let models: usize = catalogs.values().map(|m| m.len()).sum();
        println!(
            "configuration OK: {} provider(s), {} model(s)",
            providers.len(),
            models
        );
        return ExitCode::SUCCESS;
    }

    let store = Arc::new(ConversationStore::new(config.store.clone()));
    let gc_store = Arc::clone(&store);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(GC_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            gc_store.gc();
        }
    });

    let ctx = ToolContext {
        registry: Arc::new(registry),
        store,
        defaults: config.tool_defaults(),
    };
    let dispatcher = Arc::new(Dispatcher::new(ctx, builtin_tools(), &config.disabled_tools));
    info!(
        tools = dispatcher.list_tools().len(),
        "zenmcp server starting"
    );

    match gateway::serve(dispatcher).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "transport loop failed");
            ExitCode::FAILURE
        }
    }
}
