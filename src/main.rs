use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use coderun::config::CliArgs;
use coderun::queue::ExecutionQueue;
use coderun::sandbox::{SandboxRunner, create_sandbox_runner};
use coderun::toolchain::ToolchainTable;
use coderun::web_server::build_server;
use coderun::worker::worker;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let n_workers = cli.workers;

    if n_workers == 0 {
        bail!("The number of workers must not be 0");
    }

    let config = cli.to_config().context("Failed to load configuration")?;
    let scratch_root = config.scratch_root();
    std::fs::create_dir_all(&scratch_root)
        .with_context(|| format!("Failed to create {}", scratch_root.display()))?;

    let queue = Arc::new(ExecutionQueue::new(config.limits.max_queue));
    let shutdown_token = CancellationToken::new();

    let mut runners: Vec<Arc<dyn SandboxRunner>> = Vec::with_capacity(n_workers as usize);
    for i in 1..=n_workers {
        let runner = create_sandbox_runner(i, cli.sandbox, &scratch_root, &config.limits)
            .with_context(|| format!("Failed to build runner {i}"))?;
        runners.push(Arc::from(runner));
    }

    // ======= PREPARATION END, EXECUTION START =======

    let mut workers = JoinSet::new();
    for (i, runner) in (1..=n_workers).zip(runners) {
        workers.spawn(worker(i, runner, queue.clone(), shutdown_token.clone()));
    }

    let server = build_server(
        config.server,
        ToolchainTable::new(config.languages),
        config.limits,
        queue,
    )
    .context("Failed to build server")?;

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
        Some(res_worker) = workers.join_next() => {
            log::error!("A worker terminated unexpectedly: {:?}", res_worker);
        }
    }

    // 1. Shutdown actix-web server gracefully
    server_handle.stop(true).await;

    // 2. Broadcast shutdown signal to workers
    shutdown_token.cancel();
    log::info!("Shutdown signal sent to workers, waiting for them to finish...");

    // 3. Wait until every worker terminates
    while let Some(res) = workers.join_next().await {
        match res {
            Ok(Err(e)) => log::error!("Worker finished with error: {e:#}"),
            Err(e) if e.is_panic() => log::error!("Worker handle panicked: {:?}", e),
            Err(e) => log::error!("Worker handle finished with error: {:?}", e),
            Ok(Ok(())) => {}
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}
