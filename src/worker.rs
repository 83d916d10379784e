use std::sync::Arc;

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;

use crate::queue::{ExecutionMessage, ExecutionQueue};
use crate::sandbox::SandboxRunner;

pub async fn worker(
    id: u8,
    runner: Arc<dyn SandboxRunner>,
    queue: Arc<ExecutionQueue>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    log::info!("Worker {id} initialized");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker {id} received shutdown signal, stopping");
                break;
            }

            job_message = queue.pop() => {
                let ExecutionMessage { id: job_id, submission, language, responder } = job_message;

                // 1. Skip work nobody is waiting for anymore
                if responder.is_closed() {
                    log::info!("Execution {job_id} abandoned by its client, skipped");
                    continue;
                }
                log::info!("Worker {id} got execution {job_id} ({}) from queue", language.name);

                // 2. Spawn blocking runner and get its handle
                let runner_ref = Arc::clone(&runner);
                let result_handle = tokio::task::spawn_blocking(move || {
                    let result = runner_ref.execute(&submission, &language);
                    log::info!("Execution {job_id} finished on worker {id}");

                    result
                });

                // 3. Give back control to the runtime until execution is done
                let result = match result_handle.await {
                    Ok(result) => result,
                    Err(e) => Err(anyhow!("Runner task failed: {e}")),
                };
                if let Err(e) = &result {
                    log::error!("Execution {job_id} failed on worker {id}: {e:#}");
                }

                if responder.send(result).is_err() {
                    log::warn!("Failed to send execution {job_id} result back to server");
                } else {
                    log::debug!("Execution {job_id} result sent back from worker {id}");
                }
            }
        };
    }

    log::info!("Worker {id} has shut down gracefully");
    Ok(())
}
