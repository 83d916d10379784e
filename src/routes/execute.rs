use actix_web::{HttpResponse, Responder, post, web};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::ErrorResponse;
use crate::config::LimitsConfig;
use crate::queue::{ExecutionMessage, ExecutionQueue};
use crate::sandbox::{ExecutionOutcome, Stage, Submission};
use crate::toolchain::ToolchainTable;

pub const EXECUTION_FAILED: &str = "Execution failed";
pub const TIME_LIMIT_EXCEEDED: &str = "Time Limit Exceeded";

#[derive(Serialize, Deserialize, Debug)]
pub struct ExecuteRequest {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub input: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct ExecuteResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub time_ms: u64,
    pub truncated: bool,
}

impl From<ExecutionOutcome> for ExecuteResponse {
    fn from(outcome: ExecutionOutcome) -> Self {
        let ExecutionOutcome { stage, process } = outcome;
        let time_ms = process.elapsed.as_millis() as u64;

        match stage {
            // Compiler diagnostics go to the client verbatim
            Stage::Compile => {
                let mut error = [process.stderr, process.stdout]
                    .into_iter()
                    .find(|s| !s.is_empty())
                    .unwrap_or_else(|| EXECUTION_FAILED.to_string());
                if process.timed_out {
                    error = append_line(error, &format!("{TIME_LIMIT_EXCEEDED} during compilation"));
                }

                Self {
                    output: None,
                    error: Some(error),
                    exit_code: process.exit_code,
                    time_ms,
                    truncated: process.truncated,
                }
            }
            Stage::Run => {
                let output = if process.stdout.is_empty() {
                    process.stderr.clone()
                } else {
                    process.stdout
                };

                let mut error = (!process.stderr.is_empty()).then_some(process.stderr);
                if process.timed_out {
                    error = Some(match error {
                        Some(stderr) => append_line(stderr, TIME_LIMIT_EXCEEDED),
                        None => TIME_LIMIT_EXCEEDED.to_string(),
                    });
                } else if error.is_none() && process.exit_code != Some(0) {
                    error = Some(match process.exit_code {
                        Some(code) => format!("Process exited with code {code}"),
                        None => "Process was terminated by a signal".to_string(),
                    });
                }

                Self {
                    output: Some(output),
                    error,
                    exit_code: process.exit_code,
                    time_ms,
                    truncated: process.truncated,
                }
            }
        }
    }
}

fn append_line(mut text: String, line: &str) -> String {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(line);
    text
}

#[post("/execute")]
pub async fn execute_handler(
    queue: web::Data<ExecutionQueue>,
    toolchains: web::Data<ToolchainTable>,
    limits: web::Data<LimitsConfig>,
    body: web::Json<ExecuteRequest>,
) -> impl Responder {
    let ExecuteRequest {
        code,
        language,
        input,
    } = body.into_inner();

    let Some(toolchain) = toolchains.resolve(&language) else {
        log::info!("Rejected execution in unsupported language {language:?}");
        return HttpResponse::BadRequest().json(ErrorResponse::new("Unsupported language"));
    };

    if code.len() as u64 > limits.max_code_size.0 {
        return HttpResponse::PayloadTooLarge().json(ErrorResponse::new("Code too large"));
    }

    let (tx, rx) = oneshot::channel();
    let job_id = queue.next_id();
    let job_message = ExecutionMessage {
        id: job_id,
        submission: Submission {
            code,
            input: input.unwrap_or_default(),
        },
        language: toolchain.clone(),
        responder: tx,
    };

    if queue.push(job_message).await.is_err() {
        log::warn!("Execution queue full, rejected execution {job_id}");
        return HttpResponse::ServiceUnavailable().json(ErrorResponse::new("Server busy"));
    }
    log::debug!("Sent execution {job_id} ({}) to queue", toolchain.name);

    match rx.await {
        Ok(Ok(outcome)) => {
            log::info!("Received result of execution {job_id}");
            HttpResponse::Ok().json(ExecuteResponse::from(outcome))
        }
        Ok(Err(e)) => HttpResponse::InternalServerError().json(ErrorResponse::new(e.to_string())),
        Err(e) => {
            log::error!("Failed to receive execution {job_id} response: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse::new("Execution was dropped"))
        }
    }
}
