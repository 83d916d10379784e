use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, test, web};
use assert_json_diff::assert_json_include;
use pretty_assertions::assert_eq;
use serde_json::json;

use coderun::config::{ByteSize, LimitsConfig, default_languages};
use coderun::queue::ExecutionQueue;
use coderun::routes::configure;
use coderun::sandbox::{ExecutionOutcome, ProcessOutput, Stage};
use coderun::toolchain::{Language, ToolchainTable};
use coderun::web_server::json_config;

// Mock runner that echoes the submission back instead of executing it
async fn mock_worker(queue: Arc<ExecutionQueue>) {
    loop {
        let message = queue.pop().await;
        println!("Mock worker received execution: {}", message.id);

        let result = match message.submission.code.as_str() {
            "infra failure" => Err(anyhow::anyhow!("Failed to spawn `python3`: not found")),
            "compile failure" => Ok(ExecutionOutcome {
                stage: Stage::Compile,
                process: ProcessOutput {
                    stderr: "error: expected ';'\n".to_string(),
                    exit_code: Some(1),
                    ..Default::default()
                },
            }),
            code => Ok(ExecutionOutcome {
                stage: Stage::Run,
                process: ProcessOutput {
                    stdout: format!(
                        "{}:{}:{}",
                        message.language.name, code, message.submission.input
                    ),
                    exit_code: Some(0),
                    elapsed: Duration::from_millis(5),
                    ..Default::default()
                },
            }),
        };

        let _ = message.responder.send(result);
    }
}

fn test_limits() -> LimitsConfig {
    LimitsConfig {
        max_code_size: ByteSize(64),
        ..Default::default()
    }
}

macro_rules! init_app {
    ($queue:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(ToolchainTable::new(default_languages())))
                .app_data(web::Data::new(test_limits()))
                .app_data(web::Data::from($queue))
                .app_data(json_config(&test_limits()))
                .configure(configure),
        )
        .await
    };
}

#[actix_web::test]
async fn test_index() {
    let queue = Arc::new(ExecutionQueue::new(4));
    let app = init_app!(queue);

    let req = test::TestRequest::get().uri("/").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "message": "Code runner API is running" }));
}

#[actix_web::test]
async fn test_list_languages() {
    let queue = Arc::new(ExecutionQueue::new(4));
    let app = init_app!(queue);

    let req = test::TestRequest::get().uri("/api/code/languages").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(
        body,
        json!([
            { "name": "python", "file_name": "main.py", "compiled": false },
            { "name": "java", "file_name": "Main.java", "compiled": true },
            { "name": "cpp", "file_name": "main.cpp", "compiled": true },
        ])
    );
}

#[actix_web::test]
async fn test_execute_success() {
    let queue = Arc::new(ExecutionQueue::new(4));
    tokio::spawn(mock_worker(queue.clone()));
    let app = init_app!(queue);

    let req = test::TestRequest::post()
        .uri("/api/code/execute")
        .set_json(json!({ "code": "print(1)", "language": "python", "input": "7" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_include!(
        actual: body.clone(),
        expected: json!({
            "output": "python:print(1):7",
            "error": null,
            "exit_code": 0,
            "truncated": false
        })
    );
    assert!(body["time_ms"].is_number());
}

#[actix_web::test]
async fn test_execute_routes_each_language() {
    let queue = Arc::new(ExecutionQueue::new(4));
    tokio::spawn(mock_worker(queue.clone()));
    let app = init_app!(queue);

    for language in [Language::Python, Language::Java, Language::Cpp] {
        let req = test::TestRequest::post()
            .uri("/api/code/execute")
            .set_json(json!({ "code": "x", "language": language.as_str() }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["output"], format!("{language}:x:"));
    }
}

#[actix_web::test]
async fn test_execute_compile_failure() {
    let queue = Arc::new(ExecutionQueue::new(4));
    tokio::spawn(mock_worker(queue.clone()));
    let app = init_app!(queue);

    let req = test::TestRequest::post()
        .uri("/api/code/execute")
        .set_json(json!({ "code": "compile failure", "language": "cpp" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "error: expected ';'\n");
    assert!(body.get("output").is_none());
}

#[actix_web::test]
async fn test_execute_infrastructure_failure() {
    let queue = Arc::new(ExecutionQueue::new(4));
    tokio::spawn(mock_worker(queue.clone()));
    let app = init_app!(queue);

    let req = test::TestRequest::post()
        .uri("/api/code/execute")
        .set_json(json!({ "code": "infra failure", "language": "python" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 500);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(
        body,
        json!({ "error": "Failed to spawn `python3`: not found" })
    );
}

#[actix_web::test]
async fn test_execute_unsupported_language() {
    let queue = Arc::new(ExecutionQueue::new(4));
    let app = init_app!(queue.clone());

    for language in ["rust", "Python", ""] {
        let req = test::TestRequest::post()
            .uri("/api/code/execute")
            .set_json(json!({ "code": "fn main() {}", "language": language }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({ "error": "Unsupported language" }));
    }

    assert!(queue.is_empty().await);
}

#[actix_web::test]
async fn test_execute_invalid_json() {
    let queue = Arc::new(ExecutionQueue::new(4));
    let app = init_app!(queue);

    let req = test::TestRequest::post()
        .uri("/api/code/execute")
        .insert_header(("content-type", "application/json"))
        .set_payload(r#"{ "language": "python" "#)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "error": "Invalid request body" }));
}

#[actix_web::test]
async fn test_execute_missing_code() {
    let queue = Arc::new(ExecutionQueue::new(4));
    let app = init_app!(queue);

    let req = test::TestRequest::post()
        .uri("/api/code/execute")
        .set_json(json!({ "language": "python" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_execute_code_too_large() {
    let queue = Arc::new(ExecutionQueue::new(4));
    let app = init_app!(queue.clone());

    let req = test::TestRequest::post()
        .uri("/api/code/execute")
        .set_json(json!({ "code": "#".repeat(65), "language": "python" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 413);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "error": "Code too large" }));
    assert!(queue.is_empty().await);
}

#[actix_web::test]
async fn test_execute_body_over_json_limit() {
    let queue = Arc::new(ExecutionQueue::new(4));
    let app = init_app!(queue.clone());

    // Far past 2 * max_code_size plus the JSON overhead
    let req = test::TestRequest::post()
        .uri("/api/code/execute")
        .set_json(json!({ "code": "#".repeat(64 * 1024), "language": "python" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 413);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "error": "Code too large" }));
    assert!(queue.is_empty().await);
}

#[actix_web::test]
async fn test_execute_queue_full() {
    let queue = Arc::new(ExecutionQueue::new(0));
    let app = init_app!(queue);

    let req = test::TestRequest::post()
        .uri("/api/code/execute")
        .set_json(json!({ "code": "print(1)", "language": "python" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "error": "Server busy" }));
}
