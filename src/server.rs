//! HTTP surface over the judger
//!
//! JSON in, JSON out. Validation and language errors map to 400, anything
//! else to 500; program failures are ordinary 200 responses.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::error::Error;
use crate::judger::{normalize_output, CheckVerdict, Judger, TestCase};
use crate::languages::LanguageRegistry;

pub struct AppState {
    pub judger: Judger,
    pub registry: Arc<LanguageRegistry>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/languages", get(list_languages))
        .route("/api/execute", post(execute_code))
        .route("/api/check", post(check_code))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub inputs: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub success: bool,
    pub message: String,
    /// stdout followed by stderr
    pub output: String,
    pub error: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

#[derive(Debug, Deserialize)]
pub struct TestCaseBody {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub expected_output: String,
    #[serde(default)]
    pub is_hidden: bool,
    /// Milliseconds
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub tests: Vec<TestCaseBody>,
}

#[derive(Debug, Serialize)]
pub struct TestResultBody {
    pub test_number: usize,
    pub passed: bool,
    /// Input, expected and produced output are withheld for hidden tests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub success: bool,
    pub message: String,
    pub test_results: Vec<TestResultBody>,
    pub total_tests: usize,
    pub passed_tests: usize,
}

/// Error body shared by every route
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            error!("Request failed: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: format!("Invalid JSON: {}", rejection.body_text()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "executor": state.judger.executor_name(),
    }))
}

pub async fn list_languages(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "languages": state.registry.languages(),
    }))
}

pub async fn execute_code(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let Json(req) = body?;

    let result = state
        .judger
        .execute(&req.code, &req.language, req.inputs)
        .await?;

    let success = result.is_success();
    let message = match &result.failure_reason {
        Some(reason) => reason.clone(),
        None if success => "Code executed successfully".to_string(),
        None => format!("Execution failed with exit code {}", result.exit_code),
    };

    Ok(Json(ExecuteResponse {
        success,
        message,
        output: format!("{}{}", result.stdout, result.stderr),
        error: result.failure_reason.unwrap_or_default(),
        exit_code: result.exit_code,
        timed_out: result.timed_out,
    }))
}

pub async fn check_code(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CheckRequest>, JsonRejection>,
) -> Result<Json<CheckResponse>, ApiError> {
    let Json(req) = body?;

    let tests: Vec<TestCase> = req
        .tests
        .iter()
        .map(|t| TestCase {
            input: t.input.clone(),
            expected_output: t.expected_output.clone(),
            is_hidden: t.is_hidden,
            timeout: t.timeout.map(Duration::from_millis),
        })
        .collect();

    let verdict = state.judger.check(&req.code, &req.language, &tests).await?;

    Ok(Json(check_response(&req.tests, verdict)))
}

fn check_response(tests: &[TestCaseBody], verdict: CheckVerdict) -> CheckResponse {
    let message = verdict.message().to_string();
    let test_results = verdict
        .results
        .into_iter()
        .zip(tests)
        .map(|(result, test)| {
            let visible = |value: String| (!result.hidden).then_some(value);
            TestResultBody {
                test_number: result.index,
                passed: result.passed,
                input: visible(test.input.clone()),
                actual: visible(normalize_output(&result.actual_output).to_string()),
                output: visible(result.actual_output.clone()),
                expected: visible(result.expected_output.clone()),
                error: result.error.clone(),
                timed_out: result.timed_out,
                is_hidden: result.hidden,
                timeout: test.timeout,
            }
        })
        .collect();

    CheckResponse {
        success: verdict.all_passed,
        message,
        test_results,
        total_tests: verdict.total_count,
        passed_tests: verdict.passed_count,
    }
}
