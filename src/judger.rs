//! Judger module for checking submissions against test cases
//!
//! This module runs a submission once per test case through the injected
//! executor, normalizes and compares outputs, and aggregates a verdict.
//! Test cases run sequentially; a failing case never stops the others.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::executor::{ExecutionRequest, ExecutionResult, Executor};
use crate::languages::LanguageRegistry;

/// One input/expected-output pair
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TestCase {
    /// Program input, possibly empty or multi-line
    pub input: String,
    pub expected_output: String,
    pub is_hidden: bool,
    /// Overrides the language's default wall-clock limit
    pub timeout: Option<Duration>,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
            ..Default::default()
        }
    }
}

/// Outcome of one test case
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    /// 1-based position in the submitted test list
    pub index: usize,
    pub passed: bool,
    /// Raw stdout of the program
    pub actual_output: String,
    pub expected_output: String,
    pub error: Option<String>,
    pub timed_out: bool,
    pub hidden: bool,
}

/// Aggregate result of a check
#[derive(Debug, Clone, PartialEq)]
pub struct CheckVerdict {
    pub all_passed: bool,
    pub results: Vec<TestResult>,
    pub passed_count: usize,
    pub total_count: usize,
}

impl CheckVerdict {
    fn from_results(results: Vec<TestResult>) -> Self {
        let passed_count = results.iter().filter(|r| r.passed).count();
        Self {
            all_passed: results.iter().all(|r| r.passed),
            passed_count,
            total_count: results.len(),
            results,
        }
    }

    /// Human-readable summary
    pub fn message(&self) -> &'static str {
        if self.all_passed {
            "All tests passed!"
        } else {
            "Some tests failed"
        }
    }
}

/// Strip leading and trailing whitespace only
pub fn normalize_output(output: &str) -> &str {
    output.trim()
}

/// Runs submissions through one executor
#[derive(Clone)]
pub struct Judger {
    executor: Arc<dyn Executor>,
    registry: Arc<LanguageRegistry>,
}

impl Judger {
    pub fn new(executor: Arc<dyn Executor>, registry: Arc<LanguageRegistry>) -> Self {
        Self { executor, registry }
    }

    pub fn executor_name(&self) -> &'static str {
        self.executor.name()
    }

    /// Run `code` against every test case in order
    pub async fn check(&self, code: &str, language: &str, tests: &[TestCase]) -> Result<CheckVerdict> {
        validate(code, language)?;
        if tests.is_empty() {
            return Err(Error::NoTests);
        }
        let profile = self.registry.resolve(language)?;

        info!(
            "Checking {} code, length: {} chars, tests: {}",
            profile.name,
            code.len(),
            tests.len()
        );

        let mut results = Vec::with_capacity(tests.len());
        // Every test of a submission that does not compile fails the same way
        let mut compile_failure: Option<ExecutionResult> = None;

        for (i, test) in tests.iter().enumerate() {
            let index = i + 1;

            let outcome = match &compile_failure {
                Some(failed) => Ok(failed.clone()),
                None => {
                    let request = ExecutionRequest::new(code, profile.name.as_str())
                        .with_stdin(split_input(&test.input))
                        .with_timeout(test.timeout);
                    self.executor.execute(&request).await
                }
            };

            let result = match outcome {
                Ok(execution) => {
                    if execution.compilation_failed && compile_failure.is_none() {
                        info!("Compilation failed, reusing the result for remaining tests");
                        compile_failure = Some(execution.clone());
                    }
                    evaluate(index, test, execution)
                }
                Err(e) => {
                    warn!("Test {} execution error: {}", index, e);
                    TestResult {
                        index,
                        passed: false,
                        actual_output: String::new(),
                        expected_output: test.expected_output.clone(),
                        error: Some(e.to_string()),
                        timed_out: false,
                        hidden: test.is_hidden,
                    }
                }
            };

            debug!(
                "Test {}: passed={}, timed_out={}",
                index, result.passed, result.timed_out
            );
            results.push(result);
        }

        let verdict = CheckVerdict::from_results(results);
        info!(
            "Check completed - success: {}, passed: {}/{}",
            verdict.all_passed, verdict.passed_count, verdict.total_count
        );

        Ok(verdict)
    }

    /// Run `code` once with the given stdin lines, without verification
    pub async fn execute(&self, code: &str, language: &str, stdin: Vec<String>) -> Result<ExecutionResult> {
        validate(code, language)?;
        let profile = self.registry.resolve(language)?;

        info!(
            "Executing {} code, length: {} chars, inputs: {}",
            profile.name,
            code.len(),
            stdin.len()
        );

        let request = ExecutionRequest::new(code, profile.name.as_str()).with_stdin(stdin);
        self.executor.execute(&request).await
    }
}

fn validate(code: &str, language: &str) -> Result<()> {
    if code.trim().is_empty() {
        return Err(Error::EmptyCode);
    }
    if language.trim().is_empty() {
        return Err(Error::EmptyLanguage);
    }
    Ok(())
}

fn split_input(input: &str) -> Vec<String> {
    input.lines().map(|line| line.to_string()).collect()
}

fn evaluate(index: usize, test: &TestCase, execution: ExecutionResult) -> TestResult {
    let matches = normalize_output(&execution.stdout) == normalize_output(&test.expected_output);
    let passed = matches && execution.failure_reason.is_none() && !execution.timed_out;

    let error = match execution.failure_reason {
        Some(reason) => Some(reason),
        None if execution.exit_code != 0 => {
            let stderr = execution.stderr.trim();
            if stderr.is_empty() {
                Some(format!("exited with status {}", execution.exit_code))
            } else {
                Some(stderr.to_string())
            }
        }
        None => None,
    };

    TestResult {
        index,
        passed,
        actual_output: execution.stdout,
        expected_output: test.expected_output.clone(),
        error,
        timed_out: execution.timed_out,
        hidden: test.is_hidden,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{LocalExecutor, MockExecutor};
    use mockall::Sequence;
    use std::time::Instant;
    use tokio_test::assert_ok;

    fn registry() -> Arc<LanguageRegistry> {
        Arc::new(LanguageRegistry::builtin().unwrap())
    }

    fn has_python() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn stdout(s: &str) -> ExecutionResult {
        ExecutionResult {
            stdout: s.to_string(),
            ..Default::default()
        }
    }

    /// Answers each request with the sum of its stdin lines
    fn adding_executor() -> MockExecutor {
        let mut mock = MockExecutor::new();
        mock.expect_name().return_const("mock");
        mock.expect_execute().returning(|req| {
            let sum: i64 = req.stdin.iter().filter_map(|l| l.trim().parse::<i64>().ok()).sum();
            Ok(stdout(&format!("{}\n", sum)))
        });
        mock
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output(" x\n"), normalize_output("x"));
        assert_eq!(normalize_output("a  b\n\n"), "a  b");
        for s in ["", "  ", "\tx y \r\n", "line1\nline2\n"] {
            assert_eq!(normalize_output(normalize_output(s)), normalize_output(s));
        }
    }

    #[test]
    fn test_split_input() {
        assert!(split_input("").is_empty());
        assert_eq!(split_input("5\n3"), vec!["5", "3"]);
        assert_eq!(split_input("10\r\n20\n"), vec!["10", "20"]);
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let mut mock = MockExecutor::new();
        mock.expect_execute().never();
        let judger = Judger::new(Arc::new(mock), registry());
        let tests = vec![TestCase::new("", "x")];

        let err = judger.check("  ", "python", &tests).await.unwrap_err();
        assert!(matches!(err, Error::EmptyCode));

        let err = judger.check("print(1)", "", &tests).await.unwrap_err();
        assert!(matches!(err, Error::EmptyLanguage));

        let err = judger.check("print(1)", "python", &[]).await.unwrap_err();
        assert!(matches!(err, Error::NoTests));

        let err = judger.execute("", "python", vec![]).await.unwrap_err();
        assert!(err.is_invalid_request());
    }

    #[tokio::test]
    async fn test_unsupported_language_runs_nothing() {
        let mut mock = MockExecutor::new();
        mock.expect_execute().never();
        let judger = Judger::new(Arc::new(mock), registry());

        let err = judger
            .check("+[]", "brainfuck", &[TestCase::new("", "")])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnsupportedLanguage(ref l) if l == "brainfuck"));
    }

    #[tokio::test]
    async fn test_requests_use_canonical_language_and_split_input() {
        let mut mock = MockExecutor::new();
        mock.expect_execute()
            .withf(|req| {
                req.language == "python"
                    && req.stdin == ["5", "3"]
                    && req.timeout == Some(Duration::from_secs(2))
            })
            .times(1)
            .returning(|_| Ok(stdout("8\n")));
        let judger = Judger::new(Arc::new(mock), registry());

        let test = TestCase {
            timeout: Some(Duration::from_secs(2)),
            ..TestCase::new("5\n3", "8")
        };
        let verdict = assert_ok!(judger.check("print(8)", "Python3", &[test]).await);

        assert!(verdict.all_passed);
    }

    #[tokio::test]
    async fn test_mixed_results_and_counts() {
        let judger = Judger::new(Arc::new(adding_executor()), registry());
        let tests = vec![
            TestCase::new("5\n3", "8"),
            TestCase::new("10\n20", "31"),
            TestCase::new("1\n1", "  2\n"),
        ];

        let verdict = judger.check("code", "python", &tests).await.unwrap();

        assert!(!verdict.all_passed);
        assert_eq!(verdict.passed_count, 2);
        assert_eq!(verdict.total_count, 3);
        assert_eq!(verdict.message(), "Some tests failed");
        let indexes: Vec<usize> = verdict.results.iter().map(|r| r.index).collect();
        assert_eq!(indexes, [1, 2, 3]);
        assert!(!verdict.results[1].passed);
        assert_eq!(verdict.results[1].actual_output, "30\n");
        assert_eq!(verdict.results[1].expected_output, "31");
    }

    #[tokio::test]
    async fn test_check_is_deterministic() {
        let judger = Judger::new(Arc::new(adding_executor()), registry());
        let tests = vec![TestCase::new("5\n3", "8"), TestCase::new("1", "2")];

        let first = judger.check("code", "python", &tests).await.unwrap();
        let second = judger.check("code", "python", &tests).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_executor_errors_do_not_abort() {
        let mut seq = Sequence::new();
        let mut mock = MockExecutor::new();
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(Error::io(
                    "Failed to create staging directory",
                    std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                ))
            });
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(stdout("ok\n")));
        let judger = Judger::new(Arc::new(mock), registry());

        let tests = vec![TestCase::new("", "ok"), TestCase::new("", "ok")];
        let verdict = judger.check("print('ok')", "python", &tests).await.unwrap();

        assert_eq!(verdict.results.len(), 2);
        assert!(!verdict.results[0].passed);
        assert_eq!(
            verdict.results[0].error.as_deref(),
            Some("Failed to create staging directory: disk full")
        );
        assert!(verdict.results[1].passed);
        assert_eq!(verdict.passed_count, 1);
    }

    #[tokio::test]
    async fn test_compile_failure_reused_for_every_test() {
        let mut mock = MockExecutor::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Ok(ExecutionResult::compile_error("main.cpp:2: error: expected ';'\n")));
        let judger = Judger::new(Arc::new(mock), registry());

        let tests = vec![
            TestCase::new("1", "1"),
            TestCase::new("2", "2"),
            TestCase::new("3", "3"),
        ];
        let verdict = judger
            .check("int main() { return 0 }", "cpp", &tests)
            .await
            .unwrap();

        assert!(!verdict.all_passed);
        assert_eq!(verdict.passed_count, 0);
        assert_eq!(verdict.results.len(), 3);
        for result in &verdict.results {
            assert!(result.error.as_deref().unwrap().contains("expected ';'"));
        }
    }

    #[tokio::test]
    async fn test_timeout_never_passes() {
        let mut mock = MockExecutor::new();
        mock.expect_execute()
            .returning(|_| Ok(ExecutionResult::timeout(Duration::from_secs(2))));
        let judger = Judger::new(Arc::new(mock), registry());

        // Empty expected output would otherwise match the empty stdout
        let verdict = judger
            .check("while True: pass", "python", &[TestCase::new("", "")])
            .await
            .unwrap();

        let result = &verdict.results[0];
        assert!(result.timed_out);
        assert!(!result.passed);
        assert_eq!(result.error.as_deref(), Some("execution timeout (2s)"));
    }

    #[tokio::test]
    async fn test_runtime_error_is_reported() {
        let mut mock = MockExecutor::new();
        mock.expect_execute().returning(|_| {
            Ok(ExecutionResult {
                exit_code: 1,
                stderr: "ZeroDivisionError: division by zero\n".to_string(),
                ..Default::default()
            })
        });
        let judger = Judger::new(Arc::new(mock), registry());

        let verdict = judger
            .check("print(1/0)", "python", &[TestCase::new("", "1")])
            .await
            .unwrap();

        assert!(!verdict.all_passed);
        assert_eq!(
            verdict.results[0].error.as_deref(),
            Some("ZeroDivisionError: division by zero")
        );
    }

    #[tokio::test]
    async fn test_hidden_flag_carried() {
        let judger = Judger::new(Arc::new(adding_executor()), registry());
        let hidden = TestCase {
            is_hidden: true,
            ..TestCase::new("2\n2", "4")
        };

        let verdict = judger.check("code", "python", &[hidden]).await.unwrap();

        assert!(verdict.results[0].hidden);
        assert!(verdict.all_passed);
        assert_eq!(verdict.message(), "All tests passed!");
    }

    #[tokio::test]
    async fn test_sandbox_down_still_yields_verdict() {
        use crate::executor::ExecutorSelector;

        let local: Arc<dyn Executor> = Arc::new(adding_executor());
        let selector = ExecutorSelector::build(
            true,
            async { Err(Error::SandboxUnavailable("Cannot connect to the Docker daemon".into())) },
            local,
        )
        .await;
        let judger = Judger::new(Arc::new(selector), registry());

        let verdict = judger
            .check("code", "python", &[TestCase::new("5\n3", "8")])
            .await
            .unwrap();

        assert!(verdict.all_passed);
        assert_eq!(judger.executor_name(), "mock");
    }

    #[tokio::test]
    async fn test_python_hello_world() {
        if !has_python() {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let registry = registry();
        let local = LocalExecutor::new(registry.clone()).with_temp_root(root.path());
        let judger = Judger::new(Arc::new(local), registry);

        let verdict = judger
            .check(
                "print(\"Hello, World!\")",
                "python",
                &[TestCase::new("", "Hello, World!")],
            )
            .await
            .unwrap();

        assert!(verdict.all_passed);
        assert_eq!(verdict.passed_count, 1);
        assert_eq!(verdict.total_count, 1);
    }

    #[tokio::test]
    async fn test_python_reads_stdin() {
        if !has_python() {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let registry = registry();
        let local = LocalExecutor::new(registry.clone()).with_temp_root(root.path());
        let judger = Judger::new(Arc::new(local), registry);

        let code = "num1 = int(input())\nnum2 = int(input())\nprint(num1 + num2)\n";
        let tests = vec![TestCase::new("5\n3", "8"), TestCase::new("10\n20", "30")];
        let verdict = judger.check(code, "python", &tests).await.unwrap();

        assert!(verdict.all_passed);
        assert_eq!(verdict.passed_count, 2);
    }

    #[tokio::test]
    async fn test_python_infinite_loop_times_out() {
        if !has_python() {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let registry = registry();
        let local = LocalExecutor::new(registry.clone()).with_temp_root(root.path());
        let judger = Judger::new(Arc::new(local), registry);

        let test = TestCase {
            timeout: Some(Duration::from_secs(2)),
            ..TestCase::new("", "x")
        };
        let started = Instant::now();
        let verdict = judger
            .check("while True: pass", "python", &[test])
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_millis(3500));
        assert!(verdict.results[0].timed_out);
        assert!(!verdict.results[0].passed);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
