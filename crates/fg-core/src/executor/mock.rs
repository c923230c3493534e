//! Recording executor for tests.
//!
//! Records every invocation and answers with caller-programmed canned
//! responses, so lifecycle and invocation logic runs without docker or any
//! native tool installed.

use std::sync::Mutex;

use async_trait::async_trait;
use fg_types::{FabricGridError, Result};
use tokio::sync::{mpsc, oneshot};

use super::{render_command, Executor, ProcessStream, STREAM_BUFFER};
use crate::context::OpContext;

/// Which executor entry point was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Plain,
    Combined,
    Stream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
    pub mode: ExecMode,
}

impl RecordedCall {
    pub fn command_line(&self) -> String {
        render_command(&self.program, &self.args)
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// True if any argument contains `needle` as a substring.
    pub fn mentions(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a.contains(needle))
    }

    /// Value following `flag`, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Every value following each occurrence of `flag`.
    pub fn flag_values(&self, flag: &str) -> Vec<&str> {
        self.args
            .windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].as_str())
            .collect()
    }
}

/// Canned outcome of a mocked call.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Successful exit with this output.
    Output(Vec<u8>),
    /// Non-zero exit with this output.
    Failure { exit_code: i32, output: String },
    /// Successful exit emitting these lines.
    Lines(Vec<String>),
    /// Never exits on its own; ends when the context is done.
    Hang,
}

impl MockResponse {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Output(s.into().into_bytes())
    }

    pub fn failure(exit_code: i32, output: impl Into<String>) -> Self {
        Self::Failure {
            exit_code,
            output: output.into(),
        }
    }
}

type Matcher = Box<dyn Fn(&RecordedCall) -> bool + Send + Sync>;

struct Rule {
    matcher: Matcher,
    response: MockResponse,
    remaining: Option<usize>,
}

/// Executor fake: rules are tried in registration order, the first match
/// answers; unmatched calls get the default response (empty success).
pub struct MockExecutor {
    calls: Mutex<Vec<RecordedCall>>,
    rules: Mutex<Vec<Rule>>,
    default: Mutex<MockResponse>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            rules: Mutex::new(Vec::new()),
            default: Mutex::new(MockResponse::Output(Vec::new())),
        }
    }

    pub fn set_default(&self, response: MockResponse) {
        *self.default.lock().unwrap_or_else(|e| e.into_inner()) = response;
    }

    pub fn respond_when<F>(&self, matcher: F, response: MockResponse)
    where
        F: Fn(&RecordedCall) -> bool + Send + Sync + 'static,
    {
        self.push_rule(Box::new(matcher), response, None);
    }

    /// Like `respond_when`, but the rule is consumed after `times` matches.
    /// A rule for zero matches is never installed.
    pub fn respond_times<F>(&self, times: usize, matcher: F, response: MockResponse)
    where
        F: Fn(&RecordedCall) -> bool + Send + Sync + 'static,
    {
        if times == 0 {
            return;
        }
        self.push_rule(Box::new(matcher), response, Some(times));
    }

    /// Answer calls where any argument contains `needle`.
    pub fn respond_when_args_contain(&self, needle: &str, response: MockResponse) {
        let needle = needle.to_string();
        self.respond_when(move |call| call.mentions(&needle), response);
    }

    fn push_rule(&self, matcher: Matcher, response: MockResponse, remaining: Option<usize>) {
        self.rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Rule {
                matcher,
                response,
                remaining,
            });
    }

    /// Every call recorded so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn calls_mentioning(&self, needle: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.mentions(needle))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn record(&self, program: &str, args: &[String], mode: ExecMode) -> MockResponse {
        let call = RecordedCall {
            program: program.to_string(),
            args: args.to_vec(),
            mode,
        };

        let response = {
            let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
            let hit = rules.iter().position(|r| (r.matcher)(&call));
            match hit {
                Some(i) => {
                    let response = rules[i].response.clone();
                    if let Some(remaining) = rules[i].remaining.as_mut() {
                        *remaining = remaining.saturating_sub(1);
                        if *remaining == 0 {
                            rules.remove(i);
                        }
                    }
                    response
                }
                None => self
                    .default
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone(),
            }
        };

        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
        response
    }

    async fn run(
        &self,
        ctx: &OpContext,
        program: &str,
        args: &[String],
        mode: ExecMode,
    ) -> Result<Vec<u8>> {
        ctx.check(program)?;
        match self.record(program, args, mode) {
            MockResponse::Output(out) => Ok(out),
            MockResponse::Lines(lines) => Ok(lines.join("\n").into_bytes()),
            MockResponse::Failure { exit_code, output } => Err(FabricGridError::ProcessFailed {
                program: program.to_string(),
                exit_code: Some(exit_code),
                output,
            }),
            MockResponse::Hang => {
                let reason = ctx.done().await;
                Err(reason.into_error(format!("{program} interrupted")))
            }
        }
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn execute(&self, ctx: &OpContext, program: &str, args: &[String]) -> Result<Vec<u8>> {
        self.run(ctx, program, args, ExecMode::Plain).await
    }

    async fn execute_combined(
        &self,
        ctx: &OpContext,
        program: &str,
        args: &[String],
    ) -> Result<Vec<u8>> {
        self.run(ctx, program, args, ExecMode::Combined).await
    }

    async fn execute_stream(
        &self,
        ctx: &OpContext,
        program: &str,
        args: &[String],
    ) -> Result<ProcessStream> {
        ctx.check(program)?;
        let response = self.record(program, args, ExecMode::Stream);

        let (exit_tx, exit_rx) = oneshot::channel();
        let split = |text: &str| -> Vec<String> { text.lines().map(str::to_string).collect() };

        let (lines, exit) = match response {
            MockResponse::Output(out) => (split(&String::from_utf8_lossy(&out)), Ok(())),
            MockResponse::Lines(lines) => (lines, Ok(())),
            MockResponse::Failure { exit_code, output } => (
                split(&output),
                Err(FabricGridError::ProcessFailed {
                    program: program.to_string(),
                    exit_code: Some(exit_code),
                    output,
                }),
            ),
            MockResponse::Hang => {
                let (tx, rx) = mpsc::channel::<String>(STREAM_BUFFER);
                let stream_ctx = ctx.child();
                let guard = stream_ctx.token().clone().drop_guard();
                let program = program.to_string();
                tokio::spawn(async move {
                    let reason = stream_ctx.done().await;
                    drop(tx);
                    let _ = exit_tx.send(Err(reason.into_error(format!("{program} stream stopped"))));
                });
                return Ok(ProcessStream::new(rx, exit_rx, Some(guard)));
            }
        };

        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            let _ = tx.try_send(line);
        }
        drop(tx);
        let _ = exit_tx.send(exit);
        Ok(ProcessStream::new(rx, exit_rx, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fg_types::ErrorKind;
    use std::time::Duration;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn records_calls_in_order() {
        let mock = MockExecutor::new();
        let ctx = OpContext::background();
        mock.execute(&ctx, "docker", &args(&["ps"])).await.unwrap();
        mock.execute_combined(&ctx, "docker", &args(&["exec", "cli"]))
            .await
            .unwrap();

        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].command_line(), "docker ps");
        assert_eq!(calls[1].mode, ExecMode::Combined);
    }

    #[tokio::test]
    async fn first_matching_rule_answers() {
        let mock = MockExecutor::new();
        mock.respond_when_args_contain("inspect", MockResponse::text("running"));
        mock.respond_when_args_contain("inspect", MockResponse::text("exited"));

        let out = mock
            .execute(&OpContext::background(), "docker", &args(&["inspect", "x"]))
            .await
            .unwrap();
        assert_eq!(out, b"running");
    }

    #[tokio::test]
    async fn limited_rule_is_consumed() {
        let mock = MockExecutor::new();
        mock.respond_times(1, |c| c.has_arg("inspect"), MockResponse::text("created"));
        mock.respond_when(|c| c.has_arg("inspect"), MockResponse::text("running"));

        let ctx = OpContext::background();
        let a = mock.execute(&ctx, "docker", &args(&["inspect"])).await.unwrap();
        let b = mock.execute(&ctx, "docker", &args(&["inspect"])).await.unwrap();
        assert_eq!(a, b"created");
        assert_eq!(b, b"running");
    }

    #[tokio::test]
    async fn zero_times_rule_never_answers() {
        let mock = MockExecutor::default();
        mock.respond_times(0, |c| c.has_arg("inspect"), MockResponse::text("created"));

        let out = mock
            .execute(&OpContext::background(), "docker", &args(&["inspect"]))
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn failure_maps_to_process_failed() {
        let mock = MockExecutor::new();
        mock.set_default(MockResponse::failure(1, "Error: boom"));
        let err = mock
            .execute(&OpContext::background(), "docker", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessFailed);
        assert_eq!(err.context().get("output").unwrap(), "Error: boom");
    }

    #[tokio::test]
    async fn cancelled_context_is_not_recorded() {
        let mock = MockExecutor::new();
        let ctx = OpContext::background();
        ctx.cancel();
        let err = mock.execute(&ctx, "docker", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn hang_ends_with_deadline() {
        let mock = MockExecutor::new();
        mock.set_default(MockResponse::Hang);
        let ctx = OpContext::background().with_timeout(Duration::from_millis(30));
        let err = mock.execute(&ctx, "docker", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn stream_lines_then_exit() {
        let mock = MockExecutor::new();
        mock.set_default(MockResponse::Lines(vec!["a".into(), "b".into()]));
        let stream = mock
            .execute_stream(&OpContext::background(), "docker", &args(&["logs"]))
            .await
            .unwrap();
        let (lines, exit) = stream.collect().await;
        assert_eq!(lines, vec!["a", "b"]);
        assert!(exit.is_ok());
    }

    #[tokio::test]
    async fn hanging_stream_ends_on_cancel() {
        let mock = MockExecutor::new();
        mock.set_default(MockResponse::Hang);
        let ctx = OpContext::background();
        let stream = mock
            .execute_stream(&ctx, "docker", &args(&["logs", "-f"]))
            .await
            .unwrap();
        ctx.cancel();
        let (lines, exit) = stream.collect().await;
        assert!(lines.is_empty());
        assert_eq!(exit.unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn flag_helpers() {
        let call = RecordedCall {
            program: "docker".into(),
            args: args(&["--peerAddresses", "a:1", "--peerAddresses", "b:2", "-C", "ch"]),
            mode: ExecMode::Plain,
        };
        assert_eq!(call.flag_value("-C"), Some("ch"));
        assert_eq!(call.flag_values("--peerAddresses"), vec!["a:1", "b:2"]);
    }
}
