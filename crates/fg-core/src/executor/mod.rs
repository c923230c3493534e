//! Process execution abstraction.
//!
//! Everything that runs a native tool (docker, the peer CLI inside the control
//! container, the artifact generator) goes through [`Executor`], so lifecycle and
//! invocation logic can be exercised against [`MockExecutor`] without a
//! container runtime.

pub mod mock;
pub mod system;

pub use mock::{ExecMode, MockExecutor, MockResponse, RecordedCall};
pub use system::SystemExecutor;

use async_trait::async_trait;
use fg_types::Result;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::DropGuard;

use crate::context::OpContext;

/// Capacity of the line queue between reader tasks and the consumer.
pub const STREAM_BUFFER: usize = 256;

/// Runs external programs.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run to completion and return stdout.
    async fn execute(&self, ctx: &OpContext, program: &str, args: &[String]) -> Result<Vec<u8>>;

    /// Run to completion and return stdout and stderr interleaved in arrival order.
    async fn execute_combined(
        &self,
        ctx: &OpContext,
        program: &str,
        args: &[String],
    ) -> Result<Vec<u8>>;

    /// Start the program and return its live output.
    async fn execute_stream(
        &self,
        ctx: &OpContext,
        program: &str,
        args: &[String],
    ) -> Result<ProcessStream>;
}

/// Live output of a streaming process.
///
/// `lines` ends when the process exits or the context is done; `exit` then
/// yields the terminal result (`Ok(())` on a clean exit). Dropping the stream
/// cancels the underlying process.
pub struct ProcessStream {
    pub lines: mpsc::Receiver<String>,
    pub exit: oneshot::Receiver<Result<()>>,
    _guard: Option<DropGuard>,
}

impl ProcessStream {
    pub fn new(
        lines: mpsc::Receiver<String>,
        exit: oneshot::Receiver<Result<()>>,
        guard: Option<DropGuard>,
    ) -> Self {
        Self {
            lines,
            exit,
            _guard: guard,
        }
    }

    /// Drain every remaining line, then return them with the terminal result.
    pub async fn collect(mut self) -> (Vec<String>, Result<()>) {
        let mut out = Vec::new();
        while let Some(line) = self.lines.recv().await {
            out.push(line);
        }
        let exit = match (&mut self.exit).await {
            Ok(result) => result,
            Err(_) => Ok(()),
        };
        (out, exit)
    }
}

/// Render a command line for logs and error messages.
pub fn render_command(program: &str, args: &[String]) -> String {
    let mut rendered = program.to_string();
    for arg in args {
        rendered.push(' ');
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            rendered.push_str(&format!("{arg:?}"));
        } else {
            rendered.push_str(arg);
        }
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_command_quotes_whitespace() {
        let args = vec![
            "exec".to_string(),
            "-c".to_string(),
            r#"{"Args":["a b"]}"#.to_string(),
        ];
        assert_eq!(
            render_command("docker", &args),
            r#"docker exec -c "{\"Args\":[\"a b\"]}""#
        );
    }

    #[tokio::test]
    async fn collect_drains_lines_and_result() {
        let (tx, rx) = mpsc::channel(4);
        let (exit_tx, exit_rx) = oneshot::channel();
        tx.send("one".to_string()).await.unwrap();
        tx.send("two".to_string()).await.unwrap();
        drop(tx);
        exit_tx.send(Ok(())).unwrap();

        let (lines, exit) = ProcessStream::new(rx, exit_rx, None).collect().await;
        assert_eq!(lines, vec!["one", "two"]);
        assert!(exit.is_ok());
    }
}
