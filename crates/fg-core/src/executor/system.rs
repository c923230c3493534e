use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fg_types::{FabricGridError, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{Executor, ProcessStream, STREAM_BUFFER};
use crate::context::OpContext;

/// Executor backed by `tokio::process`.
///
/// Every call spawns its own child with `kill_on_drop`, so abandoning a call
/// (context done, future dropped) never leaves the process running.
#[derive(Debug, Clone, Default)]
pub struct SystemExecutor {
    live_streams: Arc<AtomicUsize>,
}

impl SystemExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of streaming supervisors that have not finished yet.
    pub fn live_streams(&self) -> usize {
        self.live_streams.load(Ordering::SeqCst)
    }

    fn command(program: &str, args: &[String]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Decrements the live-stream counter when the supervisor task ends.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn spawn_error(program: &str, e: std::io::Error) -> FabricGridError {
    if e.kind() == std::io::ErrorKind::NotFound {
        FabricGridError::BinaryMissing(program.to_string())
    } else {
        FabricGridError::ProcessFailed {
            program: program.to_string(),
            exit_code: None,
            output: format!("failed to spawn: {e}"),
        }
    }
}

fn to_line(buf: Vec<u8>) -> String {
    String::from_utf8_lossy(&buf)
        .trim_end_matches(&['\r', '\n'][..])
        .to_string()
}

/// Forward newline-delimited chunks from `reader` into `tx` until EOF, a closed
/// receiver, or the context finishing.
async fn pump<R, T, F>(reader: R, tx: mpsc::Sender<T>, ctx: OpContext, map: F)
where
    R: AsyncRead + Unpin,
    F: Fn(Vec<u8>) -> T,
{
    let mut reader = BufReader::new(reader);
    loop {
        let mut buf = Vec::new();
        let read = tokio::select! {
            r = reader.read_until(b'\n', &mut buf) => r,
            _ = ctx.done() => break,
        };
        match read {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        tokio::select! {
            sent = tx.send(map(buf)) => {
                if sent.is_err() {
                    break;
                }
            }
            _ = ctx.done() => break,
        }
    }
}

#[async_trait]
impl Executor for SystemExecutor {
    async fn execute(&self, ctx: &OpContext, program: &str, args: &[String]) -> Result<Vec<u8>> {
        ctx.check(program)?;

        let child = Self::command(program, args)
            .spawn()
            .map_err(|e| spawn_error(program, e))?;
        debug!(program, args = args.len(), "Spawned process");

        let output = tokio::select! {
            res = child.wait_with_output() => res.map_err(|e| FabricGridError::ProcessFailed {
                program: program.to_string(),
                exit_code: None,
                output: format!("failed to wait: {e}"),
            })?,
            reason = ctx.done() => {
                warn!(program, ?reason, "Process interrupted");
                return Err(reason.into_error(format!("{program} interrupted")));
            }
        };

        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stderr).to_string();
            if text.trim().is_empty() {
                text = String::from_utf8_lossy(&output.stdout).to_string();
            }
            debug!(program, exit_code = ?output.status.code(), "Process exited with non-zero status");
            return Err(FabricGridError::ProcessFailed {
                program: program.to_string(),
                exit_code: output.status.code(),
                output: text,
            });
        }

        Ok(output.stdout)
    }

    async fn execute_combined(
        &self,
        ctx: &OpContext,
        program: &str,
        args: &[String],
    ) -> Result<Vec<u8>> {
        ctx.check(program)?;

        let mut child = Self::command(program, args)
            .spawn()
            .map_err(|e| spawn_error(program, e))?;
        debug!(program, args = args.len(), "Spawned process (combined output)");

        let pump_ctx = ctx.child();
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(STREAM_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, tx.clone(), pump_ctx.clone(), |b| b));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, tx.clone(), pump_ctx.clone(), |b| b));
        }
        drop(tx);

        let work = async {
            let mut combined = Vec::new();
            while let Some(chunk) = rx.recv().await {
                combined.extend_from_slice(&chunk);
            }
            let status = child.wait().await;
            (combined, status)
        };

        let (combined, status) = tokio::select! {
            r = work => r,
            reason = ctx.done() => {
                pump_ctx.cancel();
                warn!(program, ?reason, "Process interrupted");
                return Err(reason.into_error(format!("{program} interrupted")));
            }
        };

        let status = status.map_err(|e| FabricGridError::ProcessFailed {
            program: program.to_string(),
            exit_code: None,
            output: format!("failed to wait: {e}"),
        })?;

        if !status.success() {
            return Err(FabricGridError::ProcessFailed {
                program: program.to_string(),
                exit_code: status.code(),
                output: String::from_utf8_lossy(&combined).to_string(),
            });
        }

        Ok(combined)
    }

    async fn execute_stream(
        &self,
        ctx: &OpContext,
        program: &str,
        args: &[String],
    ) -> Result<ProcessStream> {
        ctx.check(program)?;

        let mut child = Self::command(program, args)
            .spawn()
            .map_err(|e| spawn_error(program, e))?;
        debug!(program, args = args.len(), "Spawned streaming process");

        let stream_ctx = ctx.child();
        let guard = stream_ctx.token().clone().drop_guard();

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let readers: Vec<_> = [
            child
                .stdout
                .take()
                .map(|s| tokio::spawn(pump(s, tx.clone(), stream_ctx.clone(), to_line))),
            child
                .stderr
                .take()
                .map(|s| tokio::spawn(pump(s, tx.clone(), stream_ctx.clone(), to_line))),
        ]
        .into_iter()
        .flatten()
        .collect();
        drop(tx);

        let (exit_tx, exit_rx) = oneshot::channel();
        let live = LiveGuard::new(self.live_streams.clone());
        let program = program.to_string();

        tokio::spawn(async move {
            let _live = live;
            let result = tokio::select! {
                status = child.wait() => match status {
                    Ok(s) if s.success() => Ok(()),
                    Ok(s) => Err(FabricGridError::ProcessFailed {
                        program: program.clone(),
                        exit_code: s.code(),
                        output: String::new(),
                    }),
                    Err(e) => Err(FabricGridError::ProcessFailed {
                        program: program.clone(),
                        exit_code: None,
                        output: format!("failed to wait: {e}"),
                    }),
                },
                reason = stream_ctx.done() => {
                    let _ = child.kill().await;
                    debug!(program = %program, ?reason, "Streaming process stopped");
                    Err(reason.into_error(format!("{program} stream stopped")))
                }
            };

            for reader in readers {
                let _ = reader.await;
            }
            let _ = exit_tx.send(result);
        });

        Ok(ProcessStream::new(rx, exit_rx, Some(guard)))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use fg_types::ErrorKind;
    use std::time::Duration;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn execute_returns_stdout() {
        let exec = SystemExecutor::new();
        let out = exec
            .execute(&OpContext::background(), "echo", &args(&["hello"]))
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out).trim(), "hello");
    }

    #[tokio::test]
    async fn execute_non_zero_exit_is_process_failed() {
        let exec = SystemExecutor::new();
        let err = exec
            .execute(
                &OpContext::background(),
                "sh",
                &args(&["-c", "echo boom >&2; exit 3"]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessFailed);
        let ctx = err.context();
        assert_eq!(ctx.get("exit_code").unwrap(), "3");
        assert!(ctx.get("output").unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let exec = SystemExecutor::new();
        let err = exec
            .execute(&OpContext::background(), "fabricgrid-no-such-binary", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BinaryMissing);
    }

    #[tokio::test]
    async fn cancelled_context_does_not_spawn() {
        let exec = SystemExecutor::new();
        let ctx = OpContext::background();
        ctx.cancel();
        let err = exec
            .execute(&ctx, "fabricgrid-no-such-binary", &[])
            .await
            .unwrap_err();
        // Cancelled, not BinaryMissing: nothing was spawned.
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn deadline_kills_long_process() {
        let exec = SystemExecutor::new();
        let ctx = OpContext::background().with_timeout(Duration::from_millis(100));
        let started = std::time::Instant::now();
        let err = exec
            .execute(&ctx, "sleep", &args(&["5"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn external_cancel_interrupts_process() {
        let exec = SystemExecutor::new();
        let ctx = OpContext::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let err = exec
            .execute(&ctx, "sleep", &args(&["5"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn combined_output_includes_stderr() {
        let exec = SystemExecutor::new();
        let out = exec
            .execute_combined(
                &OpContext::background(),
                "sh",
                &args(&["-c", "echo out; echo err >&2"]),
            )
            .await
            .unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("out"));
        assert!(text.contains("err"));
    }

    #[tokio::test]
    async fn combined_failure_carries_output() {
        let exec = SystemExecutor::new();
        let err = exec
            .execute_combined(
                &OpContext::background(),
                "sh",
                &args(&["-c", "echo partial; echo bad >&2; exit 1"]),
            )
            .await
            .unwrap_err();
        let output = err.context().get("output").cloned().unwrap();
        assert!(output.contains("partial"));
        assert!(output.contains("bad"));
    }

    #[tokio::test]
    async fn stream_yields_lines_then_clean_exit() {
        let exec = SystemExecutor::new();
        let stream = exec
            .execute_stream(
                &OpContext::background(),
                "sh",
                &args(&["-c", "echo one; echo two; echo three >&2"]),
            )
            .await
            .unwrap();
        let (mut lines, exit) = stream.collect().await;
        lines.sort();
        assert_eq!(lines, vec!["one", "three", "two"]);
        assert!(exit.is_ok());
    }

    #[tokio::test]
    async fn stream_reports_non_zero_exit() {
        let exec = SystemExecutor::new();
        let stream = exec
            .execute_stream(&OpContext::background(), "sh", &args(&["-c", "exit 4"]))
            .await
            .unwrap();
        let (_, exit) = stream.collect().await;
        assert_eq!(exit.unwrap_err().kind(), ErrorKind::ProcessFailed);
    }

    #[tokio::test]
    async fn stream_ends_on_cancel() {
        let exec = SystemExecutor::new();
        let ctx = OpContext::background();
        let stream = exec
            .execute_stream(&ctx, "sleep", &args(&["5"]))
            .await
            .unwrap();
        ctx.cancel();
        let (lines, exit) = tokio::time::timeout(Duration::from_secs(2), stream.collect())
            .await
            .expect("stream should end promptly after cancel");
        assert!(lines.is_empty());
        assert_eq!(exit.unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn repeated_stream_cancel_leaves_no_live_tasks() {
        let exec = SystemExecutor::new();
        for _ in 0..10 {
            let ctx = OpContext::background();
            let stream = exec
                .execute_stream(&ctx, "sleep", &args(&["5"]))
                .await
                .unwrap();
            ctx.cancel();
            drop(stream);
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while exec.live_streams() > 0 && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(exec.live_streams(), 0);
    }

    #[tokio::test]
    async fn dropping_stream_stops_process() {
        let exec = SystemExecutor::new();
        let stream = exec
            .execute_stream(&OpContext::background(), "sleep", &args(&["5"]))
            .await
            .unwrap();
        assert_eq!(exec.live_streams(), 1);
        drop(stream);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while exec.live_streams() > 0 && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(exec.live_streams(), 0);
    }
}
