use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::{Sleep, sleep};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use super::{IsolationRequest, IsolationRuntime, RawOutcome, SandboxError};

const DEFAULT_CAPTURE_LIMIT: usize = 256 * 1024; // 256 KiB
/// How long to keep draining pipes after the child was killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<OsString, OsString>,
    /// Start from an empty environment instead of inheriting ours.
    pub clear_env: bool,
    pub current_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub cancellation_token: Option<CancellationToken>,
    /// Per-stream capture cap; the rest is read and discarded.
    pub max_output_bytes: usize,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            clear_env: false,
            current_dir: None,
            timeout: None,
            cancellation_token: None,
            max_output_bytes: DEFAULT_CAPTURE_LIMIT,
        }
    }
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub exit_status: Option<ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    pub cancelled: bool,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_status.and_then(|status| status.code())
    }

    pub fn into_raw_outcome(self) -> RawOutcome {
        RawOutcome {
            exit_code: self.exit_code(),
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            timed_out: self.timed_out,
            cancelled: self.cancelled,
            duration: self.duration,
        }
    }
}

/// Runs a child process to completion, timeout or cancellation, whichever
/// comes first. The child is killed on the latter two and is always reaped.
pub struct ProcessRunner;

impl ProcessRunner {
    pub async fn run(options: ProcessOptions) -> Result<ProcessOutput, SandboxError> {
        if options.program.is_empty() {
            return Err(SandboxError::InvalidHarness(
                "program cannot be empty".to_string(),
            ));
        }

        let start = Instant::now();
        let mut command = Command::new(&options.program);
        command.args(&options.args);
        if options.clear_env {
            command.env_clear();
        }
        if !options.env.is_empty() {
            command.envs(&options.env);
        }
        if let Some(dir) = &options.current_dir {
            command.current_dir(dir);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| SandboxError::Spawn {
            program: options.program.clone(),
            source,
        })?;

        let mut stdout_future = Box::pin(read_stream(child.stdout.take(), options.max_output_bytes));
        let mut stderr_future = Box::pin(read_stream(child.stderr.take(), options.max_output_bytes));
        let mut timeout_future = options
            .timeout
            .map(|dur| Box::pin(sleep(dur)) as Pin<Box<Sleep>>);
        let mut cancellation_future = options.cancellation_token.as_ref().map(|token| {
            Box::pin(token.clone().cancelled_owned()) as Pin<Box<WaitForCancellationFutureOwned>>
        });

        enum Completion {
            Finished,
            TimedOut,
            Cancelled,
        }

        let mut exit_status: Option<ExitStatus> = None;
        let mut stdout_result: Option<std::io::Result<Vec<u8>>> = None;
        let mut stderr_result: Option<std::io::Result<Vec<u8>>> = None;

        let completion = loop {
            tokio::select! {
                res = child.wait(), if exit_status.is_none() => {
                    exit_status = Some(res.map_err(|err| {
                        SandboxError::Runtime(format!("failed to wait for '{}': {err}", options.program))
                    })?);
                }
                res = &mut stdout_future, if stdout_result.is_none() => {
                    stdout_result = Some(res);
                }
                res = &mut stderr_future, if stderr_result.is_none() => {
                    stderr_result = Some(res);
                }
                _ = async {
                    if let Some(fut) = timeout_future.as_mut() {
                        fut.as_mut().await;
                    } else {
                        futures::future::pending::<()>().await;
                    }
                }, if timeout_future.is_some() => {
                    break Completion::TimedOut;
                }
                _ = async {
                    if let Some(fut) = cancellation_future.as_mut() {
                        fut.as_mut().await;
                    } else {
                        futures::future::pending::<()>().await;
                    }
                }, if cancellation_future.is_some() => {
                    break Completion::Cancelled;
                }
            }

            if exit_status.is_some() && stdout_result.is_some() && stderr_result.is_some() {
                break Completion::Finished;
            }
        };

        let (timed_out, cancelled) = match completion {
            Completion::Finished => (false, false),
            Completion::TimedOut => (true, false),
            Completion::Cancelled => (false, true),
        };

        if timed_out || cancelled {
            if exit_status.is_none() {
                if let Err(err) = child.start_kill() {
                    tracing::warn!(program = %options.program, error = %err, "failed to kill child");
                }
                match tokio::time::timeout(DRAIN_GRACE, child.wait()).await {
                    Ok(Ok(status)) => exit_status = Some(status),
                    Ok(Err(err)) => {
                        tracing::warn!(program = %options.program, error = %err, "failed to reap child");
                    }
                    Err(_) => {
                        tracing::warn!(program = %options.program, "child did not exit after kill");
                    }
                }
            }
            if stdout_result.is_none() {
                stdout_result = tokio::time::timeout(DRAIN_GRACE, &mut stdout_future).await.ok();
            }
            if stderr_result.is_none() {
                stderr_result = tokio::time::timeout(DRAIN_GRACE, &mut stderr_future).await.ok();
            }
        }

        let stdout = collect(stdout_result, "stdout")?;
        let stderr = collect(stderr_result, "stderr")?;

        Ok(ProcessOutput {
            exit_status,
            stdout,
            stderr,
            timed_out,
            cancelled,
            duration: start.elapsed(),
        })
    }
}

fn collect(
    result: Option<std::io::Result<Vec<u8>>>,
    stream: &str,
) -> Result<Vec<u8>, SandboxError> {
    match result {
        Some(Ok(data)) => Ok(data),
        Some(Err(err)) => Err(SandboxError::Runtime(format!(
            "failed to read child {stream}: {err}"
        ))),
        // Pipe still held open by a grandchild after the kill.
        None => Ok(Vec::new()),
    }
}

async fn read_stream<R>(reader: Option<R>, max_bytes: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };

    let mut output = Vec::new();
    let mut buffer = [0u8; 4096];
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        let remaining = max_bytes.saturating_sub(output.len());
        if remaining > 0 {
            let to_copy = remaining.min(read);
            output.extend_from_slice(&buffer[..to_copy]);
        }
    }

    Ok(output)
}

/// Runs the harness as a plain child process in the workspace.
///
/// The environment is cleared and CPU time and data-segment limits are
/// applied with `ulimit` through a `sh` wrapper on unix. There is no
/// network or filesystem namespace: this runtime is for local development
/// and tests, not for untrusted code.
#[derive(Debug, Clone, Default)]
pub struct ProcessRuntime {
    path: Option<OsString>,
}

impl ProcessRuntime {
    pub fn new() -> Self {
        Self {
            path: std::env::var_os("PATH"),
        }
    }

    fn environment(&self, request: &IsolationRequest) -> HashMap<OsString, OsString> {
        let mut env = HashMap::new();
        if let Some(path) = &self.path {
            env.insert(OsString::from("PATH"), path.clone());
        }
        env.insert(OsString::from("HOME"), request.workspace.clone().into_os_string());
        env.insert(OsString::from("LANG"), OsString::from("C.UTF-8"));
        env.insert(OsString::from("PYTHONDONTWRITEBYTECODE"), OsString::from("1"));
        env.insert(OsString::from("PYTHONUNBUFFERED"), OsString::from("1"));
        env
    }
}

/// `sh -c 'ulimit ...; exec "$@"' codegate-sandbox <command...>`
#[cfg(unix)]
fn wrap_with_limits(request: &IsolationRequest) -> (String, Vec<String>) {
    let mut script = String::new();
    if request.limits.cpu_time_secs > 0 {
        script.push_str(&format!("ulimit -t {} && ", request.limits.cpu_time_secs));
    }
    if request.limits.max_memory_mb > 0 {
        script.push_str(&format!(
            "ulimit -d {} && ",
            request.limits.max_memory_mb.saturating_mul(1024)
        ));
    }
    if script.is_empty() {
        let mut command = request.command.iter().cloned();
        let program = command.next().unwrap_or_default();
        return (program, command.collect());
    }
    script.push_str("exec \"$@\"");

    let mut args = vec!["-c".to_string(), script, "codegate-sandbox".to_string()];
    args.extend(request.command.iter().cloned());
    ("sh".to_string(), args)
}

#[cfg(not(unix))]
fn wrap_with_limits(request: &IsolationRequest) -> (String, Vec<String>) {
    let mut command = request.command.iter().cloned();
    let program = command.next().unwrap_or_default();
    (program, command.collect())
}

#[async_trait]
impl IsolationRuntime for ProcessRuntime {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn run(&self, request: IsolationRequest) -> Result<RawOutcome, SandboxError> {
        if !request.network_access {
            tracing::debug!("process runtime cannot revoke network access");
        }
        let (program, args) = wrap_with_limits(&request);
        let output = ProcessRunner::run(ProcessOptions {
            program,
            args,
            env: self.environment(&request),
            clear_env: true,
            current_dir: Some(request.workspace.clone()),
            timeout: Some(request.timeout),
            cancellation_token: Some(request.cancel.clone()),
            max_output_bytes: request.max_output_bytes,
        })
        .await?;
        Ok(output.into_raw_outcome())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessOptions {
        ProcessOptions {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            ..ProcessOptions::default()
        }
    }

    #[tokio::test]
    async fn captures_exit_code_and_streams() {
        let output = ProcessRunner::run(sh("echo out; echo err >&2; exit 3"))
            .await
            .expect("run");
        assert_eq!(output.exit_code(), Some(3));
        assert_eq!(String::from_utf8_lossy(&output.stdout), "out\n");
        assert_eq!(String::from_utf8_lossy(&output.stderr), "err\n");
        assert!(!output.timed_out);
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let started = Instant::now();
        let output = ProcessRunner::run(ProcessOptions {
            timeout: Some(Duration::from_millis(200)),
            ..sh("sleep 30")
        })
        .await
        .expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let output = ProcessRunner::run(ProcessOptions {
            cancellation_token: Some(token),
            ..sh("sleep 30")
        })
        .await
        .expect("run");
        assert!(output.cancelled);
        assert!(!output.timed_out);
    }

    #[tokio::test]
    async fn output_is_capped() {
        let output = ProcessRunner::run(ProcessOptions {
            max_output_bytes: 10,
            ..sh("printf '%0100d' 0")
        })
        .await
        .expect("run");
        assert_eq!(output.stdout.len(), 10);
        assert_eq!(output.exit_code(), Some(0));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let error = ProcessRunner::run(ProcessOptions {
            program: "/definitely/not/a/program".to_string(),
            ..ProcessOptions::default()
        })
        .await
        .expect_err("spawn failure");
        assert!(matches!(error, SandboxError::Spawn { .. }));
    }

    #[test]
    fn limits_are_applied_through_sh() {
        let request = IsolationRequest {
            language: crate::artifact::Language::Python,
            workspace: PathBuf::from("/tmp/ws"),
            command: vec!["python3".to_string(), "main.py".to_string()],
            limits: codegate_config::ResourceLimits::conservative(),
            network_access: false,
            timeout: Duration::from_secs(1),
            max_output_bytes: 1024,
            cancel: CancellationToken::new(),
        };
        let (program, args) = wrap_with_limits(&request);
        assert_eq!(program, "sh");
        assert!(args[1].contains("ulimit -t 60"));
        assert!(args[1].contains("ulimit -d 524288"));
        assert_eq!(&args[3..], &["python3".to_string(), "main.py".to_string()]);

        let unlimited = IsolationRequest {
            limits: codegate_config::ResourceLimits::unlimited(),
            ..request
        };
        let (program, args) = wrap_with_limits(&unlimited);
        assert_eq!(program, "python3");
        assert_eq!(args, vec!["main.py".to_string()]);
    }
}
