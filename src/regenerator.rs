//! Regenerator backed by an external program.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use codegate_core::{Artifact, Finding, Regenerator};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const STDERR_TAIL_LINES: usize = 10;

#[derive(Serialize)]
struct RegenerationRequest<'a> {
    artifact: &'a Artifact,
    findings: &'a [Finding],
}

/// Spawns `program args…` once per regeneration, writes
/// `{"artifact", "findings"}` JSON to its stdin and reads the replacement
/// artifact JSON from its stdout.
#[derive(Debug, Clone)]
pub struct CommandRegenerator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRegenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl Regenerator for CommandRegenerator {
    async fn regenerate(&self, artifact: &Artifact, findings: &[Finding]) -> Result<Artifact> {
        let payload = serde_json::to_vec(&RegenerationRequest { artifact, findings })
            .context("Failed to encode regeneration request")?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn regenerator '{}'", self.program))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Regenerator stdin was not captured"))?;
        // Written from a separate task so a child that answers before
        // draining stdin cannot deadlock against us.
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&payload).await;
            drop(stdin);
            result
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                anyhow!(
                    "Regenerator '{}' timed out after {}s",
                    self.program,
                    self.timeout.as_secs()
                )
            })?
            .with_context(|| format!("Failed to wait for regenerator '{}'", self.program))?;

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "regenerator closed stdin early");
            }
            Err(err) => tracing::warn!(error = %err, "regeneration request writer failed"),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            bail!(
                "Regenerator '{}' exited with {}: {}",
                self.program,
                output.status,
                tail.trim()
            );
        }

        let next: Artifact = serde_json::from_slice(&output.stdout).with_context(|| {
            format!(
                "Regenerator '{}' did not print a valid artifact JSON",
                self.program
            )
        })?;
        tracing::debug!(
            previous = %artifact.id().short(),
            next = %next.id().short(),
            "regenerator produced artifact"
        );
        Ok(next)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use codegate_core::{FindingKind, Language, Severity};

    fn shell(script: &str, timeout: Duration) -> CommandRegenerator {
        CommandRegenerator::new("sh", vec!["-c".to_string(), script.to_string()], timeout)
    }

    fn findings() -> Vec<Finding> {
        vec![
            Finding::new(FindingKind::UnsafeConstruct, Severity::Critical, "eval")
                .with_code("python.eval"),
        ]
    }

    #[tokio::test]
    async fn reads_the_replacement_artifact_from_stdout() {
        let regenerator = shell(
            r#"cat > /dev/null; printf '{"source": "print(2)", "language": "python"}'"#,
            Duration::from_secs(10),
        );
        let next = regenerator
            .regenerate(&Artifact::new("eval('2')", Language::Python), &findings())
            .await
            .expect("regenerate");
        assert_eq!(next.source(), "print(2)");
        assert_eq!(next.language(), Language::Python);
    }

    #[tokio::test]
    async fn request_carries_artifact_and_findings() {
        // Echo the finding code back as the new source.
        let regenerator = shell(
            r#"code=$(sed -n 's/.*"code":"\([^"]*\)".*/\1/p'); printf '{"source": "%s", "language": "javascript"}' "$code""#,
            Duration::from_secs(10),
        );
        let next = regenerator
            .regenerate(&Artifact::new("eval('2')", Language::Python), &findings())
            .await
            .expect("regenerate");
        assert_eq!(next.source(), "python.eval");
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error_with_stderr() {
        let regenerator = shell(
            "cat > /dev/null; echo 'model offline' >&2; exit 3",
            Duration::from_secs(10),
        );
        let error = regenerator
            .regenerate(&Artifact::new("x = 1", Language::Python), &[])
            .await
            .expect_err("failure");
        let message = format!("{error:#}");
        assert!(message.contains("model offline"), "{message}");
    }

    #[tokio::test]
    async fn garbage_output_is_an_error() {
        let regenerator = shell("cat > /dev/null; echo not-json", Duration::from_secs(10));
        let error = regenerator
            .regenerate(&Artifact::new("x = 1", Language::Python), &[])
            .await
            .expect_err("failure");
        assert!(format!("{error:#}").contains("valid artifact JSON"));
    }

    #[tokio::test]
    async fn slow_program_times_out() {
        let regenerator = shell("sleep 5", Duration::from_millis(100));
        let error = regenerator
            .regenerate(&Artifact::new("x = 1", Language::Python), &[])
            .await
            .expect_err("timeout");
        assert!(error.to_string().contains("timed out"));
    }
}
