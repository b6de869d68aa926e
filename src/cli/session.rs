use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use codegate_config::CodegateConfig;
use codegate_core::RetryCoordinator;
use codegate_exec_events::{EventEmitter, SessionEvent, TracingEmitter, json};

use super::{build_validator, cancel_on_ctrl_c, load_artifact, print_json};
use crate::regenerator::CommandRegenerator;

#[derive(Debug, Clone)]
pub struct SessionCommandOptions {
    pub artifact: PathBuf,
    pub regenerate_cmd: String,
    pub regenerate_args: Vec<String>,
    pub regenerate_timeout: Duration,
    pub max_attempts: Option<u32>,
    pub events_path: Option<PathBuf>,
    pub summary: bool,
    pub pretty: bool,
}

/// Run one session. Returns whether it ended in `accepted`.
pub async fn handle_session_command(
    config: &CodegateConfig,
    options: SessionCommandOptions,
) -> Result<bool> {
    let artifact = load_artifact(&options.artifact)?;
    let validator = build_validator(config)?;
    let regenerator = CommandRegenerator::new(
        options.regenerate_cmd.clone(),
        options.regenerate_args.clone(),
        options.regenerate_timeout,
    );
    let max_attempts = options.max_attempts.unwrap_or(config.retry.max_attempts);

    let coordinator = match &options.events_path {
        Some(path) => RetryCoordinator::new(validator).with_emitter(JsonlEmitter::create(path)?),
        None => RetryCoordinator::new(validator)
            .with_emitter(TracingEmitter::new(tracing::Level::DEBUG)),
    };

    let cancel = cancel_on_ctrl_c();
    let outcome = coordinator
        .run(artifact, &regenerator, max_attempts, &cancel)
        .await
        .context("Session could not start")?;

    if options.summary {
        eprintln!("{}", outcome.summary());
    }
    print_json(&outcome, options.pretty)?;
    Ok(outcome.accepted())
}

/// Appends versioned events to a file, one JSON document per line, and
/// mirrors them to `tracing`.
struct JsonlEmitter {
    writer: BufWriter<File>,
    path: PathBuf,
    broken: bool,
    tracing: TracingEmitter,
}

impl JsonlEmitter {
    fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open events file {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            broken: false,
            tracing: TracingEmitter::new(tracing::Level::DEBUG),
        })
    }

    fn write_line(&mut self, event: &SessionEvent) -> Result<()> {
        let line = json::versioned_to_string(event).context("Failed to serialize event")?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl EventEmitter for JsonlEmitter {
    fn emit(&mut self, event: &SessionEvent) {
        self.tracing.emit(event);
        if self.broken {
            return;
        }
        if let Err(err) = self.write_line(event) {
            tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "failed to write session event; further events are dropped"
            );
            self.broken = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use codegate_exec_events::SessionFinishedEvent;

    #[test]
    fn events_are_appended_as_versioned_json_lines() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("events.jsonl");
        let mut emitter = JsonlEmitter::create(&path).expect("emitter");
        for attempts in [1, 2] {
            emitter.emit(&SessionEvent::SessionFinished(SessionFinishedEvent {
                session_id: "s".to_string(),
                state: "accepted".to_string(),
                reason: None,
                attempts,
            }));
        }

        let content = std::fs::read_to_string(&path).expect("read events");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let decoded = json::versioned_from_str(lines[1]).expect("decode");
        assert_eq!(decoded.event.kind(), "session.finished");
    }
}
