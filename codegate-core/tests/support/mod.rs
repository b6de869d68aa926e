//! Fakes shared by the integration tests: a scripted isolation runtime,
//! an in-memory vulnerability source and a scripted regenerator.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use codegate_config::SandboxConfig;
use codegate_core::sandbox::{IsolationRequest, RawOutcome};
use codegate_core::{
    Advisory, Artifact, AuditError, DependencyAuditor, DependencyRef, Finding, IsolationRuntime,
    Lookup, Regenerator, RuleEngine, SandboxError, SandboxExecutor, ScoringPolicy, Validator,
    VulnerabilitySource,
};

/// What the fake runtime does for one call.
#[derive(Debug, Clone)]
pub enum Step {
    Exit(i32),
    /// Wait until the request's timeout elapses and report a timeout.
    Hang,
    /// Block until the request is cancelled.
    WaitForCancel,
    Fail(String),
}

#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    commands: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRuntime {
    /// Steps are consumed in order; once empty every call exits 0.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        })
    }

    pub fn passing() -> Arc<Self> {
        Self::new([])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().expect("commands lock").clone()
    }
}

#[async_trait]
impl IsolationRuntime for ScriptedRuntime {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn run(&self, request: IsolationRequest) -> Result<RawOutcome, SandboxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.commands
            .lock()
            .expect("commands lock")
            .push(request.command.clone());
        let step = self
            .steps
            .lock()
            .expect("steps lock")
            .pop_front()
            .unwrap_or(Step::Exit(0));

        match step {
            Step::Exit(code) => Ok(RawOutcome {
                exit_code: Some(code),
                stderr: if code == 0 {
                    String::new()
                } else {
                    "Traceback (most recent call last):\nAssertionError\n".to_string()
                },
                duration: Duration::from_millis(5),
                ..RawOutcome::default()
            }),
            Step::Hang => {
                tokio::time::sleep(request.timeout).await;
                Ok(RawOutcome {
                    timed_out: true,
                    duration: request.timeout,
                    ..RawOutcome::default()
                })
            }
            Step::WaitForCancel => {
                request.cancel.cancelled().await;
                Ok(RawOutcome {
                    cancelled: true,
                    ..RawOutcome::default()
                })
            }
            Step::Fail(reason) => Err(SandboxError::Runtime(reason)),
        }
    }
}

/// In-memory advisories keyed by exact package name.
#[derive(Debug, Default)]
pub struct StaticSource {
    packages: HashMap<String, Vec<Advisory>>,
    unavailable: bool,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(mut self, name: &str, advisories: Vec<Advisory>) -> Self {
        self.packages.insert(name.to_string(), advisories);
        self
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl VulnerabilitySource for StaticSource {
    async fn lookup(&self, dependency: &DependencyRef) -> Result<Lookup, AuditError> {
        if self.unavailable {
            return Err(AuditError::Unavailable("connection refused".to_string()));
        }
        Ok(match self.packages.get(&dependency.name) {
            Some(advisories) => Lookup::Known(advisories.clone()),
            None => Lookup::Unknown,
        })
    }
}

/// Regenerator that replays a fixed list of results and records what it
/// was shown.
#[derive(Debug, Default)]
pub struct ScriptedRegenerator {
    replies: Mutex<VecDeque<Result<Artifact, String>>>,
    seen: Mutex<Vec<(Artifact, Vec<Finding>)>>,
}

impl ScriptedRegenerator {
    pub fn new(replies: impl IntoIterator<Item = Result<Artifact, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().expect("seen lock").len()
    }

    pub fn seen(&self) -> Vec<(Artifact, Vec<Finding>)> {
        self.seen.lock().expect("seen lock").clone()
    }
}

#[async_trait]
impl Regenerator for ScriptedRegenerator {
    async fn regenerate(
        &self,
        artifact: &Artifact,
        findings: &[Finding],
    ) -> anyhow::Result<Artifact> {
        self.seen
            .lock()
            .expect("seen lock")
            .push((artifact.clone(), findings.to_vec()));
        let reply = self.replies.lock().expect("replies lock").pop_front();
        match reply {
            Some(Ok(artifact)) => Ok(artifact),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => Err(anyhow!("no scripted reply left")),
        }
    }
}

pub const SANDBOX_TIMEOUT: Duration = Duration::from_millis(200);

pub fn validator_with(
    runtime: Arc<dyn IsolationRuntime>,
    source: impl VulnerabilitySource + 'static,
) -> Validator {
    Validator::new(
        RuleEngine::default(),
        DependencyAuditor::new(Arc::new(source), Duration::from_millis(500)),
        SandboxExecutor::new(runtime, &SandboxConfig::default()),
        ScoringPolicy::default(),
        SANDBOX_TIMEOUT,
    )
}

pub fn validator(runtime: Arc<dyn IsolationRuntime>) -> Validator {
    validator_with(runtime, StaticSource::new())
}
